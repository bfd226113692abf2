use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

use viewplan::Result;
use viewplan::config::Config;
use viewplan::error::PlanError;
use viewplan::log::{DeleteOutcome, TraceArchive, classify, delete_archive, remove_mark, summarize};
use viewplan::model::{Criterion, Plan};
use viewplan::render::{
    DotOptions, ScriptOptions, ScriptWriter, TraceDetail, render_dot, render_python, write_output,
};
use viewplan::replan::{ReplanTarget, Replanner};
use viewplan::runtime::{HostRuntime, InterpreterRuntime};
use viewplan::trace::{Grammar, parse_session};

const DEFAULT_PLAN_FILE: &str = "plan.py";
const DEFAULT_DOT_FILE: &str = "plan.dot";

#[derive(Parser)]
#[command(name = "viewplan")]
#[command(about = "Inspect, transform and replay recorded execution plans", long_about = None)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Trace archive (overrides the configuration).
    #[arg(long, global = true)]
    trace_file: Option<PathBuf>,

    /// Mark file (defaults to viewPlan.mark beside the archive).
    #[arg(long, global = true)]
    mark_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the sessions in the archive (`N`, `N-`, `-N` or `N-M`).
    List {
        range: Option<String>,

        /// Only sessions of a day (YYYY-MM-DD, default today).
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        today: Option<String>,

        /// Classify each plan (olap, join, ptime, kalk, mixed, unknown).
        #[arg(long)]
        classify: bool,

        /// List the operation classes of each plan.
        #[arg(long)]
        list_operations: bool,
    },

    /// Print a session, or write it as a runnable script.
    View {
        /// Session number (0 = latest, negative = back from latest) or file.
        session: Option<String>,
        output: Option<PathBuf>,

        #[command(flatten)]
        transform: TransformArgs,

        #[command(flatten)]
        script: ScriptArgs,
    },

    /// Run a session through the host runtime.
    Run {
        session: Option<String>,
        output: Option<PathBuf>,

        /// Script written when no output is given.
        #[arg(long, default_value = DEFAULT_PLAN_FILE)]
        plan_file: PathBuf,

        /// Precompute everything the matched operations consume.
        #[arg(long, value_delimiter = ',', conflicts_with = "replace_input")]
        only_pop: Vec<String>,

        /// Precompute the matched connectors and bind them as inputs.
        #[arg(long, value_delimiter = ',')]
        replace_input: Vec<String>,

        /// Keep the preparation script and captured values.
        #[arg(long)]
        keep_temporaries: bool,

        #[command(flatten)]
        transform: TransformArgs,

        #[command(flatten)]
        script: ScriptArgs,
    },

    /// Write a GraphViz description of a session.
    Dot {
        session: Option<String>,

        /// Output file; the default plan.dot is always overwritten.
        #[arg(long)]
        dot_file: Option<PathBuf>,

        /// Overwrite an existing --dot-file.
        #[arg(long)]
        replace: bool,

        /// 0: no statements, 1-3: all, larger: clip lines to this width.
        #[arg(long, default_value_t = 1)]
        include_trace: usize,

        /// Escaped label budget per node (0 disables truncation).
        #[arg(long)]
        limit_node_length: Option<usize>,

        #[command(flatten)]
        transform: TransformArgs,
    },

    /// Count connections between servers.
    Count {
        session: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Hide all but the last KEEP sessions from later commands.
    Mark {
        #[arg(default_value_t = 0)]
        keep: usize,
    },

    /// Remove the mark.
    Unmark,

    /// Remove the mark and the archive.
    Delete,
}

#[derive(Args, Default)]
struct TransformArgs {
    /// Remove every setPopFlags statement.
    #[arg(long)]
    remove_pop_flags: bool,

    /// `WHICH=VALUE`; an empty value only removes the flags.
    #[arg(long)]
    set_pop_flags: Vec<String>,

    /// Also request these connectors.
    #[arg(long, value_delimiter = ',')]
    retrieve: Vec<String>,

    /// Keep only the matched operations and what they depend on.
    #[arg(long, value_delimiter = ',')]
    stop_after: Vec<String>,
}

impl TransformArgs {
    fn is_empty(&self) -> bool {
        !self.remove_pop_flags
            && self.set_pop_flags.is_empty()
            && self.retrieve.is_empty()
            && self.stop_after.is_empty()
    }

    fn apply(&self, plan: &mut Plan) -> Result<()> {
        if self.remove_pop_flags {
            plan.remove_all_flags();
        }
        for spec in &self.set_pop_flags {
            let Some((which, value)) = spec.split_once('=') else {
                bail!("--set-pop-flags expects WHICH=VALUE: {}", spec);
            };
            let value = match value.trim() {
                "" => None,
                v => Some(v.parse::<i64>().with_context(|| format!("bad flag value in {}", spec))?),
            };
            let touched = plan.set_flag(&[Criterion::parse(which)], value);
            debug!("{}: {} operations", spec, touched);
        }
        if !self.stop_after.is_empty() {
            plan.clear_outputs();
        }
        if !self.retrieve.is_empty() {
            plan.add_outputs(&Criterion::parse_all(&self.retrieve));
        }
        if !self.stop_after.is_empty() {
            plan.keep_only(&Criterion::parse_all(&self.stop_after));
        }
        Ok(())
    }
}

#[derive(Args)]
struct ScriptArgs {
    /// Do not append code printing the requested values.
    #[arg(long)]
    no_print: bool,

    /// Pin locations to one index server (0 keeps them; default: only if
    /// all locations agree).
    #[arg(long)]
    one_server: Option<u32>,

    /// Turn a single-operation trace into a one-operation plan.
    #[arg(long)]
    pop_as_plan: bool,

    /// Overwrite existing output files.
    #[arg(long)]
    replace: bool,

    /// `Class=python|binary` for captured values.
    #[arg(long)]
    data_representation: Vec<String>,

    /// Representation of classes without an entry (`none` to fail instead).
    #[arg(long)]
    default_data_representation: Option<String>,
}

impl ScriptArgs {
    fn options(&self) -> ScriptOptions {
        ScriptOptions {
            one_server: self.one_server,
            add_print: !self.no_print,
            pop_as_plan: self.pop_as_plan,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(path) = &cli.trace_file {
        config.trace_file = Some(path.clone());
    }
    if let Some(path) = &cli.mark_file {
        config.mark_file = Some(path.clone());
    }

    match cli.cmd {
        Commands::List {
            range,
            today,
            classify,
            list_operations,
        } => list(&config, range.as_deref(), today.as_deref(), classify, list_operations)?,

        Commands::View {
            session,
            output,
            transform,
            script,
        } => {
            apply_representations(&mut config, &script)?;
            let text = transformed_text(&config, session.as_deref(), &transform)?;
            match output {
                None => print!("{}", text),
                Some(path) => {
                    let writer = ScriptWriter::new(&config, script.options())?;
                    writer.write(&path, &text, None, script.replace)?;
                    println!("Wrote {}", path.display());
                }
            }
        }

        Commands::Run {
            session,
            output,
            plan_file,
            only_pop,
            replace_input,
            keep_temporaries,
            transform,
            script,
        } => {
            apply_representations(&mut config, &script)?;
            let runtime = InterpreterRuntime {
                interpreter: config.interpreter.clone(),
            };
            let target = if !only_pop.is_empty() {
                Some(ReplanTarget::IsolateOperations(Criterion::parse_all(&only_pop)))
            } else if !replace_input.is_empty() {
                Some(ReplanTarget::ReplaceInputs(Criterion::parse_all(&replace_input)))
            } else {
                None
            };

            match target {
                None => {
                    let text = transformed_text(&config, session.as_deref(), &transform)?;
                    // The default plan file is scratch space.
                    let replace = script.replace || output.is_none();
                    let path = output.unwrap_or(plan_file);
                    let writer = ScriptWriter::new(&config, script.options())?;
                    writer.write(&path, &text, None, replace)?;
                    let status = runtime.execute(&path)?;
                    info!("{} finished with {:?}", path.display(), status);
                }
                Some(target) => {
                    let Some(out) = output else {
                        bail!("please specify a filename for the resulting plan");
                    };
                    if out.is_file() && !script.replace {
                        return Err(PlanError::OutputExists(out).into());
                    }
                    let mut plan = parse_transformed(&config, session.as_deref(), &transform)?;
                    let mut replanner = Replanner::new(&config, script.options(), &runtime)?;
                    replanner.keep_temporaries = keep_temporaries;
                    let outcome = replanner.run(&mut plan, &target, &out)?;
                    info!("precomputed {}", outcome.precomputed.join(", "));
                    for file in &outcome.kept {
                        debug!("kept {}", file.display());
                    }
                    println!("Wrote {}", out.display());
                }
            }
        }

        Commands::Dot {
            session,
            dot_file,
            replace,
            include_trace,
            limit_node_length,
            transform,
        } => {
            let plan = parse_transformed(&config, session.as_deref(), &transform)?;
            let limit = limit_node_length.unwrap_or(config.limit_node_length);
            let options = DotOptions {
                trace: TraceDetail::from_level(include_trace),
                limit_node_length: (limit > 0).then_some(limit),
            };
            let dot = render_dot(&plan, &options)?;
            let replace = replace || dot_file.is_none();
            let dot_file = dot_file.unwrap_or_else(|| PathBuf::from(DEFAULT_DOT_FILE));
            write_output(&dot_file, &dot.text, replace)?;
            println!("Wrote {}", dot_file.display());
        }

        Commands::Count { session, json } => {
            let plan = parse_transformed(&config, session.as_deref(), &TransformArgs::default())?;
            let report = plan.count_cross_location_edges(&config.default_location);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                if cli.verbose {
                    for c in &report.crossings {
                        println!("{} {} to {} ({})", c.slot, c.sender, c.receiver, c.producer_class);
                    }
                    println!();
                    for (class, n) in &report.by_class {
                        println!("{:<4} {}", n, class);
                    }
                    println!();
                }
                for (location, n) in &report.per_location {
                    println!("{:<4} {}", n, location);
                }
                println!("{:<4}", report.total);
            }
        }

        Commands::Mark { keep } => {
            let archive = open_archive(&config)?;
            archive.mark(keep)?;
        }

        Commands::Unmark => {
            let trace_file = trace_file(&config)?;
            remove_mark(&config.mark_path(&trace_file))?;
        }

        Commands::Delete => {
            let trace_file = trace_file(&config)?;
            match delete_archive(&trace_file, &config.mark_path(&trace_file))? {
                DeleteOutcome::Deleted => println!("Removed {}", trace_file.display()),
                DeleteOutcome::Missing => info!("{} does not exist", trace_file.display()),
            }
        }
    }

    Ok(())
}

fn trace_file(config: &Config) -> Result<PathBuf> {
    match &config.trace_file {
        Some(path) => Ok(path.clone()),
        None => bail!("no trace archive configured; use --trace-file or set trace_file in the config"),
    }
}

fn open_archive(config: &Config) -> Result<TraceArchive> {
    let path = trace_file(config)?;
    let mark = config.mark_path(&path);
    TraceArchive::open(path, mark)
}

fn apply_representations(config: &mut Config, script: &ScriptArgs) -> Result<()> {
    if let Some(value) = &script.default_data_representation {
        config.set_default_representation(value)?;
    }
    for spec in &script.data_representation {
        config.override_representation(spec)?;
    }
    Ok(())
}

/// Session text: `None`/number from the archive, anything else a file.
fn session_text(config: &Config, session: Option<&str>) -> Result<String> {
    let index = match session {
        None => 0,
        Some(s) => match s.parse::<i64>() {
            Ok(i) => i,
            Err(_) => {
                let path = Path::new(s);
                if !path.is_file() {
                    bail!(
                        "cannot read file {}; give a session number, a file name or nothing (the latest session)",
                        s
                    );
                }
                return fs::read_to_string(path).with_context(|| format!("read {}", s));
            }
        },
    };
    let archive = open_archive(config)?;
    let resolved = archive.resolve(index)?;
    debug!("reading session {} of {}", resolved, archive.len());
    archive.read(resolved)
}

fn parse_transformed(config: &Config, session: Option<&str>, transform: &TransformArgs) -> Result<Plan> {
    let text = session_text(config, session)?;
    let mut plan = parse_session(&text, config)?;
    transform.apply(&mut plan)?;
    Ok(plan)
}

/// The session as recorded, or re-rendered when a transformation applies.
fn transformed_text(config: &Config, session: Option<&str>, transform: &TransformArgs) -> Result<String> {
    if transform.is_empty() {
        return session_text(config, session);
    }
    let plan = parse_transformed(config, session, transform)?;
    Ok(render_python(&plan))
}

fn list(
    config: &Config,
    range: Option<&str>,
    today: Option<&str>,
    classify_plans: bool,
    list_operations: bool,
) -> Result<()> {
    let archive = open_archive(config)?;
    let n = archive.len();

    let (mut from, mut to) = match range {
        None => (None, None),
        Some(r) => parse_range(r)?,
    };
    if let Some(day) = today {
        let day = (!day.is_empty()).then_some(day);
        if from.is_none() {
            if to.is_none() {
                let days = archive.day_range(day)?;
                from = Some(days.start);
                to = Some(days.end.saturating_sub(1));
            } else {
                from = Some(archive.day_start(day)?);
            }
        }
    }
    let from = from.unwrap_or(1).max(1);
    let to = to.unwrap_or(n).min(n);

    let grammar = Grammar::new()?;
    for i in from..=to {
        let title = &archive.entries()[i - 1].title;
        println!("{}: {}", i, title);
        if classify_plans || list_operations {
            let summary = summarize(&archive.read(i)?, &grammar);
            let mut line = String::new();
            if classify_plans {
                line.push_str(&" ".repeat(i.to_string().len() + 2));
                line.push_str(&format!("{}, ", classify(&summary.classes)));
            }
            line.push_str(&format!("{} pops, {} lines", summary.operations, summary.lines));
            if list_operations {
                line.push_str(&format!(", class {}", summary.classes.join(", ")));
            }
            println!("{}", line);
        }
    }
    Ok(())
}

/// `N`, `N-`, `-N`, `N-M` -> (from, to), both 1-based and inclusive.
fn parse_range(range: &str) -> Result<(Option<usize>, Option<usize>)> {
    let number = |s: &str| -> Result<Option<usize>> {
        if s.is_empty() {
            return Ok(None);
        }
        s.parse::<usize>()
            .map(Some)
            .with_context(|| format!("bad list range {}", range))
    };
    match range.split_once('-') {
        None => {
            let n = number(range)?;
            Ok((n, n))
        }
        Some((from, to)) => Ok((number(from)?, number(to)?)),
    }
}
