//! Runnable script files.
//!
//! Wraps plan text (recorded or rendered) with the imports the host runtime
//! needs, optionally pins every location to one index server, and appends a
//! suffix that prints or captures the requested values:
//!
//! ```text
//! import cPickle, executorPy, fuzzypy, aepy
//!
//! # determine index server:
//! indexServer = tuple(fuzzypy.Admin().showServers(0, 1)[0][:2])
//!
//! ...plan text...
//! out0 = ex.getValue(c_d)
//! print out0.pythonTrace('c_d')
//! ```

use crate::Result;
use crate::config::{Config, DataRepresentation};
use crate::error::PlanError;
use crate::render::{py_quote, write_output};
use crate::trace::grammar::{EXECUTE_POP_MARKER, Grammar, INDEX_SERVER_EXPR, split_list};
use crate::trace::{convert_pop_to_plan, normalize_newlines};

use log::debug;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const IMPORT_PREFIX: &str = "import cPickle, executorPy, fuzzypy, aepy\n\n";
const LOCAL_COMMUNICATION_PREFIX: &str = "\
# assign local indexes:
import testbase
t = testbase.TestBase()
o = fuzzypy.Search()
t.setCommunicationMethod(o, 'l')

";
const INDEX_SERVER_HEADER: &str = "# determine index server";
/// Data class id of the OLAP result class.
const RESULT_CLASS_ID: u32 = 8;

#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// `None`: pin locations to the index server if they all name the same
    /// server. `Some(0)`: keep locations. `Some(_)`: always pin.
    pub one_server: Option<u32>,
    /// Print the requested values after `ex.calculate()`.
    pub add_print: bool,
    /// Rewrite single-operation traces as one-operation plans.
    pub pop_as_plan: bool,
}

/// Declared class of a requested connector.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DataClass {
    Name(String),
    Id(u32),
}

pub struct ScriptWriter<'a> {
    config: &'a Config,
    options: ScriptOptions,
    grammar: Grammar,
    location: Regex,
    module: Regex,
}

impl<'a> ScriptWriter<'a> {
    pub fn new(config: &'a Config, options: ScriptOptions) -> Result<Self> {
        Ok(Self {
            config,
            options,
            grammar: Grammar::new()?,
            location: Regex::new(
                r#"(pop\.setLocation|ex\.setExecutorLocation)(\(\s*(?:'[^']+'|"[^"]+")\s*,\s*\d+\s*\))"#,
            )?,
            module: Regex::new(r"^(?:inputValue|pop) = ([^(]*)\.[^(.]+\(")?,
        })
    }

    /// Write `trace` as a runnable script to `path`.
    ///
    /// With `capture`, the requested values are written next to `capture`
    /// instead of printed; the files the script will create are returned.
    pub fn write(
        &self,
        path: &Path,
        trace: &str,
        capture: Option<&Path>,
        replace: bool,
    ) -> Result<Vec<PathBuf>> {
        let (text, captured) = self.render(trace, capture)?;
        write_output(path, &text, replace)?;
        Ok(captured)
    }

    /// Script text for `trace` and the capture files it will create.
    pub fn render(&self, trace: &str, capture: Option<&Path>) -> Result<(String, Vec<PathBuf>)> {
        let mut trace = normalize_newlines(trace);
        let mut single_operation = trace.starts_with(EXECUTE_POP_MARKER);
        if single_operation && self.options.pop_as_plan {
            if let Some(plan) = convert_pop_to_plan(&trace, &self.grammar) {
                trace = plan;
                single_operation = false;
            }
        }
        if self.options.one_server != Some(0) {
            trace = self.replace_servers(&trace, self.options.one_server);
        }

        let mut captured = Vec::new();
        let suffix = if self.options.add_print || capture.is_some() {
            self.print_suffix(&trace, single_operation, capture, &mut captured)?
        } else {
            None
        };

        let modules = self.modules(&trace);
        let mut text = if modules.is_empty() {
            IMPORT_PREFIX.to_string()
        } else {
            format!("{}\nimport {}\n\n", IMPORT_PREFIX.trim(), modules.join(", "))
        };
        if single_operation {
            text.push_str(LOCAL_COMMUNICATION_PREFIX);
        }
        text.push_str(&trace);
        if let Some(suffix) = suffix {
            text.push_str(&suffix);
        }
        Ok((text, captured))
    }

    /// Modules referenced by `pop = mod.Cls(` / `inputValue = mod.Cls(`
    /// beyond the ones every script imports.
    pub fn modules(&self, trace: &str) -> Vec<String> {
        let mut have: BTreeSet<&str> = ["", "executorPy", "cPickle", "fuzzypy", "aepy"].into();
        let mut modules = Vec::new();
        for line in trace.lines() {
            if let Some(caps) = self.module.captures(line.trim()) {
                let module = caps.get(1).map_or("", |m| m.as_str());
                if have.insert(module) {
                    modules.push(module.to_string());
                }
            }
        }
        modules
    }

    /// Replace every recorded server with `*indexServer`.
    ///
    /// With `one_server == None` nothing changes unless all locations name
    /// the same server.
    pub fn replace_servers(&self, trace: &str, one_server: Option<u32>) -> String {
        if one_server.is_none() {
            let servers: BTreeSet<&str> = self
                .location
                .captures_iter(trace)
                .filter_map(|c| c.get(2).map(|m| m.as_str()))
                .collect();
            if servers.len() > 1 {
                debug!("several servers in trace, keeping locations: {:?}", servers);
                return trace.to_string();
            }
        }
        let mut out = String::new();
        if !trace.contains(INDEX_SERVER_HEADER) {
            let _ = writeln!(out, "{}:", INDEX_SERVER_HEADER);
            let _ = writeln!(out, "indexServer = {}\n", INDEX_SERVER_EXPR);
        }
        let replaced = self
            .location
            .replace_all(trace, |caps: &Captures| format!("{}(*indexServer)", &caps[1]));
        out.push_str(&replaced);
        out
    }

    fn print_suffix(
        &self,
        trace: &str,
        single_operation: bool,
        capture: Option<&Path>,
        captured: &mut Vec<PathBuf>,
    ) -> Result<Option<String>> {
        let lines: Vec<&str> = trace.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let Some(last) = lines.last() else {
            return Ok(None);
        };
        if single_operation {
            return match self.grammar.execute_pop.captures(last) {
                Some(call) => self.operation_suffix(&lines, &call).map(Some),
                None => Ok(None),
            };
        }
        self.plan_suffix(&lines, capture, captured).map(Some)
    }

    /// `outN = ex.getValue(c)` plus print/capture for every connector
    /// requested right before the final `ex.calculate()`.
    fn plan_suffix(
        &self,
        lines: &[&str],
        capture: Option<&Path>,
        captured: &mut Vec<PathBuf>,
    ) -> Result<String> {
        let mut requested = Vec::new();
        let mut end = lines.len().saturating_sub(1);
        while end > 0 {
            match self.grammar.request_output.captures(lines[end - 1]) {
                Some(caps) => requested.push(caps[1].to_string()),
                None => break,
            }
            end -= 1;
        }
        requested.reverse();

        let mut classes: BTreeMap<&str, DataClass> = BTreeMap::new();
        for line in &lines[..end] {
            if classes.len() == requested.len() {
                break;
            }
            let Some(caps) = self.grammar.connector.captures(line) else {
                continue;
            };
            let Some(slot) = requested.iter().find(|s| **s == caps[1]) else {
                continue;
            };
            let class = caps
                .get(3)
                .or_else(|| caps.get(5))
                .map(|m| DataClass::Name(m.as_str().to_string()))
                .or_else(|| caps.get(2)?.as_str().parse().ok().map(DataClass::Id));
            if let Some(class) = class {
                classes.insert(slot.as_str(), class);
            }
        }
        debug!("suffix for {:?}, classes {:?}", requested, classes);

        let mut out = String::new();
        for (i, slot) in requested.iter().enumerate() {
            let variable = format!("out{}", i);
            let _ = writeln!(out, "{} = ex.getValue({})", variable, slot);
            self.value_output(&mut out, &variable, slot, classes.get(slot.as_str()), capture, captured)?;
        }
        out.push('\n');
        Ok(out)
    }

    /// Return code check and print of every output of an `executePop` call.
    fn operation_suffix(&self, lines: &[&str], call: &Captures) -> Result<String> {
        let mut out = String::new();
        if call.get(1).is_some() {
            out.push_str("if rc != 0:\n    raise fuzzypy.error, fuzzypy.ApiError(rc)\n");
        }
        if let Some(outputs) = call.get(3) {
            let mut classes: BTreeMap<String, DataClass> = BTreeMap::new();
            for line in lines[..lines.len() - 1].iter().rev() {
                match self.grammar.assign_variable.captures(line) {
                    Some(caps) if caps[1].starts_with("out") => {
                        // Bare names are classes the script defines itself.
                        let class = match &caps[2] {
                            "executorPy.BwResult" => "BwResult".to_string(),
                            "BwResult" => "__main__.BwResult".to_string(),
                            other => other.to_string(),
                        };
                        classes.insert(caps[1].to_string(), DataClass::Name(class));
                    }
                    _ => break,
                }
            }
            for variable in split_list(outputs.as_str()) {
                self.value_output(&mut out, &variable, &variable, classes.get(&variable), None, &mut Vec::new())?;
            }
        }
        out.push('\n');
        Ok(out)
    }

    /// Print `name`, or with `capture` dump it to `<capture>_<label>.py|.bin`.
    fn value_output(
        &self,
        out: &mut String,
        name: &str,
        label: &str,
        class: Option<&DataClass>,
        capture: Option<&Path>,
        captured: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let Some(base) = capture else {
            let is_result = match class {
                Some(DataClass::Name(n)) => n == "BwResult",
                Some(DataClass::Id(id)) => *id == RESULT_CLASS_ID,
                None => false,
            };
            if is_result {
                let _ = writeln!(out, "fuzzypy.writeResult({}.getOlapResult())", name);
            } else {
                let _ = writeln!(out, "print {}.pythonTrace({})", name, py_quote(label));
            }
            return Ok(());
        };

        let class_name = match class {
            Some(DataClass::Name(n)) => Some(n.clone()),
            Some(DataClass::Id(id)) => self.config.class_ids.get(id).cloned(),
            None => None,
        };
        let Some(repr) = self.config.representation_for(class_name.as_deref()) else {
            return Err(PlanError::UnresolvableType {
                slot: label.to_string(),
                class: match (class_name, class) {
                    (Some(n), _) => n,
                    (None, Some(DataClass::Id(id))) => id.to_string(),
                    _ => "unknown".to_string(),
                },
            }
            .into());
        };
        let suffix = format!("_{}", label);
        match repr {
            DataRepresentation::Python => {
                let file = add_to_filename(base, &suffix, Some(".py"));
                let _ = writeln!(out, "f = open({}, 'w')", py_quote(&file.to_string_lossy()));
                let _ = writeln!(out, "f.write({}.pythonTrace('inputValue'))", name);
                out.push_str("f.close()\n");
                captured.push(file);
            }
            DataRepresentation::Binary => {
                let file = add_to_filename(base, &suffix, Some(".bin"));
                let _ = writeln!(out, "f = open({}, 'wb')", py_quote(&file.to_string_lossy()));
                let _ = writeln!(out, "cPickle.dump({}, f, 2)", name);
                out.push_str("f.close()\n");
                captured.push(file);
            }
        }
        Ok(())
    }
}

/// `test.py` + `_x` -> `test_x.py`; `test` + `_x` -> `test_x`. With `ext`,
/// the extension is replaced.
pub fn add_to_filename(path: &Path, suffix: &str, ext: Option<&str>) -> PathBuf {
    let name = path.to_string_lossy();
    let stem_end = name
        .rfind('.')
        .filter(|&dot| {
            dot > 0 && {
                let tail = &name[dot + 1..];
                !tail.is_empty() && tail.chars().all(|c| c.is_ascii_alphabetic())
            }
        })
        .unwrap_or(name.len());
    let ext = ext.unwrap_or(&name[stem_end..]);
    PathBuf::from(format!("{}{}{}", &name[..stem_end], suffix, ext))
}
