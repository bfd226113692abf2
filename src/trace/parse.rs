use crate::Result;
use crate::model::{GlobalInput, Operation, Plan};
use crate::runtime::ClassCatalog;
use crate::trace::grammar::{EXECUTE_POP_MARKER, Grammar, split_list};
use crate::trace::pop_as_plan::convert_pop_to_plan;

use log::{debug, trace, warn};
use std::collections::BTreeSet;

/// What the parser is in the middle of.
enum Construct {
    Idle,
    /// Between `pop = ...` and `plan.append(pop)`.
    Building(Operation),
    /// After `inputValue = Class()`, until `ex.setInput(c, inputValue)`.
    /// `pending` is the operation that was open when the capture started.
    Capturing {
        class: Option<String>,
        trace: Vec<String>,
        pending: Option<Operation>,
    },
}

/// Normalize `\r\n` and bare `\r` to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Parse one recorded session into a plan.
///
/// Unknown lines never fail the parse: inside an operation they are kept as
/// operation statements, inside an input value capture they become part of
/// the value's trace, anywhere else they are dropped.
pub fn parse_session(text: &str, catalog: &dyn ClassCatalog) -> Result<Plan> {
    let grammar = Grammar::new()?;
    let text = normalize_newlines(text);
    let text = if text.starts_with(EXECUTE_POP_MARKER) {
        convert_pop_to_plan(&text, &grammar).unwrap_or(text)
    } else {
        text
    };

    let taken: BTreeSet<u64> = text
        .lines()
        .filter_map(|line| grammar.begin_operation.captures(line.trim()))
        .filter_map(|caps| caps.get(2)?.as_str().parse().ok())
        .collect();

    let mut parser = Parser {
        grammar: &grammar,
        catalog,
        plan: Plan::default(),
        state: Construct::Idle,
        begun: 0,
        taken,
    };
    for line in text.lines() {
        parser.line(line.trim());
    }
    Ok(parser.finish())
}

struct Parser<'a> {
    grammar: &'a Grammar,
    catalog: &'a dyn ClassCatalog,
    plan: Plan,
    state: Construct,
    /// Operations started so far.
    begun: usize,
    /// Operation ids in use: every `# popN` of the session plus the ordinals
    /// handed out to operations traced without one.
    taken: BTreeSet<u64>,
}

impl Parser<'_> {
    fn line(&mut self, line: &str) {
        let g = self.grammar;

        if line.starts_with("# tracing ") || line.starts_with("# id ") {
            self.plan.prefix.push(line.to_string());
            return;
        }

        if let Some(caps) = g.executor_location.captures(line) {
            self.plan.executor_location = Some(format!("{}:{}", &caps[1], &caps[2]));
            return;
        }

        if let Some(caps) = g.begin_operation.captures(line) {
            let name = match caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok()) {
                Some(id) => format!("pop{}", id),
                None => self.ordinal_name(),
            };
            self.begun += 1;
            match std::mem::replace(&mut self.state, Construct::Idle) {
                Construct::Building(open) => {
                    warn!("{} never appended to the plan, dropping it", open.name)
                }
                Construct::Capturing { class, pending, .. } => {
                    if let Some(open) = pending {
                        warn!("{} never appended to the plan, dropping it", open.name);
                    }
                    warn!("input value {:?} never bound, dropping it", class)
                }
                Construct::Idle => {}
            }
            self.state = Construct::Building(Operation::new(name, &caps[1]));
            return;
        }

        if g.end_operation.is_match(line) {
            match std::mem::replace(&mut self.state, Construct::Idle) {
                Construct::Building(op) => self.append(op),
                Construct::Capturing {
                    class,
                    trace,
                    pending: Some(op),
                } => {
                    self.append(op);
                    self.state = Construct::Capturing {
                        class,
                        trace,
                        pending: None,
                    };
                }
                other => {
                    warn!("plan.append(pop) without an operation under construction");
                    self.state = other;
                }
            }
            return;
        }

        if let Some(caps) = g.connector.captures(line) {
            let slot = caps[1].to_string();
            let id = caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok());
            let class = caps
                .get(3)
                .or_else(|| caps.get(5))
                .map(|m| m.as_str().to_string())
                .or_else(|| self.catalog.class_name(id?));
            match (class, id) {
                (Some(class), _) => {
                    self.plan.slot_classes.insert(slot.clone(), class);
                }
                (None, Some(id)) => {
                    debug!("unknown data class id {} for {}", id, slot);
                    self.plan.slot_class_ids.insert(slot.clone(), id);
                }
                (None, None) => {}
            }
            if let Some(args) = caps.get(4) {
                self.plan.slot_arguments.insert(slot, args.as_str().to_string());
            }
            return;
        }

        if let Some(caps) = g.add_input.captures(line) {
            self.with_operation(line, |op| op.inputs.push(caps[1].to_string()));
            return;
        }
        if let Some(caps) = g.set_inputs.captures(line) {
            self.with_operation(line, |op| op.inputs = split_list(&caps[1]));
            return;
        }
        if let Some(caps) = g.add_output.captures(line) {
            self.with_operation(line, |op| op.outputs.push(caps[1].to_string()));
            return;
        }
        if let Some(caps) = g.set_outputs.captures(line) {
            self.with_operation(line, |op| op.outputs = split_list(&caps[1]));
            return;
        }

        if let Some(caps) = g.bind_input.captures(line) {
            let (class, trace) = match std::mem::replace(&mut self.state, Construct::Idle) {
                Construct::Capturing {
                    class,
                    trace,
                    pending,
                } => {
                    if let Some(op) = pending {
                        self.state = Construct::Building(op);
                    }
                    (class, trace)
                }
                other => {
                    self.state = other;
                    (None, Vec::new())
                }
            };
            self.plan.global_inputs.push(GlobalInput {
                slot: caps[1].to_string(),
                class,
                trace,
            });
            return;
        }

        if let Some(caps) = g.request_output.captures(line) {
            self.plan.request_output(&caps[1]);
            return;
        }

        if let Some(caps) = g.construct_input.captures(line) {
            let modules = &caps[1];
            // Pickled values are rebuilt by replaying their load statements.
            if modules != "cPickle." {
                let class = if modules.is_empty() || modules == "executorPy." {
                    caps[2].to_string()
                } else {
                    format!("{}{}", modules, &caps[2])
                };
                let pending = match std::mem::replace(&mut self.state, Construct::Idle) {
                    Construct::Idle => None,
                    Construct::Building(op) => {
                        debug!("input value constructed inside {}", op.name);
                        Some(op)
                    }
                    Construct::Capturing {
                        class: previous,
                        pending,
                        ..
                    } => {
                        warn!("input value {:?} never bound, dropping it", previous);
                        pending
                    }
                };
                self.state = Construct::Capturing {
                    class: Some(class),
                    trace: Vec::new(),
                    pending,
                };
                return;
            }
        }

        if let Some(caps) = g.operation_location.captures(line) {
            if let Some(op) = self.open_operation() {
                op.location = Some(format!("{}:{}", &caps[1], &caps[2]));
            }
        }

        if line.is_empty() {
            return;
        }
        match &mut self.state {
            Construct::Building(op) => {
                let kept = operation_line(op, line);
                op.lines.push(kept);
            }
            Construct::Capturing {
                pending: Some(op), ..
            } if line.starts_with("pop.") => {
                let kept = operation_line(op, line);
                op.lines.push(kept);
            }
            Construct::Capturing { trace, .. } => trace.push(line.to_string()),
            Construct::Idle => trace!("ignoring {}", line),
        }
    }

    /// `pop<N>` for an operation traced without an id: its position among
    /// the operations, or the next id nothing else uses.
    fn ordinal_name(&mut self) -> String {
        let mut id = self.begun as u64;
        while !self.taken.insert(id) {
            id += 1;
        }
        format!("pop{}", id)
    }

    fn append(&mut self, op: Operation) {
        debug!("{} {} in={:?} out={:?}", op.name, op.class, op.inputs, op.outputs);
        self.plan.operations.push(op);
    }

    fn open_operation(&mut self) -> Option<&mut Operation> {
        match &mut self.state {
            Construct::Building(op)
            | Construct::Capturing {
                pending: Some(op), ..
            } => Some(op),
            _ => None,
        }
    }

    fn with_operation(&mut self, line: &str, edit: impl FnOnce(&mut Operation)) {
        match self.open_operation() {
            Some(op) => edit(op),
            None => warn!("{} outside of an operation", line),
        }
    }

    fn finish(mut self) -> Plan {
        match std::mem::replace(&mut self.state, Construct::Idle) {
            Construct::Building(op) => warn!("{} never appended to the plan", op.name),
            Construct::Capturing { class, pending, .. } => {
                if let Some(op) = pending {
                    warn!("{} never appended to the plan", op.name);
                }
                warn!("input value {:?} never bound", class)
            }
            Construct::Idle => {}
        }
        self.plan
    }
}

/// An operation statement with the `pop.` receiver renamed to the operation.
fn operation_line(op: &Operation, line: &str) -> String {
    match line.strip_prefix("pop.") {
        Some(rest) => format!("{}.{}", op.name, rest),
        None => line.to_string(),
    }
}
