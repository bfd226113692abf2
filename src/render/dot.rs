//! GraphViz `dot` description of a plan.
//!
//! ```text
//! digraph G {
//! pop1 [shape=box,label="BwPopDimFn pop1"]
//! c_a [shape=circle, color=yellow, style=filled, label="BwDocids a"]
//! c_a -> pop1 [label="a"]
//! c_b [shape=ellipse, color=orange, style=filled, label="BwDimFn b"]
//! pop1 -> c_b [label="b"]
//! }
//! ```

use crate::Result;
use crate::error::PlanError;
use crate::model::{Plan, short_slot};

use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

/// How much of the recorded statements goes into node labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceDetail {
    Off,
    Full,
    /// Lines longer than this many characters end in `...`.
    Clipped(usize),
}

impl TraceDetail {
    /// `0` = off, `1..=3` = full, larger values clip lines to that width.
    pub fn from_level(level: usize) -> Self {
        match level {
            0 => TraceDetail::Off,
            1..=3 => TraceDetail::Full,
            width => TraceDetail::Clipped(width),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DotOptions {
    pub trace: TraceDetail,
    /// Escaped label text budget per node; `None` disables truncation.
    pub limit_node_length: Option<usize>,
}

impl Default for DotOptions {
    fn default() -> Self {
        Self {
            trace: TraceDetail::Off,
            limit_node_length: Some(10000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotOutput {
    pub text: String,
    /// Number of node labels cut to the length budget.
    pub truncated: usize,
}

/// Truncations reported one by one before summarizing.
const REPORTED_TRUNCATIONS: usize = 3;

/// Render `plan` as a `dot` graph. Fails on an empty plan.
pub fn render_dot(plan: &Plan, options: &DotOptions) -> Result<DotOutput> {
    if plan.is_empty() {
        return Err(PlanError::EmptyPlan.into());
    }
    let mut writer = DotWriter {
        plan,
        options,
        out: String::new(),
        truncated: 0,
    };
    writer.out.push_str("digraph G {\n");
    writer.operations();
    let producers = producer_names(plan);
    writer.boundary_nodes();
    writer.input_edges(&producers);
    writer.output_edges(&producers);
    writer.out.push_str("}\n");

    if writer.truncated > REPORTED_TRUNCATIONS {
        warn!("{} more lines truncated", writer.truncated - REPORTED_TRUNCATIONS);
    }
    Ok(DotOutput {
        text: writer.out,
        truncated: writer.truncated,
    })
}

fn producer_names(plan: &Plan) -> BTreeMap<&str, &str> {
    let mut producers = BTreeMap::new();
    for op in &plan.operations {
        for slot in &op.outputs {
            producers.insert(slot.as_str(), op.name.as_str());
        }
    }
    producers
}

struct DotWriter<'a> {
    plan: &'a Plan,
    options: &'a DotOptions,
    out: String,
    truncated: usize,
}

impl DotWriter<'_> {
    fn operations(&mut self) {
        for op in &self.plan.operations {
            let emphasis = if op.changed { ", style=bold, color=red" } else { "" };
            if self.options.trace == TraceDetail::Off {
                let _ = writeln!(
                    self.out,
                    "{} [shape=box{},label=\"{} {}\"]",
                    op.name, emphasis, op.class, op.name
                );
                continue;
            }
            let mut lines: Vec<String> = op.lines.iter().map(|l| self.clip(l)).collect();
            // Input order shows on the edges; output order only here.
            if op.outputs.len() > 1 {
                let names: Vec<&str> = op.outputs.iter().map(|c| short_slot(c)).collect();
                lines.push(format!("outputs: {}", names.join(", ")));
            }
            let body = self.quote_trace(&lines);
            let _ = writeln!(
                self.out,
                "{} [shape=record{}, label=\"{} {}\\l{}\"]",
                op.name, emphasis, op.class, op.name, body
            );
        }
    }

    fn boundary_nodes(&mut self) {
        for gi in &self.plan.global_inputs {
            let short = short_slot(&gi.slot);
            if self.options.trace == TraceDetail::Off {
                let _ = writeln!(
                    self.out,
                    "{} [shape=circle, color=yellow, style=filled, label=\"{}\"]",
                    gi.slot,
                    self.slot_and_class(&gi.slot)
                );
                continue;
            }
            let lines: Vec<String> = gi
                .trace
                .iter()
                .map(|l| match l.strip_prefix("inputValue.") {
                    Some(rest) => format!("{}.{}", short, rest),
                    None => l.clone(),
                })
                .map(|l| self.clip(&l))
                .collect();
            let body = self.quote_trace(&lines);
            let head = match &gi.class {
                Some(class) => format!("{} {}", class, short),
                None => short.to_string(),
            };
            let _ = writeln!(
                self.out,
                "{} [shape=ellipse, color=yellow, style=filled, label=\"{}\\l{}\"]",
                gi.slot, head, body
            );
        }
        for slot in &self.plan.global_outputs {
            let _ = writeln!(
                self.out,
                "{} [shape=ellipse, color=orange, style=filled, label=\"{}\"]",
                slot,
                self.slot_and_class(slot)
            );
        }
    }

    fn input_edges(&mut self, producers: &BTreeMap<&str, &str>) {
        let bound: BTreeSet<&str> = self.plan.global_inputs.iter().map(|gi| gi.slot.as_str()).collect();
        for op in &self.plan.operations {
            for (k, slot) in op.inputs.iter().enumerate() {
                // Unproduced slots hang off the node named after themselves.
                let from = producers.get(slot.as_str()).copied().unwrap_or(slot.as_str());
                let mut label = if bound.contains(slot.as_str()) {
                    short_slot(slot).to_string()
                } else {
                    self.slot_and_class(slot)
                };
                if op.inputs.len() > 1 {
                    let _ = write!(label, " (input {})", k);
                }
                let _ = writeln!(self.out, "{} -> {} [label=\"{}\"]", from, op.name, label);
            }
        }
    }

    fn output_edges(&mut self, producers: &BTreeMap<&str, &str>) {
        for slot in &self.plan.global_outputs {
            match producers.get(slot.as_str()) {
                Some(from) => {
                    let _ = writeln!(self.out, "{} -> {} [label=\"{}\"]", from, slot, short_slot(slot));
                }
                None => log::debug!("requested {} has no producer", slot),
            }
        }
    }

    fn slot_and_class(&self, slot: &str) -> String {
        match self.plan.slot_class(slot) {
            Some(class) => format!("{} {}", class, short_slot(slot)),
            None => short_slot(slot).to_string(),
        }
    }

    fn clip(&self, line: &str) -> String {
        match self.options.trace {
            TraceDetail::Clipped(width) if line.chars().count() > width => {
                let mut clipped: String = line.chars().take(width.saturating_sub(3)).collect();
                clipped.push_str("...");
                clipped
            }
            _ => line.to_string(),
        }
    }

    /// Escape `lines` for a record label, each ending in `\l`, and cut the
    /// result to the node length budget.
    fn quote_trace(&mut self, lines: &[String]) -> String {
        let mut s = String::new();
        for line in lines {
            s.push_str(&escape_label(line));
            s.push_str("\\l");
        }
        let Some(limit) = self.options.limit_node_length else {
            return s;
        };
        if s.len() <= limit {
            return s;
        }

        self.truncated += 1;
        if self.truncated <= REPORTED_TRUNCATIONS {
            let head: String = s.chars().take(16).collect();
            warn!("oversize line truncated to {}: {:?}", limit, format!("{}...", head));
        }
        loop {
            let Some(pos) = s[..s.len() - 2].rfind("\\l") else {
                s = "...\\l".to_string();
                break;
            };
            if pos > limit.saturating_sub(10) {
                s.truncate(pos + 2);
            } else {
                s.truncate(pos);
                s.push_str("\\l...\\l");
                break;
            }
        }
        s
    }
}

/// Escape one label line for a `dot` record.
pub fn escape_label(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            ' ' | '"' | '{' | '}' | '|' | '<' | '>' => {
                out.push('\\');
                out.push(c);
            }
            '&' => out.push_str("&#38;"),
            '\\' => out.push_str("\\\\\\\\"),
            c => out.push(c),
        }
    }
    out
}
