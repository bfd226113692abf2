//! Per-session operation statistics for `list --classify`.

use crate::trace::Grammar;

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    /// Distinct operation classes, sorted.
    pub classes: Vec<String>,
    pub operations: usize,
    pub lines: usize,
}

/// Count the operations and lines of one session's text.
pub fn summarize(text: &str, grammar: &Grammar) -> SessionSummary {
    let mut classes = BTreeSet::new();
    let mut operations = 0;
    let mut lines = 0;
    for line in text.split('\n') {
        lines += 1;
        if let Some(caps) = grammar.begin_operation.captures(line.trim()) {
            classes.insert(caps[1].to_string());
            operations += 1;
        }
    }
    SessionSummary {
        classes: classes.into_iter().collect(),
        operations,
        lines,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Olap,
    Join,
    Ptime,
    Kalk,
    Mixed,
    Unknown,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanKind::Olap => "olap",
            PlanKind::Join => "join",
            PlanKind::Ptime => "ptime",
            PlanKind::Kalk => "kalk",
            PlanKind::Mixed => "mixed",
            PlanKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

fn kind_of(class: &str) -> Option<PlanKind> {
    match class {
        "BwPopJoin1Inwards" | "BwPopJoin13" | "BwPopAggregateParallel" | "BwPopJoin3Inwards" => {
            Some(PlanKind::Olap)
        }
        "JECreateNTuple" | "JERequestedAttributes" | "JECaptureIndex" | "JEAssembleResults"
        | "JEEvalPrecond" => Some(PlanKind::Join),
        "RowPlanOperator" => Some(PlanKind::Ptime),
        c if c.starts_with("ce") && c.ends_with("Pop") => Some(PlanKind::Kalk),
        _ => None,
    }
}

/// One kind if all recognized classes agree, `Mixed` if they don't.
pub fn classify<S: AsRef<str>>(classes: &[S]) -> PlanKind {
    let kinds: BTreeSet<PlanKind> = classes.iter().filter_map(|c| kind_of(c.as_ref())).collect();
    let mut iter = kinds.into_iter();
    match (iter.next(), iter.next()) {
        (Some(kind), None) => kind,
        (Some(_), Some(_)) => PlanKind::Mixed,
        (None, _) => PlanKind::Unknown,
    }
}
