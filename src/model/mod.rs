//! In-memory plan graph recovered from a trace session.
//!
//! Operations live in an arena (`Plan::operations`) addressed by position;
//! producer/consumer edges are derived on demand from the slot names listed
//! as inputs and outputs, so pruning never leaves dangling references.

pub mod connections;
pub mod flags;
pub mod prune;
pub mod select;

pub use connections::{ConnectionReport, Crossing};
pub use select::Criterion;

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One plan operation ("pop").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Operation {
    /// `pop<id>`, unique within the plan.
    pub name: String,
    pub class: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    /// Statements recorded between construction and `plan.append(pop)`,
    /// with the `pop.` receiver renamed to `name`.
    pub lines: Vec<String>,
    pub location: Option<String>,
    /// Set when a transformation rewrote this operation.
    pub changed: bool,
}

impl Operation {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            lines: Vec::new(),
            location: None,
            changed: false,
        }
    }
}

/// A value bound to a slot from outside the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalInput {
    pub slot: String,
    pub class: Option<String>,
    /// Statements that build the value after `inputValue = Class()`.
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// `# tracing ...` / `# id ...` header lines, replayed verbatim.
    pub prefix: Vec<String>,
    /// `host:port` of `ex.setExecutorLocation`, if recorded.
    pub executor_location: Option<String>,
    pub operations: Vec<Operation>,
    pub global_inputs: Vec<GlobalInput>,
    pub global_outputs: Vec<String>,
    /// Declared data class per slot.
    pub slot_classes: BTreeMap<String, String>,
    /// Numeric data class ids no catalog could name, replayed as ids.
    pub slot_class_ids: BTreeMap<String, u32>,
    /// Extra `PlanConnector` arguments after the class, replayed verbatim.
    pub slot_arguments: BTreeMap<String, String>,
}

/// Saved operations and boundary lists; see [`Plan::snapshot`].
#[derive(Debug, Clone)]
pub struct PlanSnapshot {
    operations: Vec<Operation>,
    global_inputs: Vec<GlobalInput>,
    global_outputs: Vec<String>,
}

impl Plan {
    /// No operations and nothing crossing the plan boundary.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.global_inputs.is_empty() && self.global_outputs.is_empty()
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.name == name)
    }

    /// Slot name -> index of the operation producing it.
    ///
    /// Recomputed on every call; indexes are only valid until the next
    /// mutation of `operations`.
    pub fn producer_index(&self) -> BTreeMap<String, usize> {
        let mut producers = BTreeMap::new();
        for (i, op) in self.operations.iter().enumerate() {
            for slot in &op.outputs {
                producers.insert(slot.clone(), i);
            }
        }
        producers
    }

    /// Operation name -> location, for operations carrying a location tag.
    pub fn locations(&self) -> BTreeMap<String, String> {
        self.operations
            .iter()
            .filter_map(|op| op.location.clone().map(|loc| (op.name.clone(), loc)))
            .collect()
    }

    /// Slots referenced by any operation, in declaration order.
    pub fn operation_slots(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        for op in &self.operations {
            set.extend(op.inputs.iter().cloned());
            set.extend(op.outputs.iter().cloned());
        }
        sort_slots(set.into_iter().collect())
    }

    /// Operation slots plus boundary slots; every name a serialized plan
    /// must declare.
    pub fn used_slots(&self) -> Vec<String> {
        let mut set: BTreeSet<String> = self.operation_slots().into_iter().collect();
        set.extend(self.global_inputs.iter().map(|gi| gi.slot.clone()));
        set.extend(self.global_outputs.iter().cloned());
        sort_slots(set.into_iter().collect())
    }

    pub fn is_global_input(&self, slot: &str) -> bool {
        self.global_inputs.iter().any(|gi| gi.slot == slot)
    }

    /// Append `slot` to the requested outputs unless already present.
    pub fn request_output(&mut self, slot: &str) {
        if !self.global_outputs.iter().any(|s| s == slot) {
            self.global_outputs.push(slot.to_string());
        }
    }

    pub fn slot_class(&self, slot: &str) -> Option<&str> {
        self.slot_classes.get(slot).map(String::as_str)
    }

    pub fn snapshot(&self) -> PlanSnapshot {
        PlanSnapshot {
            operations: self.operations.clone(),
            global_inputs: self.global_inputs.clone(),
            global_outputs: self.global_outputs.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: PlanSnapshot) {
        self.operations = snapshot.operations;
        self.global_inputs = snapshot.global_inputs;
        self.global_outputs = snapshot.global_outputs;
    }
}

/// Connector names as the tracer generates them (`c_a`..`c_z`, then
/// `c_a27`, `c_a28`, ...): short names alphabetically, then the numbered ones
/// by number. Anything else sorts alphabetically among the short names.
pub fn sort_slots(mut slots: Vec<String>) -> Vec<String> {
    slots.sort_by(|a, b| slot_sort_key(a).cmp(&slot_sort_key(b)));
    slots.dedup();
    slots
}

fn slot_sort_key(slot: &str) -> (u8, u64, &str) {
    match slot.strip_prefix("c_a").and_then(|n| n.parse::<u64>().ok()) {
        Some(n) => (1, n, slot),
        None => (0, 0, slot),
    }
}

/// `c_k` -> `k`; other names unchanged.
pub fn short_slot(slot: &str) -> &str {
    match slot.strip_prefix("c_") {
        Some(rest) if rest.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) => rest,
        _ => slot,
    }
}
