//! Cross-location connection counting.
//!
//! Every connector consumed on a location other than the one producing it
//! needs a network connection between the two servers. The count is a
//! capacity-planning diagnostic; the plan is not modified.

use crate::model::Plan;

use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One connector crossing locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Crossing {
    pub slot: String,
    pub sender: String,
    pub receiver: String,
    /// Class of the producing operation, `plan` for global inputs.
    pub producer_class: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    /// Connections per location (each crossing counts for both ends).
    pub per_location: BTreeMap<String, usize>,
    pub total: usize,
    pub crossings: Vec<Crossing>,
    /// Crossings per producer class.
    pub by_class: BTreeMap<String, usize>,
    /// Operations that carried no location tag.
    pub unlocated: Vec<String>,
    /// Consumed connectors nobody produces.
    pub missing_producers: Vec<String>,
}

impl Plan {
    /// Count connectors crossing locations.
    ///
    /// Operations without a location run on the executor location, or on
    /// `fallback` if the plan has none. Global inputs are produced on, and
    /// global outputs consumed on, the executor location when it is known.
    pub fn count_cross_location_edges(&self, fallback: &str) -> ConnectionReport {
        let default_location = self.executor_location.as_deref().unwrap_or(fallback);

        let mut report = ConnectionReport::default();
        let mut consume: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut produce: BTreeMap<&str, (&str, &str)> = BTreeMap::new();

        for op in &self.operations {
            let location = match &op.location {
                Some(loc) => loc.as_str(),
                None => {
                    report.unlocated.push(op.name.clone());
                    default_location
                }
            };
            report.per_location.entry(location.to_string()).or_insert(0);
            consume
                .entry(location.to_string())
                .or_default()
                .extend(op.inputs.iter().cloned());
            for slot in &op.outputs {
                produce.insert(slot.as_str(), (location, op.class.as_str()));
            }
        }
        if !report.unlocated.is_empty() {
            warn!(
                "operations without location (assuming {}): {}",
                default_location,
                report.unlocated.join(", ")
            );
        }

        if let Some(executor) = self.executor_location.as_deref() {
            for gi in &self.global_inputs {
                produce.insert(gi.slot.as_str(), (executor, "plan"));
            }
            report.per_location.entry(executor.to_string()).or_insert(0);
            consume
                .entry(executor.to_string())
                .or_default()
                .extend(self.global_outputs.iter().cloned());
        }

        for (receiver, slots) in &consume {
            for slot in slots {
                let Some(&(sender, class)) = produce.get(slot.as_str()) else {
                    warn!("no producer for {}", slot);
                    report.missing_producers.push(slot.clone());
                    continue;
                };
                if sender != receiver.as_str() {
                    report.crossings.push(Crossing {
                        slot: slot.clone(),
                        sender: sender.to_string(),
                        receiver: receiver.clone(),
                        producer_class: class.to_string(),
                    });
                }
            }
        }

        for crossing in &report.crossings {
            *report.per_location.entry(crossing.sender.clone()).or_insert(0) += 1;
            *report.per_location.entry(crossing.receiver.clone()).or_insert(0) += 1;
            *report
                .by_class
                .entry(crossing.producer_class.clone())
                .or_insert(0) += 1;
        }
        report.total = report.crossings.len();
        report
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{GlobalInput, Operation, Plan};
    use pretty_assertions::assert_eq;

    fn op(name: &str, loc: Option<&str>, inputs: &[&str], outputs: &[&str]) -> Operation {
        let mut op = Operation::new(name, "BwPopJoin13");
        op.inputs = inputs.iter().map(|s| s.to_string()).collect();
        op.outputs = outputs.iter().map(|s| s.to_string()).collect();
        op.location = loc.map(str::to_string);
        op
    }

    #[test]
    fn counts_both_ends_of_each_crossing() {
        let mut plan = Plan::default();
        plan.executor_location = Some("hostA:30003".into());
        plan.operations.push(op("pop1", Some("hostA:30003"), &["c_a"], &["c_b"]));
        plan.operations.push(op("pop2", Some("hostB:30003"), &["c_b"], &["c_c"]));
        plan.operations.push(op("pop3", Some("hostB:30003"), &["c_c", "c_b"], &["c_d"]));
        plan.global_inputs.push(GlobalInput {
            slot: "c_a".into(),
            class: None,
            trace: vec![],
        });
        plan.global_outputs.push("c_d".into());

        let report = plan.count_cross_location_edges("localhost:30003");

        // c_b A->B (consumed twice on B, counted once), c_d B->A.
        assert_eq!(report.total, 2);
        assert_eq!(report.per_location["hostA:30003"], 2);
        assert_eq!(report.per_location["hostB:30003"], 2);
        assert_eq!(report.by_class["BwPopJoin13"], 2);
        assert!(report.unlocated.is_empty());
        assert!(report.missing_producers.is_empty());
    }

    #[test]
    fn unlocated_operations_use_fallback() {
        let mut plan = Plan::default();
        plan.operations.push(op("pop1", None, &[], &["c_a"]));
        plan.operations.push(op("pop2", Some("hostB:30003"), &["c_a", "c_z"], &[]));

        let report = plan.count_cross_location_edges("localhost:30003");

        assert_eq!(report.total, 1);
        assert_eq!(report.crossings[0].sender, "localhost:30003");
        assert_eq!(report.unlocated, vec!["pop1"]);
        assert_eq!(report.missing_producers, vec!["c_z"]);
    }
}
