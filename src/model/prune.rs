//! Reachability pruning and requested-output editing.

use crate::model::{Criterion, Plan};

use log::debug;
use std::collections::BTreeSet;

impl Plan {
    /// Keep only the operations matched by `criteria` plus everything they
    /// (transitively) consume.
    ///
    /// When outputs are already requested, their producers are kept as well;
    /// otherwise the outputs of the matched operations become the requested
    /// outputs. Global inputs no remaining operation consumes are dropped.
    pub fn keep_only(&mut self, criteria: &[Criterion]) {
        let mut required: BTreeSet<usize> = self.select_operations(criteria).into_iter().collect();

        if !self.global_outputs.is_empty() {
            for (i, op) in self.operations.iter().enumerate() {
                if op.outputs.iter().any(|c| self.global_outputs.contains(c)) {
                    required.insert(i);
                }
            }
        } else {
            let seeded: Vec<String> = required
                .iter()
                .flat_map(|&i| self.operations[i].outputs.iter().cloned())
                .collect();
            for slot in seeded {
                self.request_output(&slot);
            }
        }

        let used = self.close_backwards(&mut required);
        self.drop_operations_except(&required);
        self.drop_unused_inputs(&used);
    }

    /// Replace the requested outputs with `slots` and prune to what they need.
    pub fn retarget(&mut self, slots: &[String]) {
        self.global_outputs.clear();
        for slot in slots {
            self.request_output(slot);
        }
        self.prune_to_outputs();
    }

    /// Drop everything the requested outputs do not depend on.
    pub fn prune_to_outputs(&mut self) {
        let producers = self.producer_index();
        let mut required = BTreeSet::new();
        for slot in &self.global_outputs {
            match producers.get(slot) {
                Some(&i) => {
                    required.insert(i);
                }
                None => debug!("requested connector {} has no producer", slot),
            }
        }
        let used = self.close_backwards(&mut required);
        self.drop_operations_except(&required);
        self.drop_unused_inputs(&used);
    }

    /// Add the connectors matched by `criteria` to the requested outputs.
    pub fn add_outputs(&mut self, criteria: &[Criterion]) {
        for slot in self.resolve_slots(criteria) {
            self.request_output(&slot);
        }
    }

    pub fn clear_outputs(&mut self) {
        self.global_outputs.clear();
    }

    /// Detach `slot` from the operation producing it. Returns that
    /// operation's name.
    pub fn sever_producer(&mut self, slot: &str) -> Option<String> {
        let producer = self.producer_index().get(slot).copied()?;
        let op = &mut self.operations[producer];
        op.outputs.retain(|c| c != slot);
        op.changed = true;
        Some(op.name.clone())
    }

    /// Grow `required` with the producers of every input of a required
    /// operation until nothing changes. Returns the connectors consumed along
    /// the way, including the requested outputs.
    fn close_backwards(&self, required: &mut BTreeSet<usize>) -> BTreeSet<String> {
        let producers = self.producer_index();
        let mut used: BTreeSet<String> = self.global_outputs.iter().cloned().collect();
        let mut pending: Vec<usize> = required.iter().copied().collect();

        while let Some(i) = pending.pop() {
            let op = &self.operations[i];
            for slot in &op.inputs {
                used.insert(slot.clone());
                match producers.get(slot) {
                    Some(&p) => {
                        if required.insert(p) {
                            debug!("{} needs {} (via {})", op.name, self.operations[p].name, slot);
                            pending.push(p);
                        }
                    }
                    None => debug!("producer of {} not found", slot),
                }
            }
        }
        used
    }

    fn drop_operations_except(&mut self, required: &BTreeSet<usize>) {
        for i in (0..self.operations.len()).rev() {
            if !required.contains(&i) {
                debug!("removing {}", self.operations[i].name);
                self.operations.remove(i);
            }
        }
    }

    fn drop_unused_inputs(&mut self, used: &BTreeSet<String>) {
        self.global_inputs.retain(|gi| {
            let keep = used.contains(&gi.slot);
            if !keep {
                debug!("removing input value {}", gi.slot);
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{Criterion, GlobalInput, Operation, Plan};
    use pretty_assertions::assert_eq;

    fn op(name: &str, class: &str, inputs: &[&str], outputs: &[&str]) -> Operation {
        let mut op = Operation::new(name, class);
        op.inputs = inputs.iter().map(|s| s.to_string()).collect();
        op.outputs = outputs.iter().map(|s| s.to_string()).collect();
        op
    }

    fn input(slot: &str) -> GlobalInput {
        GlobalInput {
            slot: slot.into(),
            class: Some("BwDocids".into()),
            trace: vec![],
        }
    }

    /// in: c_a, c_x -> pop1 -> c_b -> pop2 -> c_c -> pop4 -> c_e
    ///                         pop3(c_x) -> c_d
    fn chain() -> Plan {
        let mut plan = Plan::default();
        plan.operations.push(op("pop1", "Scan", &["c_a"], &["c_b"]));
        plan.operations.push(op("pop2", "Join", &["c_b"], &["c_c"]));
        plan.operations.push(op("pop3", "Side", &["c_x"], &["c_d"]));
        plan.operations.push(op("pop4", "Final", &["c_c"], &["c_e"]));
        plan.global_inputs.push(input("c_a"));
        plan.global_inputs.push(input("c_x"));
        plan
    }

    fn names(plan: &Plan) -> Vec<&str> {
        plan.operations.iter().map(|op| op.name.as_str()).collect()
    }

    #[test]
    fn keep_only_makes_seed_outputs_the_goal() {
        let mut plan = chain();
        plan.keep_only(&Criterion::parse_all(&["join"]));

        assert_eq!(names(&plan), vec!["pop1", "pop2"]);
        assert_eq!(plan.global_outputs, vec!["c_c"]);
        assert_eq!(plan.global_inputs.len(), 1);
        assert_eq!(plan.global_inputs[0].slot, "c_a");
    }

    #[test]
    fn keep_only_keeps_existing_goals() {
        let mut plan = chain();
        plan.request_output("c_d");
        plan.keep_only(&Criterion::parse_all(&["pop2"]));

        assert_eq!(names(&plan), vec!["pop1", "pop2", "pop3"]);
        assert_eq!(plan.global_outputs, vec!["c_d"]);
        assert_eq!(plan.global_inputs.len(), 2);
    }

    #[test]
    fn keep_only_everything_is_a_noop() {
        let mut plan = chain();
        plan.request_output("c_e");
        plan.request_output("c_d");
        let before = plan.clone();

        plan.keep_only(&Criterion::parse_all(&["pop1", "pop2", "pop3", "pop4"]));
        assert_eq!(plan, before);
    }

    #[test]
    fn empty_selection_without_goals_prunes_everything() {
        let mut plan = chain();
        plan.keep_only(&Criterion::parse_all(&["nosuchthing"]));

        assert!(plan.operations.is_empty());
        assert!(plan.global_inputs.is_empty());
        assert!(plan.global_outputs.is_empty());
    }

    #[test]
    fn remaining_operations_are_exactly_the_reachable_ones() {
        let mut plan = chain();
        plan.keep_only(&Criterion::parse_all(&["c"]));

        // Everything left is an ancestor of a requested output, and pop3/pop4
        // (not ancestors of c_c) are gone.
        let producers = plan.producer_index();
        let mut reachable = std::collections::BTreeSet::new();
        let mut pending: Vec<usize> = plan
            .global_outputs
            .iter()
            .filter_map(|c| producers.get(c).copied())
            .collect();
        while let Some(i) = pending.pop() {
            if reachable.insert(i) {
                for c in &plan.operations[i].inputs {
                    if let Some(&p) = producers.get(c) {
                        pending.push(p);
                    }
                }
            }
        }
        assert_eq!(reachable.len(), plan.operations.len());
        assert_eq!(names(&plan), vec!["pop1", "pop2"]);
    }

    #[test]
    fn retarget_replaces_goals() {
        let mut plan = chain();
        plan.request_output("c_e");
        plan.retarget(&["c_d".to_string()]);

        assert_eq!(names(&plan), vec!["pop3"]);
        assert_eq!(plan.global_outputs, vec!["c_d"]);
        assert_eq!(plan.global_inputs.len(), 1);
        assert_eq!(plan.global_inputs[0].slot, "c_x");
    }

    #[test]
    fn add_outputs_skips_duplicates() {
        let mut plan = chain();
        plan.request_output("c_c");
        plan.add_outputs(&Criterion::parse_all(&["c", "pop4", "d"]));
        assert_eq!(plan.global_outputs, vec!["c_c", "c_d", "c_e"]);

        plan.clear_outputs();
        assert!(plan.global_outputs.is_empty());
    }

    #[test]
    fn sever_producer_detaches_output() {
        let mut plan = chain();
        assert_eq!(plan.sever_producer("c_b").as_deref(), Some("pop1"));
        assert!(plan.operations[0].outputs.is_empty());
        assert!(plan.operations[0].changed);
        assert_eq!(plan.sever_producer("c_a"), None);
    }
}
