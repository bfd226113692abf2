//! Selection criteria shared by every plan-editing command.
//!
//! A token names an operation (`pop23`, `23`), a connector (`c_k`, `k`,
//! `a27`) or is a free-text substring matched against operation and
//! connector classes.

use crate::model::{Plan, sort_slots};

use log::debug;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Criterion {
    /// Normalized to `pop<N>`.
    Operation(String),
    /// Normalized to `c_<name>`.
    Slot(String),
    /// Lower-cased substring.
    Text(String),
}

impl Criterion {
    pub fn parse(token: &str) -> Self {
        let token = token.trim().to_lowercase();

        let bare = token.strip_prefix("c_").unwrap_or(&token);
        if is_connector_suffix(bare) {
            return Criterion::Slot(format!("c_{}", bare));
        }

        let digits = token.strip_prefix("pop").unwrap_or(&token);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = digits.parse::<u64>() {
                return Criterion::Operation(format!("pop{}", id));
            }
        }

        Criterion::Text(token)
    }

    pub fn parse_all<S: AsRef<str>>(tokens: &[S]) -> Vec<Criterion> {
        tokens.iter().map(|t| Criterion::parse(t.as_ref())).collect()
    }
}

/// `k` or `a27`: a single letter, or `a` followed by a number.
fn is_connector_suffix(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes {
        [c] => c.is_ascii_lowercase(),
        [b'a', rest @ ..] => !rest.is_empty() && rest.iter().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

struct Split<'a> {
    operations: BTreeSet<&'a str>,
    slots: BTreeSet<&'a str>,
    texts: Vec<&'a str>,
}

fn split(criteria: &[Criterion]) -> Split<'_> {
    let mut out = Split {
        operations: BTreeSet::new(),
        slots: BTreeSet::new(),
        texts: Vec::new(),
    };
    for c in criteria {
        match c {
            Criterion::Operation(name) => {
                out.operations.insert(name.as_str());
            }
            Criterion::Slot(name) => {
                out.slots.insert(name.as_str());
            }
            Criterion::Text(text) => {
                if !out.texts.contains(&text.as_str()) {
                    out.texts.push(text.as_str());
                }
            }
        }
    }
    out
}

impl Plan {
    /// Indexes of the operations matched by `criteria`.
    ///
    /// Operation names first, then connectors produced by the operation, then
    /// substrings of the operation class. Substrings that matched no class are
    /// tried once more against the declared classes of each operation's
    /// outputs.
    pub fn select_operations(&self, criteria: &[Criterion]) -> Vec<usize> {
        let Split {
            operations,
            slots,
            texts,
        } = split(criteria);

        let mut indexes = Vec::new();
        let mut matched_texts = BTreeSet::new();
        for (i, op) in self.operations.iter().enumerate() {
            let mut found = operations.contains(op.name.as_str());
            if !found && !slots.is_empty() {
                found = op.outputs.iter().any(|c| slots.contains(c.as_str()));
            }
            if !found && !texts.is_empty() {
                let class = op.class.to_lowercase();
                for text in &texts {
                    if class.contains(*text) {
                        matched_texts.insert(*text);
                        found = true;
                    }
                }
            }
            if found {
                indexes.push(i);
            }
        }

        let leftover: Vec<&str> = texts
            .iter()
            .copied()
            .filter(|t| !matched_texts.contains(t))
            .collect();
        if !leftover.is_empty() {
            for (i, op) in self.operations.iter().enumerate() {
                let found = op.outputs.iter().any(|c| {
                    let class = self.slot_class(c).unwrap_or_default().to_lowercase();
                    leftover.iter().any(|t| class.contains(*t))
                });
                if found && !indexes.contains(&i) {
                    indexes.push(i);
                }
            }
        }

        debug!(
            "selected operations: {}",
            indexes
                .iter()
                .map(|&i| self.operations[i].name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        indexes
    }

    /// Connector names matched by `criteria`, sorted.
    ///
    /// Operations contribute their outputs. Substrings match declared
    /// connector classes first; those that matched none are tried against
    /// operation classes, contributing the outputs of matching operations.
    pub fn resolve_slots(&self, criteria: &[Criterion]) -> Vec<String> {
        let Split {
            operations,
            slots,
            texts,
        } = split(criteria);

        let mut found: BTreeSet<String> = slots.iter().map(|s| s.to_string()).collect();

        for op in &self.operations {
            if operations.contains(op.name.as_str()) {
                found.extend(op.outputs.iter().cloned());
            }
        }

        let mut leftover = texts;
        if !leftover.is_empty() {
            let mut matched = BTreeSet::new();
            for slot in self.operation_slots() {
                let class = self.slot_class(&slot).unwrap_or_default().to_lowercase();
                if let Some(text) = leftover.iter().find(|t| class.contains(**t)) {
                    matched.insert(*text);
                    found.insert(slot);
                }
            }
            leftover.retain(|t| !matched.contains(t));
        }
        if !leftover.is_empty() {
            for op in &self.operations {
                let class = op.class.to_lowercase();
                if leftover.iter().any(|t| class.contains(*t)) {
                    found.extend(op.outputs.iter().cloned());
                }
            }
        }

        sort_slots(found.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operation;
    use pretty_assertions::assert_eq;

    fn op(name: &str, class: &str, inputs: &[&str], outputs: &[&str]) -> Operation {
        let mut op = Operation::new(name, class);
        op.inputs = inputs.iter().map(|s| s.to_string()).collect();
        op.outputs = outputs.iter().map(|s| s.to_string()).collect();
        op
    }

    fn sample() -> Plan {
        let mut plan = Plan::default();
        plan.operations.push(op("pop1", "BwPopDimFn", &["c_a"], &["c_b"]));
        plan.operations.push(op("pop2", "BwPopJoin13", &["c_b"], &["c_c", "c_d"]));
        plan.operations.push(op("pop3", "BwPopAggregateParallel", &["c_c"], &["c_a28"]));
        plan.slot_classes.insert("c_b".into(), "BwDimFn".into());
        plan.slot_classes.insert("c_c".into(), "BwDocids".into());
        plan.slot_classes.insert("c_d".into(), "BwResult".into());
        plan.slot_classes.insert("c_a28".into(), "BwResult".into());
        plan
    }

    #[test]
    fn tokens_are_classified_once() {
        assert_eq!(Criterion::parse("pop23"), Criterion::Operation("pop23".into()));
        assert_eq!(Criterion::parse("023"), Criterion::Operation("pop23".into()));
        assert_eq!(Criterion::parse("C_K"), Criterion::Slot("c_k".into()));
        assert_eq!(Criterion::parse("k"), Criterion::Slot("c_k".into()));
        assert_eq!(Criterion::parse("a27"), Criterion::Slot("c_a27".into()));
        assert_eq!(Criterion::parse("DimFn"), Criterion::Text("dimfn".into()));
        assert_eq!(Criterion::parse("ab"), Criterion::Text("ab".into()));
    }

    #[test]
    fn select_by_name_slot_and_class() {
        let plan = sample();
        assert_eq!(plan.select_operations(&Criterion::parse_all(&["pop2"])), vec![1]);
        assert_eq!(plan.select_operations(&Criterion::parse_all(&["d"])), vec![1]);
        assert_eq!(plan.select_operations(&Criterion::parse_all(&["aggregate"])), vec![2]);
        assert_eq!(
            plan.select_operations(&Criterion::parse_all(&["pop1", "a28"])),
            vec![0, 2]
        );
    }

    #[test]
    fn unmatched_text_falls_back_to_slot_classes() {
        let plan = sample();
        // "docids" names no operation class, only the class of c_c.
        assert_eq!(plan.select_operations(&Criterion::parse_all(&["docids"])), vec![1]);
        // "result" is declared on outputs of pop2 and pop3.
        assert_eq!(plan.select_operations(&Criterion::parse_all(&["result"])), vec![1, 2]);
        assert!(plan.select_operations(&Criterion::parse_all(&["nothing"])).is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let plan = sample();
        let criteria = Criterion::parse_all(&["join", "pop3", "docids"]);
        let first = plan.select_operations(&criteria);
        for _ in 0..5 {
            assert_eq!(plan.select_operations(&criteria), first);
        }
    }

    #[test]
    fn resolve_slots_prefers_connector_classes() {
        let plan = sample();
        assert_eq!(
            plan.resolve_slots(&Criterion::parse_all(&["result"])),
            vec!["c_d", "c_a28"]
        );
        assert_eq!(
            plan.resolve_slots(&Criterion::parse_all(&["join13"])),
            vec!["c_c", "c_d"]
        );
        assert_eq!(
            plan.resolve_slots(&Criterion::parse_all(&["pop1", "x"])),
            vec!["c_b", "c_x"]
        );
    }
}
