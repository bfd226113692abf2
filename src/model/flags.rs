//! `setPopFlags` rewriting.

use crate::model::{Criterion, Plan};

use log::debug;

/// `pop.setPopFlags(` / `pop23.setPopFlags(`.
fn is_flag_line(line: &str) -> bool {
    line.strip_prefix("pop")
        .map(|rest| rest.trim_start_matches(|c: char| c.is_ascii_digit()))
        .is_some_and(|rest| rest.starts_with(".setPopFlags("))
}

impl Plan {
    /// Replace the `setPopFlags` statement of every matched operation.
    ///
    /// The last existing flag line is removed; with `Some(value)` a single
    /// new one is inserted where it was, or first if there was none.
    /// Returns the number of operations touched.
    pub fn set_flag(&mut self, criteria: &[Criterion], value: Option<i64>) -> usize {
        let mut touched = 0;
        for i in self.select_operations(criteria) {
            let op = &mut self.operations[i];
            let existing = op.lines.iter().rposition(|l| is_flag_line(l));
            if let Some(pos) = existing {
                op.lines.remove(pos);
            }
            if let Some(value) = value {
                let at = existing.unwrap_or(0);
                op.lines.insert(at, format!("{}.setPopFlags({})", op.name, value));
            }
            if existing.is_some() || value.is_some() {
                op.changed = true;
                touched += 1;
            }
        }
        touched
    }

    /// Drop every `setPopFlags` statement. Returns the number of lines removed.
    pub fn remove_all_flags(&mut self) -> usize {
        let mut removed = 0;
        for op in &mut self.operations {
            let before = op.lines.len();
            op.lines.retain(|l| !is_flag_line(l));
            if op.lines.len() != before {
                op.changed = true;
                removed += before - op.lines.len();
            }
        }
        debug!("removed {} setPopFlags lines", removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operation;
    use pretty_assertions::assert_eq;

    fn plan() -> Plan {
        let mut plan = Plan::default();
        let mut a = Operation::new("pop1", "BwPopJoin13");
        a.lines = vec![
            "pop1.setName('join')".into(),
            "pop1.setPopFlags(4)".into(),
            "pop1.setThreads(2)".into(),
        ];
        let mut b = Operation::new("pop2", "BwPopDimFn");
        b.lines = vec!["pop2.setName('dim')".into()];
        plan.operations.push(a);
        plan.operations.push(b);
        plan
    }

    #[test]
    fn flag_line_detection() {
        assert!(is_flag_line("pop12.setPopFlags(3)"));
        assert!(is_flag_line("pop.setPopFlags(3)"));
        assert!(!is_flag_line("pop12.setPopFlagsX"));
        assert!(!is_flag_line("x = pop12.setPopFlags(3)"));
    }

    #[test]
    fn set_flag_replaces_in_place() {
        let mut plan = plan();
        assert_eq!(plan.set_flag(&Criterion::parse_all(&["join"]), Some(16)), 1);
        assert_eq!(
            plan.operations[0].lines,
            vec!["pop1.setName('join')", "pop1.setPopFlags(16)", "pop1.setThreads(2)"]
        );
        assert!(plan.operations[0].changed);
        assert!(!plan.operations[1].changed);
    }

    #[test]
    fn set_flag_inserts_first_when_missing() {
        let mut plan = plan();
        plan.set_flag(&Criterion::parse_all(&["pop2"]), Some(1));
        assert_eq!(
            plan.operations[1].lines,
            vec!["pop2.setPopFlags(1)", "pop2.setName('dim')"]
        );
    }

    #[test]
    fn set_flag_is_idempotent() {
        let mut once = plan();
        once.set_flag(&Criterion::parse_all(&["pop1", "pop2"]), Some(8));
        let mut twice = once.clone();
        twice.set_flag(&Criterion::parse_all(&["pop1", "pop2"]), Some(8));
        assert_eq!(once, twice);
    }

    #[test]
    fn set_flag_none_only_removes() {
        let mut plan = plan();
        assert_eq!(plan.set_flag(&Criterion::parse_all(&["pop1", "pop2"]), None), 1);
        assert_eq!(
            plan.operations[0].lines,
            vec!["pop1.setName('join')", "pop1.setThreads(2)"]
        );
        assert_eq!(plan.operations[1].lines, vec!["pop2.setName('dim')"]);
    }

    #[test]
    fn remove_all_flags_counts_lines() {
        let mut plan = plan();
        plan.operations[1].lines.push("pop2.setPopFlags(1)".into());
        assert_eq!(plan.remove_all_flags(), 2);
        assert_eq!(plan.remove_all_flags(), 0);
    }
}
