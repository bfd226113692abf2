//! Executable plan text.
//!
//! The output is itself a valid trace session: parsing it again yields the
//! same plan, so it can be fed back into every other command.

use crate::model::Plan;
use crate::render::{py_quote, qualified_class};

use std::fmt::Write;

/// Serialize `plan` as a script for the host runtime.
pub fn render_python(plan: &Plan) -> String {
    let mut out = String::new();
    for line in &plan.prefix {
        let _ = writeln!(out, "{}", line);
    }

    out.push_str("ex = executorPy.PlanExecutor()\n");
    match plan.executor_location.as_deref().and_then(|l| l.rsplit_once(':')) {
        Some((host, port)) => {
            let _ = writeln!(out, "ex.setExecutorLocation({}, {})", py_quote(host), port);
        }
        None => out.push_str("ex.setExecutorLocation(*indexServer)\n"),
    }
    out.push_str("plan = executorPy.ExecutionPlan()\n");

    for slot in plan.used_slots() {
        let class = match (plan.slot_class(&slot), plan.slot_class_ids.get(&slot)) {
            (Some(class), _) => Some(format!("executorPy.dataClassIds[{}]", py_quote(class))),
            (None, Some(id)) => Some(id.to_string()),
            (None, None) => None,
        };
        let extra = plan.slot_arguments.get(&slot);
        match (class, extra) {
            (Some(class), Some(extra)) => {
                let _ = writeln!(out, "{} = executorPy.PlanConnector(plan, {}, {})", slot, class, extra);
            }
            (Some(class), None) => {
                let _ = writeln!(out, "{} = executorPy.PlanConnector(plan, {})", slot, class);
            }
            (None, Some(extra)) => {
                let _ = writeln!(out, "{} = executorPy.PlanConnector(plan, {}) # unspecified", slot, extra);
            }
            (None, None) => {
                let _ = writeln!(out, "{} = executorPy.PlanConnector(plan) # unspecified", slot);
            }
        }
    }

    for op in &plan.operations {
        let _ = writeln!(out, "pop = {}() # {}", qualified_class(&op.class), op.name);
        let receiver = format!("{}.", op.name);
        for line in &op.lines {
            match line.strip_prefix(&receiver) {
                Some(rest) => {
                    let _ = writeln!(out, "pop.{}", rest);
                }
                None => {
                    let _ = writeln!(out, "{}", line);
                }
            }
        }
        for slot in &op.inputs {
            let _ = writeln!(out, "pop.addInput({})", slot);
        }
        for slot in &op.outputs {
            let _ = writeln!(out, "pop.addOutput({})", slot);
        }
        out.push_str("plan.append(pop)\n");
    }
    out.push_str("ex.setPlan(plan)\n");

    for gi in &plan.global_inputs {
        match &gi.class {
            Some(class) => {
                let _ = writeln!(out, "inputValue = {}()", qualified_class(class));
            }
            None => out.push_str("inputValue = None\n"),
        }
        for line in &gi.trace {
            let _ = writeln!(out, "{}", line);
        }
        let _ = writeln!(out, "ex.setInput({}, inputValue)", gi.slot);
    }
    for slot in &plan.global_outputs {
        let _ = writeln!(out, "ex.addRequestedValue({})", slot);
    }
    out.push_str("ex.calculate()\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalInput, Operation};
    use crate::runtime::NoClasses;
    use crate::trace::parse_session;
    use pretty_assertions::assert_eq;

    fn sample() -> Plan {
        let mut plan = Plan::default();
        plan.prefix.push("# tracing calculate call (thread 1) at 2024-03-01 10:00:00.000".into());
        plan.executor_location = Some("host1:30003".into());
        let mut op = Operation::new("pop4", "BwPopJoin13");
        op.inputs = vec!["c_a".into(), "c_z".into()];
        op.outputs = vec!["c_b".into()];
        op.lines = vec![
            "pop4.setLocation('host2', 30003)".into(),
            "pop4.setPopFlags(2)".into(),
            "x = 1".into(),
        ];
        op.location = Some("host2:30003".into());
        plan.operations.push(op);
        plan.global_inputs.push(GlobalInput {
            slot: "c_a".into(),
            class: Some("BwDocids".into()),
            trace: vec!["inputValue.setDocids([1])".into()],
        });
        plan.global_inputs.push(GlobalInput {
            slot: "c_z".into(),
            class: None,
            trace: vec![],
        });
        plan.global_outputs.push("c_b".into());
        plan.slot_classes.insert("c_a".into(), "BwDocids".into());
        plan.slot_classes.insert("c_b".into(), "PythonData".into());
        plan.slot_arguments.insert("c_b".into(), "'BwResult'".into());
        plan
    }

    #[test]
    fn writes_every_section() {
        let text = render_python(&sample());
        let expected = "\
# tracing calculate call (thread 1) at 2024-03-01 10:00:00.000
ex = executorPy.PlanExecutor()
ex.setExecutorLocation('host1', 30003)
plan = executorPy.ExecutionPlan()
c_a = executorPy.PlanConnector(plan, executorPy.dataClassIds['BwDocids'])
c_b = executorPy.PlanConnector(plan, executorPy.dataClassIds['PythonData'], 'BwResult')
c_z = executorPy.PlanConnector(plan) # unspecified
pop = executorPy.BwPopJoin13() # pop4
pop.setLocation('host2', 30003)
pop.setPopFlags(2)
x = 1
pop.addInput(c_a)
pop.addInput(c_z)
pop.addOutput(c_b)
plan.append(pop)
ex.setPlan(plan)
inputValue = executorPy.BwDocids()
inputValue.setDocids([1])
ex.setInput(c_a, inputValue)
inputValue = None
ex.setInput(c_z, inputValue)
ex.addRequestedValue(c_b)
ex.calculate()
";
        assert_eq!(text, expected);
    }

    #[test]
    fn reparses_to_the_same_plan() {
        let plan = sample();
        let again = parse_session(&render_python(&plan), &NoClasses).unwrap();
        assert_eq!(again, plan);
    }

    #[test]
    fn unresolved_class_ids_survive() {
        let text = "\
c_a = executorPy.PlanConnector(plan, 8)
c_b = executorPy.PlanConnector(plan, 17, 'BwResult')
pop = executorPy.BwPopAggregate() # pop1
pop.addInput(c_a)
pop.addOutput(c_b)
plan.append(pop)
ex.addRequestedValue(c_b)
";
        let plan = parse_session(text, &NoClasses).unwrap();
        let rendered = render_python(&plan);
        assert!(rendered.contains("c_a = executorPy.PlanConnector(plan, 8)\n"));
        assert!(rendered.contains("c_b = executorPy.PlanConnector(plan, 17, 'BwResult')\n"));
        assert!(!rendered.contains("# unspecified"));
        assert_eq!(parse_session(&rendered, &NoClasses).unwrap(), plan);
    }

    #[test]
    fn missing_executor_location_uses_index_server() {
        let text = render_python(&Plan::default());
        assert!(text.contains("ex.setExecutorLocation(*indexServer)\n"));
        assert!(text.ends_with("ex.setPlan(plan)\nex.calculate()\n"));
    }
}
