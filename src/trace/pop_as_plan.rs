//! Rewrites a single-operation (`executePop`) trace as a one-operation plan.
//!
//! ```text
//! # tracing executePop call (thread 7) at 2024-03-01 10:22:33.123
//! pop = executorPy.BwPopDimFn()
//! pop.setName('dim')
//! in0 = executorPy.BwDocids()
//! in0.setDocids([1, 2])
//! out0 = executorPy.BwDimFn()
//! rc = pop.executePop([in0], [out0])
//! ```
//!
//! becomes a `# tracing calculate` session with `c_a` bound to `in0`'s value
//! and `c_b` requested.

use crate::trace::grammar::{CALCULATE_MARKER, EXECUTE_POP_MARKER, Grammar, INDEX_SERVER_EXPR, split_list};

use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Connector name for the `index`-th variable: `c_a`..`c_z`, then `c_a27`...
pub fn connector_name(index: usize) -> String {
    if index < 26 {
        format!("c_{}", (b'a' + index as u8) as char)
    } else {
        format!("c_a{}", index + 1)
    }
}

/// Declaring assignment of one `inN`/`outN` variable.
struct Assignment {
    class: String,
    /// Lines `first..end` build the value.
    first: usize,
    end: usize,
}

/// Convert an executePop trace to plan form.
///
/// Returns `None` when the trace does not end in an `executePop` call or the
/// class of one of its variables cannot be found; callers keep the text as
/// it was.
pub fn convert_pop_to_plan(trace: &str, grammar: &Grammar) -> Option<String> {
    let mut lines: Vec<&str> = trace.split('\n').collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    let call = grammar.execute_pop.captures(lines.last()?.trim())?;
    let inputs = call.get(2).map(|m| split_list(m.as_str())).unwrap_or_default();
    let outputs = call.get(3).map(|m| split_list(m.as_str())).unwrap_or_default();
    debug!("executePop in={:?} out={:?}", inputs, outputs);

    let wanted = inputs.len() + outputs.len();
    let mut values: BTreeMap<String, Assignment> = BTreeMap::new();
    let mut end = lines.len() - 1;
    for i in (0..end).rev() {
        if values.len() >= wanted {
            break;
        }
        let Some(caps) = grammar.assign_variable.captures(lines[i].trim()) else {
            continue;
        };
        let name = &caps[1];
        if values.contains_key(name) || !(inputs.iter().chain(&outputs).any(|v| v == name)) {
            continue;
        }
        values.insert(
            name.to_string(),
            Assignment {
                class: caps[2].to_string(),
                first: i,
                end,
            },
        );
        end = i;
    }
    if values.len() < wanted {
        warn!("executePop trace: cannot find the types of all variables");
        return None;
    }

    let mut out = String::new();
    let _ = writeln!(out, "# determine index server:");
    let _ = writeln!(out, "indexServer = {}\n", INDEX_SERVER_EXPR);

    let mut i = 0;
    if let Some(rest) = lines[0].strip_prefix(EXECUTE_POP_MARKER) {
        let _ = writeln!(out, "{}{}", CALCULATE_MARKER, rest);
        i = 1;
    }
    while i < lines.len() && lines[i].starts_with('#') {
        let _ = writeln!(out, "{}", lines[i]);
        i += 1;
    }
    out.push_str(
        "ex = executorPy.PlanExecutor()\n\
         ex.setExecutorLocation(*indexServer)\n\
         plan = executorPy.ExecutionPlan()\n",
    );

    let mut connectors: BTreeMap<&str, String> = BTreeMap::new();
    for (j, variable) in inputs.iter().chain(&outputs).enumerate() {
        let slot = connector_name(j);
        let class = &values[variable].class;
        match class.strip_prefix("executorPy.") {
            Some(short) => {
                let _ = writeln!(
                    out,
                    "{} = executorPy.PlanConnector(plan, executorPy.dataClassIds['{}'])",
                    slot, short
                );
            }
            None => {
                let _ = writeln!(
                    out,
                    "{} = executorPy.PlanConnector(plan, executorPy.dataClassIds['PythonData'], '{}')",
                    slot, class
                );
            }
        }
        connectors.insert(variable.as_str(), slot);
    }

    for line in &lines[i..end] {
        let _ = writeln!(out, "{}", line);
    }
    for variable in &inputs {
        let _ = writeln!(out, "pop.addInput({})", connectors[variable.as_str()]);
    }
    for variable in &outputs {
        let _ = writeln!(out, "pop.addOutput({})", connectors[variable.as_str()]);
    }
    out.push_str("plan.append(pop)\nex.setPlan(plan)\n");

    for variable in &inputs {
        let value = &values[variable];
        let rename = Regex::new(&format!(r"\b{}\b", regex::escape(variable))).ok()?;
        for line in &lines[value.first..value.end] {
            let _ = writeln!(out, "{}", rename.replace_all(line, "inputValue"));
        }
        let _ = writeln!(out, "ex.setInput({}, inputValue)", connectors[variable.as_str()]);
    }
    for variable in &outputs {
        let _ = writeln!(out, "ex.addRequestedValue({})", connectors[variable.as_str()]);
    }
    out.push_str("ex.calculate()\n");
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TRACE: &str = "\
# tracing executePop call (thread 7) at 2024-03-01 10:22:33.123
# id <Executor 3 at host1:30003>
pop = executorPy.BwPopDimFn()
pop.setName('dim')
in0 = executorPy.BwDocids()
in0.setDocids([1, 2])
in1 = scripts.Custom()
out0 = executorPy.BwDimFn()
rc = pop.executePop([in0, in1], [out0])
";

    #[test]
    fn connector_names() {
        assert_eq!(connector_name(0), "c_a");
        assert_eq!(connector_name(25), "c_z");
        assert_eq!(connector_name(26), "c_a27");
    }

    #[test]
    fn converts_to_plan_form() {
        let g = Grammar::new().unwrap();
        let plan = convert_pop_to_plan(TRACE, &g).unwrap();
        let expected = "\
# determine index server:
indexServer = tuple(fuzzypy.Admin().showServers(0, 1)[0][:2])

# tracing calculate call (thread 7) at 2024-03-01 10:22:33.123
# id <Executor 3 at host1:30003>
ex = executorPy.PlanExecutor()
ex.setExecutorLocation(*indexServer)
plan = executorPy.ExecutionPlan()
c_a = executorPy.PlanConnector(plan, executorPy.dataClassIds['BwDocids'])
c_b = executorPy.PlanConnector(plan, executorPy.dataClassIds['PythonData'], 'scripts.Custom')
c_c = executorPy.PlanConnector(plan, executorPy.dataClassIds['BwDimFn'])
pop = executorPy.BwPopDimFn()
pop.setName('dim')
pop.addInput(c_a)
pop.addInput(c_b)
pop.addOutput(c_c)
plan.append(pop)
ex.setPlan(plan)
inputValue = executorPy.BwDocids()
inputValue.setDocids([1, 2])
ex.setInput(c_a, inputValue)
inputValue = scripts.Custom()
ex.setInput(c_b, inputValue)
ex.addRequestedValue(c_c)
ex.calculate()
";
        assert_eq!(plan, expected);
    }

    #[test]
    fn declines_without_execute_pop_call() {
        let g = Grammar::new().unwrap();
        assert_eq!(convert_pop_to_plan("# tracing executePop x\npop.foo()\n", &g), None);
        assert_eq!(convert_pop_to_plan("", &g), None);
    }

    #[test]
    fn declines_when_a_type_is_missing() {
        let g = Grammar::new().unwrap();
        let trace = "pop = executorPy.BwPopA()\nout0 = executorPy.BwResult()\npop.executePop([in0], [out0])\n";
        assert_eq!(convert_pop_to_plan(trace, &g), None);
    }
}
