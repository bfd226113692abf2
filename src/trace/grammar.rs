//! Line patterns of the executor's plan trace.
//!
//! A recorded session looks like:
//!
//! ```text
//! # tracing calculate call (thread 4711) at 2024-03-01 10:22:33.123
//! # id <Executor 12 at host1:30003>
//! ex = executorPy.PlanExecutor()
//! ex.setExecutorLocation('host1', 30003)
//! plan = executorPy.ExecutionPlan()
//! c_a = executorPy.PlanConnector(plan, executorPy.dataClassIds['BwDocids'])
//! c_b = executorPy.PlanConnector(plan, 8) # executorPy.dataClassIds['BwResult']
//! pop = executorPy.BwPopAggregateParallel() # pop3
//! pop.setLocation('host2', 30003)
//! pop.addInput(c_a)
//! pop.addOutput(c_b)
//! plan.append(pop)
//! ex.setPlan(plan)
//! inputValue = executorPy.BwDocids()
//! inputValue.setDocids([1, 2, 3])
//! ex.setInput(c_a, inputValue)
//! ex.addRequestedValue(c_b)
//! ex.calculate()
//! ```

use crate::Result;

use regex::Regex;

/// Session marker of a single-operation trace.
pub const EXECUTE_POP_MARKER: &str = "# tracing executePop ";
/// Session marker of a plan trace.
pub const CALCULATE_MARKER: &str = "# tracing calculate ";
/// Expression the generated scripts use to find an index server.
pub const INDEX_SERVER_EXPR: &str = "tuple(fuzzypy.Admin().showServers(0, 1)[0][:2])";

pub struct Grammar {
    /// 1: class, 2: id (optional)
    pub begin_operation: Regex,
    pub end_operation: Regex,
    /// 1: name, 2: class id, 3: class name, 4: extra arguments, 5: class name from comment
    pub connector: Regex,
    pub add_input: Regex,
    pub set_inputs: Regex,
    pub add_output: Regex,
    pub set_outputs: Regex,
    pub bind_input: Regex,
    pub request_output: Regex,
    /// 1: module path incl. trailing dot, 2: class
    pub construct_input: Regex,
    /// 1: host, 2: port
    pub operation_location: Regex,
    /// 1: host, 2: port
    pub executor_location: Regex,
    /// 1: `rc = `, 2: inputs, 3: outputs
    pub execute_pop: Regex,
    /// 1: variable, 2: class
    pub assign_variable: Regex,
}

impl Grammar {
    pub fn new() -> Result<Self> {
        Ok(Self {
            begin_operation: Regex::new(
                r"^pop = (?:executorPy\.)?([^(\s]+)\(.*?(?:# pop(\d+))?\s*$",
            )?,
            end_operation: Regex::new(r"^plan\.append\(pop\)")?,
            connector: Regex::new(
                r"^([a-z][a-z0-9_]*) = executorPy\.PlanConnector\(plan(?:, (?:(\d+)|executorPy\.dataClassIds\['([^']*)'\]))?(?:, (.*))?\)(?:\s*# executorPy\.dataClassIds\['([^']*)'\])?",
            )?,
            add_input: Regex::new(r"^pop\.addInput\(([a-z][a-z0-9_]*)\)")?,
            set_inputs: Regex::new(r"^pop\.setInputs\(\[([^\]]*)\]\)")?,
            add_output: Regex::new(r"^pop\.addOutput\(([a-z][a-z0-9_]*)\)")?,
            set_outputs: Regex::new(r"^pop\.setOutputs\(\[([^\]]*)\]\)")?,
            bind_input: Regex::new(r"^ex\.setInput\(([a-z][a-z0-9_]*), inputValue\)")?,
            request_output: Regex::new(r"^ex\.addRequestedValue\(([a-z][a-z0-9_]*)\)")?,
            construct_input: Regex::new(
                r"^inputValue = ((?:[A-Za-z_][A-Za-z0-9_]*\.)*)([A-Za-z_][A-Za-z0-9_]*)\(",
            )?,
            operation_location: Regex::new(r#"^pop\.setLocation\(\s*['"]([^'"]+)['"],\s*(\d+)\s*\)"#)?,
            executor_location: Regex::new(
                r#"^ex\.setExecutorLocation\(\s*['"]([^'"]+)['"],\s*(\d+)\s*\)"#,
            )?,
            execute_pop: Regex::new(
                r"^(rc = )?pop\.executePop\(\[(in\d+(?:, in\d+)*)?\], \[(out\d+(?:, out\d+)*)?\]\)",
            )?,
            assign_variable: Regex::new(r"^((?:in|out)\d+) = ([^(]+)\(\)")?,
        })
    }
}

/// Split a bracketed connector list (`c_a, c_b`).
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
