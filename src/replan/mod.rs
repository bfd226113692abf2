//! Partial evaluation of a plan.
//!
//! Part of the plan is executed once through the host runtime, the values it
//! produces are captured to files, and a second plan is written in which
//! those values are bound as global inputs instead of being computed:
//!
//! ```text
//! <out>_prepare_inputs.py   plan computing the precomputed connectors
//! <out>_c_b.py / .bin       captured value of c_b
//! <out>                     final plan reading c_b from the capture
//! ```

use crate::Result;
use crate::config::{Config, DataRepresentation};
use crate::error::PlanError;
use crate::model::{Criterion, GlobalInput, Plan, sort_slots};
use crate::render::py_quote;
use crate::render::python::render_python;
use crate::render::script::{ScriptOptions, ScriptWriter, add_to_filename};
use crate::runtime::HostRuntime;
use crate::trace::Grammar;

use anyhow::Context;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// What to compute ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanTarget {
    /// Replace the matched connectors by their computed values.
    ReplaceInputs(Vec<Criterion>),
    /// Keep only the matched operations; everything feeding them is computed.
    IsolateOperations(Vec<Criterion>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplanOutcome {
    /// Connectors bound to captured values, sorted.
    pub precomputed: Vec<String>,
    /// Exit code of the preparation run, if there was one.
    pub prepare_status: Option<Option<i32>>,
    /// Files left behind for the final plan or by `keep_temporaries`.
    pub kept: Vec<PathBuf>,
}

pub struct Replanner<'a> {
    config: &'a Config,
    writer: ScriptWriter<'a>,
    runtime: &'a dyn HostRuntime,
    grammar: Grammar,
    pub keep_temporaries: bool,
}

impl<'a> Replanner<'a> {
    pub fn new(config: &'a Config, options: ScriptOptions, runtime: &'a dyn HostRuntime) -> Result<Self> {
        Ok(Self {
            config,
            writer: ScriptWriter::new(config, options)?,
            runtime,
            grammar: Grammar::new()?,
            keep_temporaries: false,
        })
    }

    /// Precompute the part of `plan` selected by `target` and write the
    /// remaining plan to `out`, overwriting it.
    ///
    /// `plan` is only updated when everything succeeded; on error it is left
    /// as it was and the temporaries stay on disk.
    pub fn run(&self, plan: &mut Plan, target: &ReplanTarget, out: &Path) -> Result<ReplanOutcome> {
        let mut work = plan.clone();
        let slots = precompute_slots(&mut work, target);
        info!("precomputing {:?}", slots);

        let mut outcome = ReplanOutcome {
            precomputed: slots.clone(),
            ..ReplanOutcome::default()
        };
        let mut temporaries = Vec::new();

        if !slots.is_empty() {
            let saved = work.snapshot();
            work.retarget(&slots);
            let prepared = self.prepare(&work, out, &mut temporaries);
            work.restore(saved);
            let (script, expected, status) = prepared?;
            outcome.prepare_status = Some(status);

            let missing: Vec<PathBuf> = expected.into_iter().filter(|f| !f.is_file()).collect();
            if !missing.is_empty() {
                return Err(PlanError::PrecomputeFailed { script, missing }.into());
            }

            let inputs = slots
                .iter()
                .map(|slot| self.bind_captured(&work, slot, out, &mut temporaries))
                .collect::<Result<Vec<_>>>()?;
            for input in inputs {
                if let Some(producer) = work.sever_producer(&input.slot) {
                    debug!("{} no longer computed by {}", input.slot, producer);
                }
                work.global_inputs.push(input);
            }
        }

        let supplied: BTreeSet<String> = work.global_inputs.iter().map(|gi| gi.slot.clone()).collect();
        work.global_outputs.retain(|slot| !supplied.contains(slot));
        work.prune_to_outputs();

        self.writer.write(out, &render_python(&work), None, true)?;

        if self.keep_temporaries {
            outcome.kept.extend(temporaries);
        } else {
            for file in temporaries {
                debug!("removing {}", file.display());
                fs::remove_file(&file).with_context(|| format!("remove {}", file.display()))?;
            }
        }
        outcome.kept.extend(
            work.global_inputs
                .iter()
                .filter(|gi| slots.contains(&gi.slot))
                .filter_map(|gi| {
                    let file = add_to_filename(out, &format!("_{}", gi.slot), Some(".bin"));
                    file.is_file().then_some(file)
                }),
        );
        *plan = work;
        Ok(outcome)
    }

    /// Write the capturing script for the retargeted plan and run it.
    fn prepare(
        &self,
        plan: &Plan,
        out: &Path,
        temporaries: &mut Vec<PathBuf>,
    ) -> Result<(PathBuf, Vec<PathBuf>, Option<i32>)> {
        let script = add_to_filename(out, "_prepare_inputs", None);
        let expected = self
            .writer
            .write(&script, &render_python(plan), Some(out), true)?;
        temporaries.push(script.clone());

        let status = self.runtime.execute(&script)?;
        if status != Some(0) {
            warn!("{} exited with {:?}", script.display(), status);
        }
        Ok((script, expected, status))
    }

    /// Global input replaying the captured value of `slot`.
    fn bind_captured(
        &self,
        plan: &Plan,
        slot: &str,
        out: &Path,
        temporaries: &mut Vec<PathBuf>,
    ) -> Result<GlobalInput> {
        let mut class = plan.slot_class(slot).map(str::to_string);
        let Some(repr) = self.config.representation_for(class.as_deref()) else {
            return Err(PlanError::UnresolvableType {
                slot: slot.to_string(),
                class: class.unwrap_or_else(|| "unknown".to_string()),
            }
            .into());
        };

        let trace = match repr {
            DataRepresentation::Python => {
                let file = add_to_filename(out, &format!("_{}", slot), Some(".py"));
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("read captured value {}", file.display()))?;
                temporaries.push(file.clone());

                let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
                if !lines.first().is_some_and(|l| l.starts_with("inputValue = ")) {
                    return Err(PlanError::MissingCapture { path: file }.into());
                }
                let first = lines.remove(0);
                if class.is_none() {
                    class = self.grammar.construct_input.captures(first.trim()).map(|caps| {
                        match &caps[1] {
                            "" | "executorPy." => caps[2].to_string(),
                            modules => format!("{}{}", modules, &caps[2]),
                        }
                    });
                }
                while lines.last().is_some_and(|l| l.trim().is_empty()) {
                    lines.pop();
                }
                lines
            }
            DataRepresentation::Binary => {
                let file = add_to_filename(out, &format!("_{}", slot), Some(".bin"));
                vec![
                    format!("f = open({}, 'rb')", py_quote(&file.to_string_lossy())),
                    "inputValue = cPickle.load(f)".to_string(),
                    "f.close()".to_string(),
                ]
            }
        };
        Ok(GlobalInput {
            slot: slot.to_string(),
            class,
            trace,
        })
    }
}

/// Connectors to compute ahead of time, minus the ones already bound.
///
/// Isolating operations also makes their outputs the only requested values.
fn precompute_slots(plan: &mut Plan, target: &ReplanTarget) -> Vec<String> {
    let mut slots: BTreeSet<String> = BTreeSet::new();
    match target {
        ReplanTarget::ReplaceInputs(criteria) => slots.extend(plan.resolve_slots(criteria)),
        ReplanTarget::IsolateOperations(criteria) => {
            plan.clear_outputs();
            for i in plan.select_operations(criteria) {
                let op = plan.operations[i].clone();
                slots.extend(op.inputs);
                for slot in &op.outputs {
                    plan.request_output(slot);
                }
            }
        }
    }
    for gi in &plan.global_inputs {
        slots.remove(&gi.slot);
    }
    sort_slots(slots.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operation;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    /// Pretends to run a script by writing canned capture files.
    struct FakeHost {
        captures: Vec<(PathBuf, String)>,
        ran: RefCell<Vec<PathBuf>>,
    }

    impl HostRuntime for FakeHost {
        fn execute(&self, script: &Path) -> Result<Option<i32>> {
            self.ran.borrow_mut().push(script.to_path_buf());
            for (path, text) in &self.captures {
                fs::write(path, text)?;
            }
            Ok(Some(0))
        }
    }

    fn op(name: &str, inputs: &[&str], outputs: &[&str]) -> Operation {
        let mut op = Operation::new(name, "BwPopJoin13");
        op.inputs = inputs.iter().map(|s| s.to_string()).collect();
        op.outputs = outputs.iter().map(|s| s.to_string()).collect();
        op
    }

    /// c_a -> pop1 -> c_b -> pop2 -> c_c
    fn chain() -> Plan {
        let mut plan = Plan::default();
        plan.operations.push(op("pop1", &["c_a"], &["c_b"]));
        plan.operations.push(op("pop2", &["c_b"], &["c_c"]));
        plan.global_inputs.push(GlobalInput {
            slot: "c_a".into(),
            class: Some("BwDocids".into()),
            trace: vec!["inputValue.setDocids([1])".into()],
        });
        plan.global_outputs.push("c_c".into());
        plan.slot_classes.insert("c_a".into(), "BwDocids".into());
        plan.slot_classes.insert("c_b".into(), "BwDimFn".into());
        plan
    }

    fn options() -> ScriptOptions {
        ScriptOptions {
            one_server: Some(0),
            ..ScriptOptions::default()
        }
    }

    #[test]
    fn replaces_input_with_captured_value() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![(
                dir.path().join("final_c_b.py"),
                "inputValue = executorPy.BwDimFn()\ninputValue.setValues([7])\n\n".into(),
            )],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config::default();
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        let outcome = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b"])), &out)
            .unwrap();

        assert_eq!(outcome.precomputed, vec!["c_b"]);
        assert_eq!(outcome.prepare_status, Some(Some(0)));
        assert_eq!(*host.ran.borrow(), vec![dir.path().join("final_prepare_inputs.py")]);

        let names: Vec<&str> = plan.operations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["pop2"]);
        assert_eq!(plan.global_inputs.len(), 1);
        assert_eq!(plan.global_inputs[0].slot, "c_b");
        assert_eq!(plan.global_inputs[0].class.as_deref(), Some("BwDimFn"));
        assert_eq!(plan.global_inputs[0].trace, vec!["inputValue.setValues([7])"]);
        assert_eq!(plan.global_outputs, vec!["c_c"]);

        let text = fs::read_to_string(&out).unwrap();
        assert!(text.contains("inputValue = executorPy.BwDimFn()\ninputValue.setValues([7])\nex.setInput(c_b, inputValue)\n"));
        assert!(!dir.path().join("final_prepare_inputs.py").exists());
        assert!(!dir.path().join("final_c_b.py").exists());
    }

    #[test]
    fn isolates_operation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![(
                dir.path().join("final_c_b.py"),
                "inputValue = executorPy.BwDimFn()\n".into(),
            )],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config::default();
        let mut replanner = Replanner::new(&config, options(), &host).unwrap();
        replanner.keep_temporaries = true;

        let mut plan = chain();
        plan.global_outputs.clear();
        let outcome = replanner
            .run(&mut plan, &ReplanTarget::IsolateOperations(Criterion::parse_all(&["pop2"])), &out)
            .unwrap();

        assert_eq!(outcome.precomputed, vec!["c_b"]);
        assert_eq!(plan.operations.len(), 1);
        assert_eq!(plan.global_outputs, vec!["c_c"]);
        assert!(plan.global_inputs[0].trace.is_empty());
        assert!(dir.path().join("final_prepare_inputs.py").exists());
        assert_eq!(outcome.kept.len(), 2);
    }

    #[test]
    fn binary_values_are_loaded_from_pickle() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let pickle = dir.path().join("final_c_b.bin");
        let host = FakeHost {
            captures: vec![(pickle.clone(), "binary".into())],
            ran: RefCell::new(Vec::new()),
        };
        let mut config = Config::default();
        config.override_representation("BwDimFn=binary").unwrap();
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        let outcome = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b"])), &out)
            .unwrap();

        assert_eq!(
            plan.global_inputs[0].trace,
            vec![
                format!("f = open({}, 'rb')", py_quote(&pickle.to_string_lossy())),
                "inputValue = cPickle.load(f)".to_string(),
                "f.close()".to_string(),
            ]
        );
        assert!(pickle.exists());
        assert_eq!(outcome.kept, vec![pickle]);
    }

    #[test]
    fn missing_capture_fails_and_keeps_plan() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config::default();
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        let before = plan.clone();
        let err = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b"])), &out)
            .unwrap_err();

        match err.downcast_ref::<PlanError>() {
            Some(PlanError::PrecomputeFailed { missing, .. }) => {
                assert_eq!(missing, &vec![dir.path().join("final_c_b.py")]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(plan, before);
        assert!(dir.path().join("final_prepare_inputs.py").exists());
        assert!(!out.exists());
    }

    #[test]
    fn unresolvable_type_leaves_plan_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config {
            default_data_representation: None,
            ..Config::default()
        };
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        plan.slot_classes.insert("c_b".into(), "Mystery".into());
        let before = plan.clone();
        let err = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b"])), &out)
            .unwrap_err();

        match err.downcast_ref::<PlanError>() {
            Some(PlanError::UnresolvableType { slot, class }) => {
                assert_eq!(slot, "c_b");
                assert_eq!(class, "Mystery");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(plan, before);
        assert!(host.ran.borrow().is_empty());
        assert!(!out.exists());
    }

    /// Fails to start the interpreter.
    struct BrokenHost;

    impl HostRuntime for BrokenHost {
        fn execute(&self, script: &Path) -> Result<Option<i32>> {
            anyhow::bail!("spawn python {}: No such file or directory", script.display())
        }
    }

    #[test]
    fn runtime_failure_leaves_plan_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let config = Config::default();
        let replanner = Replanner::new(&config, options(), &BrokenHost).unwrap();

        let mut plan = chain();
        let before = plan.clone();
        let err = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b"])), &out)
            .unwrap_err();

        assert!(err.to_string().contains("No such file or directory"));
        assert_eq!(plan, before);
        assert!(dir.path().join("final_prepare_inputs.py").exists());
        assert!(!out.exists());
    }

    #[test]
    fn bad_later_capture_binds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![
                (
                    dir.path().join("final_c_b.py"),
                    "inputValue = executorPy.BwDimFn()\ninputValue.setValues([7])\n".into(),
                ),
                (dir.path().join("final_c_c.py"), "print 1\n".into()),
            ],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config::default();
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        let before = plan.clone();
        let err = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["b", "c"])), &out)
            .unwrap_err();

        match err.downcast_ref::<PlanError>() {
            Some(PlanError::MissingCapture { path }) => {
                assert_eq!(path, &dir.path().join("final_c_c.py"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(host.ran.borrow().len(), 1);
        assert_eq!(plan, before);
        assert!(!out.exists());
    }

    #[test]
    fn bound_inputs_need_no_precomputation() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("final.py");
        let host = FakeHost {
            captures: vec![],
            ran: RefCell::new(Vec::new()),
        };
        let config = Config::default();
        let replanner = Replanner::new(&config, options(), &host).unwrap();

        let mut plan = chain();
        let outcome = replanner
            .run(&mut plan, &ReplanTarget::ReplaceInputs(Criterion::parse_all(&["a"])), &out)
            .unwrap();

        assert!(outcome.precomputed.is_empty());
        assert!(host.ran.borrow().is_empty());
        assert_eq!(plan.operations.len(), 2);
        assert!(out.exists());
    }
}
