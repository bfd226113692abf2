//! Seams to the host runtime that actually executes plans.

use crate::Result;

use anyhow::Context;
use log::info;
use std::path::Path;
use std::process::Command;

/// Resolves numeric data class ids found in connector declarations.
pub trait ClassCatalog {
    fn class_name(&self, class_id: u32) -> Option<String>;
}

/// Catalog that knows nothing; numeric ids stay unresolved.
pub struct NoClasses;

impl ClassCatalog for NoClasses {
    fn class_name(&self, _class_id: u32) -> Option<String> {
        None
    }
}

/// Executes a plan script and reports its exit code (`None` if killed).
pub trait HostRuntime {
    fn execute(&self, script: &Path) -> Result<Option<i32>>;
}

/// Runs scripts with an external interpreter, e.g. `python plan.py`.
pub struct InterpreterRuntime {
    pub interpreter: String,
}

impl HostRuntime for InterpreterRuntime {
    fn execute(&self, script: &Path) -> Result<Option<i32>> {
        info!("running {} {}", self.interpreter, script.display());
        let status = Command::new(&self.interpreter)
            .arg(script)
            .status()
            .with_context(|| format!("spawn {} {}", self.interpreter, script.display()))?;
        Ok(status.code())
    }
}
