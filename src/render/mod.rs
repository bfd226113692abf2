//! Serializers: executable plan text, GraphViz `dot`, and runnable scripts.

pub mod dot;
pub mod python;
pub mod script;

pub use dot::{DotOptions, DotOutput, TraceDetail, render_dot};
pub use python::render_python;
pub use script::{ScriptOptions, ScriptWriter};

use crate::Result;
use crate::error::PlanError;

use anyhow::Context;
use log::debug;
use std::fs;
use std::path::Path;

/// Write `text` to `path`; an existing file is only replaced with `replace`.
pub fn write_output(path: &Path, text: &str, replace: bool) -> Result<()> {
    if path.is_file() && !replace {
        return Err(PlanError::OutputExists(path.to_path_buf()).into());
    }
    fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Quote `s` as a single-quoted Python string literal.
pub fn py_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Class reference as written in a constructor call: bare names live in
/// `executorPy`, dotted names carry their own module.
pub(crate) fn qualified_class(class: &str) -> String {
    if class.contains('.') {
        class.to_string()
    } else {
        format!("executorPy.{}", class)
    }
}
