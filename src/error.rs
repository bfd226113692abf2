//! Failure kinds callers may want to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context attached at the
//! call site; these are raised with `.into()` / `bail!(PlanError::..)`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("malformed trace archive {path}: {reason}")]
    MalformedArchive { path: PathBuf, reason: String },

    #[error("short read in {path}: expected {expected} bytes at offset {offset}, got {got}")]
    ShortRead {
        path: PathBuf,
        offset: u64,
        expected: usize,
        got: usize,
    },

    #[error("session {index} out of range (archive has {len} sessions)")]
    SessionOutOfRange { index: i64, len: usize },

    #[error("only {available} sessions visible, cannot keep {requested}")]
    NotEnoughSessions { available: usize, requested: usize },

    #[error("unknown data representation for connector {slot} (class {class})")]
    UnresolvableType { slot: String, class: String },

    #[error(
        "execution of {script} failed to produce the expected output files {missing:?}; check the error output of the host runtime above"
    )]
    PrecomputeFailed { script: PathBuf, missing: Vec<PathBuf> },

    #[error("file {0} exists - delete it first or use --replace")]
    OutputExists(PathBuf),

    #[error("no plan: the session contains no operations and no global inputs or outputs")]
    EmptyPlan,

    #[error("captured value file {path} does not start with an inputValue assignment")]
    MissingCapture { path: PathBuf },
}
