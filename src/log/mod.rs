//! The trace archive: session directory, cursor, titles and housekeeping.

pub mod archive;
pub mod classify;
pub mod delete;
pub mod title;

pub use archive::{DirectoryEntry, SESSION_MARKER, TraceArchive, remove_mark};
pub use classify::{PlanKind, SessionSummary, classify, summarize};
pub use delete::{DeleteOutcome, delete_archive, safe_to_remove};
pub use title::TitleRewriter;
