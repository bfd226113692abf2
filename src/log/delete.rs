//! Removing the trace archive.
//!
//! The archive path comes from configuration, so it is only removed when it
//! plausibly is a trace archive.

use crate::Result;

use anyhow::{Context, bail};
use log::info;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// There was no archive to delete.
    Missing,
}

/// Markers one of which the head of a non-empty archive must contain.
const ARCHIVE_MARKERS: [&str; 3] = ["# creating trace file", "# tracing ", "plan = "];

/// Whether `path` looks like a trace archive that may be removed.
pub fn safe_to_remove(path: &Path) -> Result<bool> {
    let Some(name) = path.to_str() else {
        return Ok(false);
    };
    if name.contains("..") {
        return Ok(false);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "_+,-./\\".contains(c))
    {
        return Ok(false);
    }
    if name.starts_with("/dev/") || name.starts_with("/etc/") {
        return Ok(false);
    }
    let base = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if !base.contains("extrace") && !base.ends_with(".trc") {
        return Ok(false);
    }

    let mut head = Vec::with_capacity(1024);
    File::open(path)
        .with_context(|| format!("open {}", path.display()))?
        .take(1024)
        .read_to_end(&mut head)
        .with_context(|| format!("read {}", path.display()))?;
    if head.is_empty() {
        return Ok(true);
    }
    let head = String::from_utf8_lossy(&head);
    Ok(ARCHIVE_MARKERS.iter().any(|m| head.contains(m)))
}

/// Remove the mark file and then the archive itself.
pub fn delete_archive(archive: &Path, mark: &Path) -> Result<DeleteOutcome> {
    if !archive.is_file() {
        return Ok(DeleteOutcome::Missing);
    }
    if mark.is_file() {
        fs::remove_file(mark).with_context(|| format!("remove {}", mark.display()))?;
    }
    if !safe_to_remove(archive)? {
        bail!("please delete the file manually:\nrm {}", archive.display());
    }
    fs::remove_file(archive).with_context(|| format!("remove {}", archive.display()))?;
    info!("removed {}", archive.display());
    Ok(DeleteOutcome::Deleted)
}
