//! Directory of the sessions in a trace archive.
//!
//! The archive is an append-only text file written by the executor's
//! tracer; every session starts with a `# tracing ` marker line and runs up
//! to the next marker or the end of the file. A mark file next to it holds a
//! byte offset (`"<offset>\n"`); sessions before it are hidden.

use crate::Result;
use crate::error::PlanError;
use crate::log::title::TitleRewriter;

use anyhow::{Context, bail};
use log::debug;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

pub const SESSION_MARKER: &str = "# tracing ";

/// Byte range and display title of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub start: u64,
    pub end: u64,
    pub title: String,
}

pub struct TraceArchive {
    path: PathBuf,
    mark_path: PathBuf,
    file: File,
    entries: Vec<DirectoryEntry>,
}

impl TraceArchive {
    /// Open the archive and index the sessions after the mark.
    pub fn open(path: impl Into<PathBuf>, mark_path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).with_context(|| format!("open trace archive {}", path.display()))?;
        let mut archive = Self {
            path,
            mark_path: mark_path.into(),
            file,
            entries: Vec::new(),
        };
        archive.read_directory()?;
        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rescan the archive from the current mark.
    pub fn read_directory(&mut self) -> Result<()> {
        let cursor = read_cursor(&self.mark_path)?;
        let size = self
            .file
            .metadata()
            .with_context(|| format!("stat {}", self.path.display()))?
            .len();
        if cursor > size {
            return Err(PlanError::MalformedArchive {
                path: self.path.clone(),
                reason: format!("mark {} is beyond the end of the file ({} bytes)", cursor, size),
            }
            .into());
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(cursor))?;
        let mut reader = BufReader::new(file);
        let rewriter = TitleRewriter::new()?;

        let mut entries = Vec::new();
        let mut open: Option<(u64, String)> = None;
        let mut stray_content = false;
        let mut pos = cursor;
        let mut line = Vec::new();
        let mut next = Vec::new();
        let mut n = reader.read_until(b'\n', &mut line)?;
        while n > 0 {
            next.clear();
            let m = reader.read_until(b'\n', &mut next)?;
            if let Some(rest) = line.strip_prefix(SESSION_MARKER.as_bytes()) {
                if let Some((start, title)) = open.take() {
                    entries.push(DirectoryEntry { start, end: pos, title });
                }
                let raw = String::from_utf8_lossy(rest);
                let title = rewriter.rewrite(raw.trim(), &String::from_utf8_lossy(&next));
                open = Some((pos, title));
            } else if open.is_none() && !line.iter().all(u8::is_ascii_whitespace) {
                stray_content = true;
            }
            pos += n as u64;
            std::mem::swap(&mut line, &mut next);
            n = m;
        }
        if let Some((start, title)) = open {
            entries.push(DirectoryEntry { start, end: pos, title });
        }

        if entries.is_empty() && stray_content {
            return Err(PlanError::MalformedArchive {
                path: self.path.clone(),
                reason: format!("no session marker after offset {}", cursor),
            }
            .into());
        }
        debug!("{}: {} sessions after offset {}", self.path.display(), entries.len(), cursor);
        self.entries = entries;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn listing(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.title.as_str()).collect()
    }

    /// Text of session `index` (1-based).
    pub fn read(&self, index: usize) -> Result<String> {
        let entry = index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .ok_or(PlanError::SessionOutOfRange {
                index: index as i64,
                len: self.entries.len(),
            })?;
        let expected = (entry.end - entry.start) as usize;

        let mut file = &self.file;
        file.seek(SeekFrom::Start(entry.start))?;
        let mut buf = Vec::with_capacity(expected);
        file.take(expected as u64)
            .read_to_end(&mut buf)
            .with_context(|| format!("read session {} of {}", index, self.path.display()))?;
        if buf.len() != expected {
            return Err(PlanError::ShortRead {
                path: self.path.clone(),
                offset: entry.start,
                expected,
                got: buf.len(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn latest(&self) -> Result<String> {
        self.read(self.resolve(0)?)
    }

    /// `0` = latest, negative = counted back from the latest, positive =
    /// 1-based position.
    pub fn resolve(&self, index: i64) -> Result<usize> {
        let len = self.entries.len();
        let resolved = if index <= 0 { len as i64 + index } else { index };
        if resolved < 1 || resolved > len as i64 {
            return Err(PlanError::SessionOutOfRange { index, len }.into());
        }
        Ok(resolved as usize)
    }

    /// Hide all but the last `keep` sessions from future listings.
    ///
    /// `keep == 0` hides everything indexed so far.
    pub fn mark(&self, keep: usize) -> Result<()> {
        let offset = if keep == 0 {
            match self.entries.last() {
                Some(last) => last.end,
                None => return self.unmark(),
            }
        } else {
            let Some(i) = self.entries.len().checked_sub(keep) else {
                return Err(PlanError::NotEnoughSessions {
                    available: self.entries.len(),
                    requested: keep,
                }
                .into());
            };
            self.entries[i].start
        };
        fs::write(&self.mark_path, format!("{}\n", offset))
            .with_context(|| format!("write mark file {}", self.mark_path.display()))?;
        debug!("mark set to {}", offset);
        Ok(())
    }

    pub fn unmark(&self) -> Result<()> {
        remove_mark(&self.mark_path)
    }

    /// First session (1-based) recorded on `date` (`YYYY-MM-DD`, default
    /// today); `len + 1` if there is none.
    pub fn day_start(&self, date: Option<&str>) -> Result<usize> {
        Ok(self.day_range(date)?.start)
    }

    /// Sessions (1-based, end exclusive) recorded on `date`.
    ///
    /// Titles are assumed to be in time order; undated titles inside the
    /// run are included.
    pub fn day_range(&self, date: Option<&str>) -> Result<Range<usize>> {
        let day = match date {
            Some(d) => normalize_date(d)?,
            None => today(),
        };
        let dates: Vec<Option<&str>> = self.entries.iter().map(|e| title_date(&e.title)).collect();
        Ok(find_day(&dates, &day))
    }
}

/// Remove `mark_path` if it exists.
pub fn remove_mark(mark_path: &Path) -> Result<()> {
    if mark_path.is_file() {
        fs::remove_file(mark_path).with_context(|| format!("remove mark file {}", mark_path.display()))?;
    }
    Ok(())
}

fn read_cursor(mark_path: &Path) -> Result<u64> {
    if !mark_path.is_file() {
        return Ok(0);
    }
    let text = fs::read_to_string(mark_path)
        .with_context(|| format!("read mark file {}", mark_path.display()))?;
    text.trim()
        .parse()
        .with_context(|| format!("mark file {} does not hold an offset", mark_path.display()))
}

/// `YYYY-MM-DD` following ` at ` in a title.
fn title_date(title: &str) -> Option<&str> {
    let mut rest = title;
    while let Some(i) = rest.find(" at ") {
        let candidate = &rest[i + 4..];
        if let Some(date) = candidate.get(..10) {
            let b = date.as_bytes();
            let shape_ok = b.iter().enumerate().all(|(k, c)| match k {
                4 | 7 => *c == b'-',
                _ => c.is_ascii_digit(),
            });
            if shape_ok {
                return Some(date);
            }
        }
        rest = &rest[i + 4..];
    }
    None
}

fn find_day(dates: &[Option<&str>], day: &str) -> Range<usize> {
    let n = dates.len();
    let mut i = 0;
    while i < n {
        let date = dates[i];
        i += 1;
        match date {
            Some(d) if d > day => break,
            Some(d) if d == day => {
                let start = i;
                while i < n {
                    if dates[i].is_some_and(|d| d > day) {
                        break;
                    }
                    i += 1;
                }
                return start..i + 1;
            }
            _ => {}
        }
    }
    n + 1..n + 1
}

fn normalize_date(date: &str) -> Result<String> {
    let parts: Vec<&str> = date.trim().split('-').collect();
    let [y, m, d] = parts.as_slice() else {
        bail!("date must look like YYYY-MM-DD: {}", date);
    };
    let parse = |s: &str| {
        s.parse::<u32>()
            .with_context(|| format!("date must look like YYYY-MM-DD: {}", date))
    };
    Ok(format!("{:04}-{:02}-{:02}", parse(*y)?, parse(*m)?, parse(*d)?))
}

fn today() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!("{:04}-{:02}-{:02}", now.year(), u8::from(now.month()), now.day())
}
