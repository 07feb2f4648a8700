use std::path::Path;
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::workspace::{Workspace, WorkspaceError};

/// Section the target project's changelog keeps script entries under.
pub const DEFAULT_SECTION: &str = "### Python Scripts Run";
/// Parent heading a missing section is created beneath.
pub const PARENT_HEADING: &str = "## [Unreleased]";
/// Changelog location relative to the working root.
pub const DEFAULT_FILE: &str = "CHANGELOG.md";

#[derive(Error, Debug)]
pub enum ChangelogError {
    #[error("Changelog has neither a {section:?} section nor a {parent:?} heading to create it under")]
    MissingParent { section: String, parent: String },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// One timestamped bullet recording that a script ran.
///
/// History is append-only: repeated runs produce repeated entries, and no
/// deduplication is ever attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub description: String,
    pub timestamp: String,
}

impl ChangelogEntry {
    pub fn new(description: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Entry stamped with the current time.
    pub fn now(description: impl Into<String>) -> Self {
        Self::new(description, timestamp_now())
    }

    /// The Markdown bullet line, without terminator.
    pub fn bullet(&self) -> String {
        format!("- {} ({})", self.description, self.timestamp)
    }
}

/// Current local time, UTC when the local offset is indeterminate,
/// formatted `YYYY-MM-DD HH:MM`.
pub fn timestamp_now() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format)
        .unwrap_or_else(|_| String::from("unknown time"))
}

/// Append `entry` under `section` in the changelog at `path`.
///
/// A missing or empty changelog is bootstrapped with the parent heading and
/// the section. The new content is fully composed in memory before the
/// write, so the changelog is never left partially written.
pub fn record(
    workspace: &Workspace,
    path: impl AsRef<Path>,
    section: &str,
    entry: &ChangelogEntry,
) -> Result<(), ChangelogError> {
    let path = path.as_ref();
    let existing = match workspace.read(path) {
        Ok(content) => content,
        Err(WorkspaceError::NotFound { .. }) => String::new(),
        Err(err) => return Err(err.into()),
    };

    let updated = compose(&existing, section, &entry.bullet())?;
    workspace.write(path, &updated)?;
    Ok(())
}

/// Pure composition of the updated changelog content.
///
/// The bullet is inserted first beneath the section heading, pushing
/// existing bullets down; when the section is missing it is created as the
/// first subsection under the parent heading. Every other line of the
/// document comes through byte-identical.
pub fn compose(existing: &str, section: &str, bullet: &str) -> Result<String, ChangelogError> {
    if existing.trim().is_empty() {
        return Ok(format!(
            "{PARENT_HEADING}\n\n{section}\n\n{bullet}\n"
        ));
    }

    let segments: Vec<&str> = existing.split_inclusive('\n').collect();

    if let Some(heading) = position_of(&segments, section) {
        let mut insert_at = heading + 1;
        // Keep a single blank line between the heading and the first bullet
        if insert_at < segments.len() && line_text(segments[insert_at]).is_empty() {
            insert_at += 1;
        }
        let block = format!("{bullet}\n");
        return Ok(splice_segments(&segments, insert_at, &block));
    }

    if let Some(parent) = position_of(&segments, PARENT_HEADING) {
        let mut insert_at = parent + 1;
        let mut block = String::new();
        if insert_at < segments.len() && line_text(segments[insert_at]).is_empty() {
            insert_at += 1;
        } else {
            block.push('\n');
        }
        block.push_str(section);
        block.push_str("\n\n");
        block.push_str(bullet);
        block.push('\n');
        if insert_at < segments.len() {
            block.push('\n');
        }
        return Ok(splice_segments(&segments, insert_at, &block));
    }

    Err(ChangelogError::MissingParent {
        section: section.to_string(),
        parent: PARENT_HEADING.to_string(),
    })
}

/// Index of the segment whose line content equals `heading` exactly.
fn position_of(segments: &[&str], heading: &str) -> Option<usize> {
    segments
        .iter()
        .position(|segment| line_text(segment) == heading)
}

/// Line content without its terminator; tolerates CRLF.
fn line_text(segment: &str) -> &str {
    segment.trim_end_matches('\n').trim_end_matches('\r')
}

fn splice_segments(segments: &[&str], insert_at: usize, block: &str) -> String {
    let mut result = String::new();
    for (index, segment) in segments.iter().enumerate() {
        if index == insert_at {
            result.push_str(block);
        }
        result.push_str(segment);
    }
    if insert_at >= segments.len() {
        // Appending after the last line; make sure it is terminated first
        if !result.is_empty() && !result.ends_with('\n') {
            result.push('\n');
        }
        result.push_str(block);
    }
    result
}
