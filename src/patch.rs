use thiserror::Error;

use crate::anchor::{Anchor, Span};

/// A planned byte-span splice, resolved against the snapshot it was planned
/// from. Application is a pure string operation; all intelligence lives in
/// planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splice {
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive); equal to `byte_start` for insertions
    pub byte_end: usize,
    /// Replacement text
    pub text: String,
}

/// A planned transformation of one file's content.
///
/// Patches are deterministic: planning the same intent against the same
/// snapshot yields the same patch, and applying it yields the same content.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a Patch does nothing until applied"]
pub enum Patch {
    /// Nothing to do; the file already carries the patched state
    NoOp,
    /// Insert text immediately after the anchor's last line
    InsertAfter { anchor: Anchor, splice: Splice },
    /// Replace the anchor's lines, preserving everything around them
    ReplaceRegion { region: Span, splice: Splice },
    /// Replace the whole file
    Overwrite { text: String },
}

#[derive(Error, Debug, Clone)]
pub enum PatchError {
    #[error("Splice range [{byte_start}, {byte_end}) exceeds content length {content_len}")]
    InvalidSplice {
        byte_start: usize,
        byte_end: usize,
        content_len: usize,
    },
}

impl Patch {
    /// Short name of the patch kind, for status lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Patch::NoOp => "no-op",
            Patch::InsertAfter { .. } => "insert-after",
            Patch::ReplaceRegion { .. } => "replace-region",
            Patch::Overwrite { .. } => "overwrite",
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Patch::NoOp)
    }
}

/// Return NoOp if the applied-marker already occurs in the content.
///
/// The marker is a literal substring the caller chose to uniquely identify
/// the patched state; its presence means the file needs nothing.
pub fn plan_noop_guard(content: &str, applied_marker: &str) -> Option<Patch> {
    if content.contains(applied_marker) {
        Some(Patch::NoOp)
    } else {
        None
    }
}

/// Plan an insertion of `text` immediately after the anchor's last line.
///
/// A newline is ensured between the anchor line and the block, and between
/// the block and the next original line when one exists.
pub fn plan_insert_after(content: &str, anchor: Anchor, text: &str) -> Patch {
    let (offset, line_terminated) = insertion_point(content, anchor.last_line());

    let mut block = String::new();
    if !line_terminated {
        block.push('\n');
    }
    block.push_str(text);
    if !block.ends_with('\n') && offset < content.len() {
        block.push('\n');
    }

    Patch::InsertAfter {
        anchor,
        splice: Splice {
            byte_start: offset,
            byte_end: offset,
            text: block,
        },
    }
}

/// Plan a replacement of the anchor's lines with `text`.
///
/// Surrounding lines are untouched; the replacement keeps a trailing
/// terminator when the replaced region had one.
pub fn plan_replace_region(content: &str, anchor: Anchor, text: &str) -> Patch {
    let region = anchor.span();
    let (byte_start, byte_end) = region_bytes(content, region);

    let mut replacement = text.to_string();
    if content[byte_start..byte_end].ends_with('\n') && !replacement.ends_with('\n') {
        replacement.push('\n');
    }

    Patch::ReplaceRegion {
        region,
        splice: Splice {
            byte_start,
            byte_end,
            text: replacement,
        },
    }
}

/// Plan an unconditional whole-file replacement.
pub fn plan_overwrite(text: &str) -> Patch {
    Patch::Overwrite {
        text: text.to_string(),
    }
}

/// Plan a write that only happens when the target has no content yet.
///
/// A missing file reads as an empty snapshot, and an existing empty file is
/// treated the same way, so the payload lands in both cases.
pub fn plan_create_if_missing(content: &str, text: &str) -> Patch {
    if content.is_empty() {
        plan_overwrite(text)
    } else {
        Patch::NoOp
    }
}

/// Apply a single patch to the snapshot it was planned from.
pub fn apply(patch: &Patch, content: &str) -> Result<String, PatchError> {
    apply_all(content, std::slice::from_ref(patch))
}

/// Apply a file's whole batch of patches against one snapshot.
///
/// Callers must have rejected overlapping patches first (`find_overlap`).
/// Splices run bottom-to-top so snapshot offsets stay valid throughout.
pub fn apply_all(content: &str, patches: &[Patch]) -> Result<String, PatchError> {
    // A lone overwrite replaces everything; combinations with other patches
    // were rejected as overlapping before this point.
    for patch in patches {
        if let Patch::Overwrite { text } = patch {
            return Ok(text.clone());
        }
    }

    let mut splices: Vec<&Splice> = Vec::new();
    for patch in patches {
        match patch {
            Patch::NoOp | Patch::Overwrite { .. } => {}
            Patch::InsertAfter { splice, .. } | Patch::ReplaceRegion { splice, .. } => {
                splices.push(splice);
            }
        }
    }

    for splice in &splices {
        if splice.byte_start > splice.byte_end || splice.byte_end > content.len() {
            return Err(PatchError::InvalidSplice {
                byte_start: splice.byte_start,
                byte_end: splice.byte_end,
                content_len: content.len(),
            });
        }
    }

    // Descending by start; an insertion that coincides with a replacement
    // boundary must run after the replacement, so ties break by end.
    splices.sort_by(|a, b| {
        b.byte_start
            .cmp(&a.byte_start)
            .then(b.byte_end.cmp(&a.byte_end))
    });

    let mut result = content.to_string();
    for splice in splices {
        result.replace_range(splice.byte_start..splice.byte_end, &splice.text);
    }
    Ok(result)
}

/// Find the first pair of patches whose resolved extents overlap, by index.
///
/// Insertions occupy the gap after their anchor line; replacements occupy
/// their line range; an overwrite covers the whole file and collides with
/// everything, including another overwrite. No-ops collide with nothing.
pub fn find_overlap(patches: &[Patch]) -> Option<(usize, usize)> {
    for i in 0..patches.len() {
        for j in (i + 1)..patches.len() {
            if overlaps(extent(&patches[i]), extent(&patches[j])) {
                return Some((i, j));
            }
        }
    }
    None
}

#[derive(Debug, Clone, Copy)]
enum Extent {
    Empty,
    /// The gap between a line and its successor
    Gap(usize),
    /// An inclusive line range
    Lines(usize, usize),
    Whole,
}

fn extent(patch: &Patch) -> Extent {
    match patch {
        Patch::NoOp => Extent::Empty,
        Patch::InsertAfter { anchor, .. } => Extent::Gap(anchor.last_line()),
        Patch::ReplaceRegion { region, .. } => Extent::Lines(region.start, region.end),
        Patch::Overwrite { .. } => Extent::Whole,
    }
}

fn overlaps(a: Extent, b: Extent) -> bool {
    use Extent::*;
    match (a, b) {
        (Empty, _) | (_, Empty) => false,
        (Whole, _) | (_, Whole) => true,
        (Gap(p), Gap(q)) => p == q,
        // The gap after line p is interior to [s, e] unless it touches the
        // region's outer boundary.
        (Gap(p), Lines(s, e)) | (Lines(s, e), Gap(p)) => s <= p && p < e,
        (Lines(s1, e1), Lines(s2, e2)) => s1 <= e2 && s2 <= e1,
    }
}

/// Byte offset just past line `line` (terminator included), and whether that
/// line carries a terminator. Indices past the last line clamp to EOF.
fn insertion_point(content: &str, line: usize) -> (usize, bool) {
    let mut offset = 0;
    for (index, segment) in content.split_inclusive('\n').enumerate() {
        offset += segment.len();
        if index == line {
            return (offset, segment.ends_with('\n'));
        }
    }
    (content.len(), content.is_empty() || content.ends_with('\n'))
}

/// Byte range covering `span`'s lines, terminator of the last line included.
fn region_bytes(content: &str, span: Span) -> (usize, usize) {
    let mut offset = 0;
    let mut start = None;
    for (index, segment) in content.split_inclusive('\n').enumerate() {
        if index == span.start {
            start = Some(offset);
        }
        offset += segment.len();
        if index == span.end {
            return (start.unwrap_or(offset), offset);
        }
    }
    match start {
        Some(byte_start) => (byte_start, content.len()),
        None => (content.len(), content.len()),
    }
}
