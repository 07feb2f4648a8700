use regex::Regex;

/// Inclusive range of 0-based line indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A located position inside target content.
///
/// Locating an anchor never mutates anything; all finders are pure functions
/// over the content string, and absence is `None`. Indices are 0-based and
/// only surface 1-based in status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// A single line, located by substring containment
    Line(usize),
    /// A contiguous line range, inclusive on both ends
    Region(Span),
}

impl Anchor {
    /// The last line covered by this anchor; insertions go after it.
    pub fn last_line(&self) -> usize {
        match self {
            Anchor::Line(index) => *index,
            Anchor::Region(span) => span.end,
        }
    }

    /// The full line range this anchor covers.
    pub fn span(&self) -> Span {
        match self {
            Anchor::Line(index) => Span {
                start: *index,
                end: *index,
            },
            Anchor::Region(span) => *span,
        }
    }
}

/// Find the first line containing `needle` as a substring.
///
/// The containment check runs against the whole content, so multi-line
/// needles are permitted; the reported index is the line where the match
/// starts. Lowest index wins.
pub fn find_line(content: &str, needle: &str) -> Option<Anchor> {
    if content.is_empty() {
        return None;
    }
    let offset = content.find(needle)?;
    Some(Anchor::Line(line_of_offset(content, offset)))
}

/// Find a region starting at the first line satisfying `start_pred` and
/// ending at the first later line satisfying `end_pred`, inclusive.
pub fn find_region<S, E>(content: &str, start_pred: S, end_pred: E) -> Option<Anchor>
where
    S: Fn(&str) -> bool,
    E: Fn(&str) -> bool,
{
    if content.is_empty() {
        return None;
    }
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|line| start_pred(line))?;
    let end = lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, line)| end_pred(line))
        .map(|(index, _)| index)?;

    Some(Anchor::Region(Span { start, end }))
}

/// Find a block starting at the first line satisfying `start_pred` and
/// ending where the cumulative `open_ch`/`close_ch` count returns to the
/// value it held before the starting line.
///
/// This counts characters, it does not parse: occurrences inside string
/// literals and comments are counted too. Good enough for the block shapes
/// the recipes target; a block that never rebalances is absent.
pub fn find_balanced_block<S>(
    content: &str,
    start_pred: S,
    open_ch: char,
    close_ch: char,
) -> Option<Anchor>
where
    S: Fn(&str) -> bool,
{
    if content.is_empty() {
        return None;
    }
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.iter().position(|line| start_pred(line))?;

    let mut depth: i64 = 0;
    for (index, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            if ch == open_ch {
                depth += 1;
            } else if ch == close_ch {
                depth -= 1;
            }
        }
        if depth == 0 {
            return Some(Anchor::Region(Span { start, end: index }));
        }
    }

    None
}

/// Find the region covered by the first match of `pattern`.
pub fn find_regex(content: &str, pattern: &Regex) -> Option<Anchor> {
    if content.is_empty() {
        return None;
    }
    let found = pattern.find(content)?;
    let start = line_of_offset(content, found.start());
    let end = if found.end() > found.start() {
        line_of_offset(content, found.end() - 1)
    } else {
        start
    };

    Some(Anchor::Region(Span { start, end }))
}

/// 0-based line index of the byte at `offset`.
///
/// Counts over bytes, so `offset` does not need to fall on a character
/// boundary; UTF-8 continuation bytes are never `\n`.
pub(crate) fn line_of_offset(content: &str, offset: usize) -> usize {
    content.as_bytes()[..offset]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
}
