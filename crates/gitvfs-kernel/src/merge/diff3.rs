//! Line-based three-way text merge.
//!
//! Both sides are diffed against the base with `similar`. Changes from the
//! two sides that overlap or touch in base coordinates form one region; a
//! region changed by one side takes that side, a region changed identically
//! by both takes either, anything else becomes a conflict block.

use std::ops::Range;

use similar::{Algorithm, DiffTag, capture_diff_slices};

pub const OURS_MARKER: &str = "<<<<<<< ours";
pub const SEPARATOR_MARKER: &str = "=======";
pub const THEIRS_MARKER: &str = ">>>>>>> theirs";

/// Outcome of a text merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMerge {
    Clean(String),
    /// Merged text with conflict markers.
    Conflicted(String),
}

impl TextMerge {
    pub fn is_clean(&self) -> bool {
        matches!(self, TextMerge::Clean(_))
    }

    pub fn into_text(self) -> String {
        match self {
            TextMerge::Clean(text) | TextMerge::Conflicted(text) => text,
        }
    }
}

/// A change on one side: base lines `base` became side lines `side`.
#[derive(Debug, Clone)]
struct Hunk {
    base: Range<usize>,
    side: Range<usize>,
}

fn lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn hunks(base: &[&str], side: &[&str]) -> Vec<Hunk> {
    let mut out: Vec<Hunk> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, base, side) {
        let (tag, base_range, side_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            continue;
        }
        match out.last_mut() {
            Some(last) if last.base.end == base_range.start && last.side.end == side_range.start => {
                last.base.end = base_range.end;
                last.side.end = side_range.end;
            }
            _ => out.push(Hunk {
                base: base_range,
                side: side_range,
            }),
        }
    }
    out
}

/// Text of one side over base lines `start..end`, given that side's hunks
/// inside the region.
fn side_text(base: &[&str], side: &[&str], hunks: &[Hunk], start: usize, end: usize) -> String {
    let mut out = String::new();
    let mut pos = start;
    for hunk in hunks {
        out.extend(base[pos..hunk.base.start].iter().copied());
        out.extend(side[hunk.side.clone()].iter().copied());
        pos = hunk.base.end;
    }
    out.extend(base[pos..end].iter().copied());
    out
}

fn push_section(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
}

/// A conflict block holding both sides.
pub fn conflict_block(ours: &str, theirs: &str) -> String {
    let mut out = String::new();
    out.push_str(OURS_MARKER);
    out.push('\n');
    push_section(&mut out, ours);
    out.push_str(SEPARATOR_MARKER);
    out.push('\n');
    push_section(&mut out, theirs);
    out.push_str(THEIRS_MARKER);
    out.push('\n');
    out
}

/// Merge `ours` and `theirs`, both derived from `base`.
pub fn merge(base: &str, ours: &str, theirs: &str) -> TextMerge {
    let base_lines = lines(base);
    let ours_lines = lines(ours);
    let theirs_lines = lines(theirs);
    let ours_hunks = hunks(&base_lines, &ours_lines);
    let theirs_hunks = hunks(&base_lines, &theirs_lines);

    let mut out = String::new();
    let mut conflicted = false;
    let mut cursor = 0;
    let (mut i, mut j) = (0, 0);

    while i < ours_hunks.len() || j < theirs_hunks.len() {
        let start = match (ours_hunks.get(i), theirs_hunks.get(j)) {
            (Some(o), Some(t)) => o.base.start.min(t.base.start),
            (Some(o), None) => o.base.start,
            (None, Some(t)) => t.base.start,
            (None, None) => break,
        };

        // Grow the region until no hunk from either side touches it.
        let (first_ours, first_theirs) = (i, j);
        let mut end = start;
        loop {
            let mut grew = false;
            while let Some(hunk) = ours_hunks.get(i).filter(|h| h.base.start <= end) {
                end = end.max(hunk.base.end);
                i += 1;
                grew = true;
            }
            while let Some(hunk) = theirs_hunks.get(j).filter(|h| h.base.start <= end) {
                end = end.max(hunk.base.end);
                j += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }

        out.extend(base_lines[cursor..start].iter().copied());
        let ours_region = &ours_hunks[first_ours..i];
        let theirs_region = &theirs_hunks[first_theirs..j];
        let ours_text = side_text(&base_lines, &ours_lines, ours_region, start, end);
        let theirs_text = side_text(&base_lines, &theirs_lines, theirs_region, start, end);

        if theirs_region.is_empty() || ours_text == theirs_text {
            out.push_str(&ours_text);
        } else if ours_region.is_empty() {
            out.push_str(&theirs_text);
        } else {
            conflicted = true;
            out.push_str(&conflict_block(&ours_text, &theirs_text));
        }
        cursor = end;
    }
    out.extend(base_lines[cursor..].iter().copied());

    if conflicted {
        TextMerge::Conflicted(out)
    } else {
        TextMerge::Clean(out)
    }
}
