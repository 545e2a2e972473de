//! Token-Budget Truncation
//!
//! Shrinks run output to a token budget while keeping what an LLM needs
//! most: the failure details. When a failures section is present the
//! output is cut down to a short head, the section itself (or its first
//! few failure blocks) and a short tail. Without one, the first and last
//! lines are kept.
//!
//! The returned text always fits the budget, so truncating an already
//! truncated text with the same budget returns it unchanged.

use regex::Regex;
use std::sync::OnceLock;

use crate::tokens::TokenCounter;

/// Inserted wherever content was elided.
pub const TRUNCATION_MARKER: &str = "... [truncated] ...";

/// Lines kept before a failures section
const HEAD_CONTEXT: usize = 10;
/// Lines kept after the retained failure blocks
const TAIL_CONTEXT: usize = 10;
/// Failure blocks kept before eliding the rest
const MAX_FAILURE_BLOCKS: usize = 3;
/// Lines kept at each end when there is no failures section
const EDGE_LINES: usize = 20;

fn pytest_failures_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^=+ (?:FAILURES|ERRORS) =+$").expect("failures header pattern is valid")
    })
}

fn pytest_block_title() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| Regex::new(r"^_{3,} .+ _{3,}$").expect("block title pattern is valid"))
}

fn unittest_separator() -> &'static Regex {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    SEPARATOR.get_or_init(|| Regex::new(r"^={20,}$").expect("separator pattern is valid"))
}

fn unittest_failure_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^(?:FAIL|ERROR): ").expect("unittest failure header pattern is valid")
    })
}

/// `true` when `lines[idx]` opens a unittest failure block.
fn is_unittest_block_start(lines: &[&str], idx: usize) -> bool {
    unittest_separator().is_match(lines[idx])
        && lines
            .get(idx + 1)
            .map(|next| unittest_failure_header().is_match(next))
            .unwrap_or(false)
}

/// Truncate `text` so that `counter` reports at most `max_tokens` tokens.
pub fn truncate_to_budget(text: &str, max_tokens: usize, counter: &dyn TokenCounter) -> String {
    let tokens = counter.count(text);
    if tokens <= max_tokens {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    let candidate = match find_failures_start(&lines) {
        Some(start) => failure_focused(&lines, start, max_tokens, counter),
        None => head_and_tail(&lines),
    };

    let truncated = fit_within(&candidate, max_tokens, counter);
    tracing::debug!(
        original_tokens = tokens,
        max_tokens,
        truncated_tokens = counter.count(&truncated),
        "Truncated output to token budget"
    );
    truncated
}

// ============================================================================
// Section detection
// ============================================================================

fn find_failures_start(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .position(|l| pytest_failures_header().is_match(l))
        .or_else(|| (0..lines.len()).find(|&i| is_unittest_block_start(lines, i)))
}

fn failure_block_starts(lines: &[&str], from: usize) -> Vec<usize> {
    (from..lines.len())
        .filter(|&i| pytest_block_title().is_match(lines[i]) || is_unittest_block_start(lines, i))
        .collect()
}

// ============================================================================
// Candidates
// ============================================================================

fn push_lines(out: &mut Vec<String>, lines: &[&str]) {
    out.extend(lines.iter().map(|l| l.to_string()));
}

fn head_lines(lines: &[&str], start: usize) -> Vec<String> {
    let mut out = Vec::new();
    if start > HEAD_CONTEXT {
        push_lines(&mut out, &lines[..HEAD_CONTEXT]);
        out.push(TRUNCATION_MARKER.to_string());
    } else {
        push_lines(&mut out, &lines[..start]);
    }
    out
}

fn failure_focused(
    lines: &[&str],
    start: usize,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> String {
    let head = head_lines(lines, start);

    let mut whole_section = head.clone();
    push_lines(&mut whole_section, &lines[start..]);
    let whole_section = whole_section.join("\n");
    if counter.count(&whole_section) <= max_tokens {
        return whole_section;
    }

    let blocks = failure_block_starts(lines, start);
    if blocks.len() <= MAX_FAILURE_BLOCKS {
        return whole_section;
    }

    let keep_until = blocks[MAX_FAILURE_BLOCKS];
    let mut out = head;
    push_lines(&mut out, &lines[start..keep_until]);
    out.push(format!(
        "... [{} more failures truncated] ...",
        blocks.len() - MAX_FAILURE_BLOCKS
    ));
    let tail_from = lines.len().saturating_sub(TAIL_CONTEXT).max(keep_until);
    if tail_from < lines.len() {
        if tail_from > keep_until {
            out.push(TRUNCATION_MARKER.to_string());
        }
        push_lines(&mut out, &lines[tail_from..]);
    }
    out.join("\n")
}

fn head_and_tail(lines: &[&str]) -> String {
    if lines.len() <= EDGE_LINES * 2 {
        return lines.join("\n");
    }
    let mut out = Vec::with_capacity(EDGE_LINES * 2 + 1);
    push_lines(&mut out, &lines[..EDGE_LINES]);
    out.push(TRUNCATION_MARKER.to_string());
    push_lines(&mut out, &lines[lines.len() - EDGE_LINES..]);
    out.join("\n")
}

// ============================================================================
// Hard limit
// ============================================================================

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Keep `keep` bytes split three to one between the start and the end.
fn squeeze(text: &str, keep: usize) -> String {
    let head_len = floor_boundary(text, keep * 3 / 4);
    let tail_start = ceil_boundary(text, text.len() - (keep - keep * 3 / 4));
    let tail_start = tail_start.max(head_len);
    format!(
        "{}\n{}\n{}",
        &text[..head_len],
        TRUNCATION_MARKER,
        &text[tail_start..]
    )
}

/// Enforce the budget on a candidate that may still be too long.
fn fit_within(candidate: &str, max_tokens: usize, counter: &dyn TokenCounter) -> String {
    if counter.count(candidate) <= max_tokens {
        return candidate.to_string();
    }

    let mut best: Option<String> = None;
    let (mut low, mut high) = (0usize, candidate.len());
    while low <= high {
        let mid = low + (high - low) / 2;
        let squeezed = squeeze(candidate, mid);
        if counter.count(&squeezed) <= max_tokens {
            best = Some(squeezed);
            low = mid + 1;
        } else if mid == 0 {
            break;
        } else {
            high = mid - 1;
        }
    }

    if let Some(best) = best {
        return best;
    }
    if counter.count(TRUNCATION_MARKER) <= max_tokens {
        TRUNCATION_MARKER.to_string()
    } else {
        String::new()
    }
}
