//! Summary Extraction
//!
//! Produces a short human summary of a run. Runners print very different
//! banners, so a list of strategies is tried in order and the first one
//! that matches wins:
//!
//! 1. the failures section (pytest `FAILURES`/`ERRORS`, unittest
//!    `FAIL:`/`ERROR:` headers) condensed to the failing tests and the
//!    final tally
//! 2. the last `==== ... ====` banner that carries text
//! 3. a unittest `Ran N tests in Xs` line with its verdict
//! 4. the last five non-empty lines
//!
//! The result is never empty.

use regex::Regex;
use std::sync::OnceLock;
use test_relay_core::{OutputStyle, RunnerKind};

/// Returned when the output has no non-empty line at all.
pub const NO_OUTPUT_SUMMARY: &str = "No output captured";

const FALLBACK_LINES: usize = 5;

fn banner() -> &'static Regex {
    static BANNER: OnceLock<Regex> = OnceLock::new();
    BANNER.get_or_init(|| Regex::new(r"^=+ (?P<text>.+?) =+$").expect("banner pattern is valid"))
}

fn pytest_failures_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^=+ (?:FAILURES|ERRORS) =+$").expect("failures header pattern is valid")
    })
}

fn pytest_failure_title() -> &'static Regex {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    TITLE.get_or_init(|| {
        Regex::new(r"^_{3,} (?P<name>.+?) _{3,}$").expect("failure title pattern is valid")
    })
}

fn unittest_failure_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^(?:FAIL|ERROR): \S+").expect("unittest failure header pattern is valid")
    })
}

fn ran_line() -> &'static Regex {
    static RAN: OnceLock<Regex> = OnceLock::new();
    RAN.get_or_init(|| {
        Regex::new(r"^Ran \d+ tests? in [\d.]+s").expect("ran line pattern is valid")
    })
}

/// Banners that frame sections rather than report an outcome.
fn is_section_banner(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    ["failures", "errors", "test session starts", "short test summary info", "warnings summary"]
        .iter()
        .any(|section| lowered == *section)
}

/// Extract a short human summary from runner output.
pub fn extract_summary(output: &str, runner: RunnerKind) -> String {
    let lines: Vec<&str> = output.lines().map(str::trim_end).collect();

    let failures = match runner.output_style() {
        OutputStyle::Pytest => pytest_failures_summary(&lines),
        OutputStyle::Unittest => unittest_failures_summary(&lines),
    };

    failures
        .or_else(|| last_banner(&lines))
        .or_else(|| ran_summary(&lines))
        .unwrap_or_else(|| last_lines(&lines))
}

// ============================================================================
// Strategies
// ============================================================================

fn pytest_failures_summary(lines: &[&str]) -> Option<String> {
    let start = lines.iter().position(|l| pytest_failures_header().is_match(l))?;
    let section = &lines[start + 1..];
    let mut picked: Vec<String> = Vec::new();

    let short_info = section.iter().position(|l| {
        banner()
            .captures(l)
            .and_then(|c| c.name("text"))
            .map(|t| t.as_str().eq_ignore_ascii_case("short test summary info"))
            .unwrap_or(false)
    });

    match short_info {
        Some(idx) => {
            picked.extend(
                section[idx + 1..]
                    .iter()
                    .take_while(|l| !banner().is_match(l))
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| l.trim().to_string()),
            );
        }
        None => {
            picked.extend(section.iter().filter_map(|l| {
                pytest_failure_title()
                    .captures(l)
                    .and_then(|c| c.name("name"))
                    .map(|name| format!("FAILED {}", name.as_str()))
            }));
        }
    }

    if let Some(tally) = last_banner(section) {
        picked.push(tally);
    }

    if picked.is_empty() {
        None
    } else {
        Some(picked.join("\n"))
    }
}

fn unittest_failures_summary(lines: &[&str]) -> Option<String> {
    let mut picked: Vec<String> = lines
        .iter()
        .filter(|l| unittest_failure_header().is_match(l))
        .map(|l| l.trim().to_string())
        .collect();
    if picked.is_empty() {
        return None;
    }
    if let Some(ran) = ran_summary(lines) {
        picked.push(ran);
    }
    Some(picked.join("\n"))
}

fn last_banner(lines: &[&str]) -> Option<String> {
    lines.iter().rev().find_map(|l| {
        let text = banner().captures(l)?.name("text")?.as_str().trim();
        if text.is_empty() || is_section_banner(text) {
            None
        } else {
            Some(text.to_string())
        }
    })
}

fn ran_summary(lines: &[&str]) -> Option<String> {
    let idx = lines.iter().rposition(|l| ran_line().is_match(l.trim()))?;
    let mut block = vec![lines[idx].trim().to_string()];
    if let Some(verdict) = lines[idx + 1..].iter().find(|l| !l.trim().is_empty()) {
        block.push(verdict.trim().to_string());
    }
    Some(block.join("\n"))
}

fn last_lines(lines: &[&str]) -> String {
    let non_empty: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if non_empty.is_empty() {
        return NO_OUTPUT_SUMMARY.to_string();
    }
    let from = non_empty.len().saturating_sub(FALLBACK_LINES);
    non_empty[from..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_FAILING: &str = "\
============================= test session starts ==============================
collected 2 items

tests/test_a.py::test_x PASSED                                           [ 50%]
tests/test_a.py::test_y FAILED                                           [100%]

=================================== FAILURES ===================================
___________________________________ test_y _____________________________________

    def test_y():
>       assert 1 == 2
E       assert 1 == 2

tests/test_a.py:5: AssertionError
=========================== short test summary info ============================
FAILED tests/test_a.py::test_y - assert 1 == 2
========================= 1 failed, 1 passed in 0.03s ==========================
";

    #[test]
    fn test_pytest_failures_use_short_summary() {
        let summary = extract_summary(PYTEST_FAILING, RunnerKind::Pytest);
        assert_eq!(
            summary,
            "FAILED tests/test_a.py::test_y - assert 1 == 2\n1 failed, 1 passed in 0.03s"
        );
    }

    #[test]
    fn test_pytest_failures_without_short_summary_use_titles() {
        let output = "\
=================================== FAILURES ===================================
___________________________________ test_y _____________________________________
E       assert 1 == 2
============================== 1 failed in 0.02s ===============================
";
        let summary = extract_summary(output, RunnerKind::Pytest);
        assert_eq!(summary, "FAILED test_y\n1 failed in 0.02s");
    }

    #[test]
    fn test_pytest_passing_uses_final_banner() {
        let output = "\
============================= test session starts ==============================
tests/test_a.py::test_x PASSED                                           [100%]

============================== 1 passed in 0.01s ===============================
";
        assert_eq!(extract_summary(output, RunnerKind::Pytest), "1 passed in 0.01s");
    }

    #[test]
    fn test_unittest_failures_with_ran_block() {
        let output = "\
test_add (m.C) ... ok
test_sub (m.C) ... FAIL

======================================================================
FAIL: test_sub (m.C)
----------------------------------------------------------------------
AssertionError: 1 != 2

----------------------------------------------------------------------
Ran 2 tests in 0.001s

FAILED (failures=1)
";
        let summary = extract_summary(output, RunnerKind::Unittest);
        assert_eq!(summary, "FAIL: test_sub (m.C)\nRan 2 tests in 0.001s\nFAILED (failures=1)");
    }

    #[test]
    fn test_unittest_passing_uses_ran_line() {
        let output = concat!(
            "test_add (m.C) ... ok\n\n",
            "----------------------------------------------------------------------\n",
            "Ran 1 test in 0.000s\n\nOK\n",
        );
        assert_eq!(
            extract_summary(output, RunnerKind::Nose2),
            "Ran 1 test in 0.000s\nOK"
        );
    }

    #[test]
    fn test_fallback_last_five_lines() {
        let output = "a\nb\n\nc\nd\ne\nf\n";
        assert_eq!(extract_summary(output, RunnerKind::Pytest), "b\nc\nd\ne\nf");
    }

    #[test]
    fn test_never_empty() {
        assert_eq!(extract_summary("", RunnerKind::Pytest), NO_OUTPUT_SUMMARY);
        assert_eq!(extract_summary("\n  \n", RunnerKind::Unittest), NO_OUTPUT_SUMMARY);
    }

    #[test]
    fn test_section_banners_are_skipped() {
        let output = "=== test session starts ===\nsomething broke\n";
        assert_eq!(
            extract_summary(output, RunnerKind::Pytest),
            "=== test session starts ===\nsomething broke"
        );
    }
}
