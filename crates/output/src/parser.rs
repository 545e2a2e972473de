//! Result Extraction
//!
//! Turns verbose runner output into passed/failed/skipped identifier
//! lists. The runner's output style is chosen once per call; lines that
//! match nothing are ignored and parsing never fails.
//!
//! Identifiers are returned in the order they appear. Duplicates (pytest
//! prints failures both inline and in its short summary) are left in;
//! callers de-duplicate.

use regex::Regex;
use std::sync::OnceLock;
use test_relay_core::{OutputStyle, RunnerKind, TestOutcomes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Passed,
    Failed,
    Skipped,
}

impl Bucket {
    fn push(self, outcomes: &mut TestOutcomes, id: String) {
        match self {
            Bucket::Passed => outcomes.passed.push(id),
            Bucket::Failed => outcomes.failed.push(id),
            Bucket::Skipped => outcomes.skipped.push(id),
        }
    }
}

/// Extract per-test outcomes from runner output.
pub fn extract_results(output: &str, runner: RunnerKind) -> TestOutcomes {
    let outcomes = match runner.output_style() {
        OutputStyle::Pytest => parse_pytest(output),
        OutputStyle::Unittest => parse_unittest(output),
    };
    tracing::debug!(
        runner = %runner,
        passed = outcomes.passed.len(),
        failed = outcomes.failed.len(),
        skipped = outcomes.skipped.len(),
        "Extracted test outcomes"
    );
    outcomes
}

// ============================================================================
// pytest
// ============================================================================

fn pytest_node_id() -> &'static Regex {
    static NODE_ID: OnceLock<Regex> = OnceLock::new();
    NODE_ID.get_or_init(|| {
        Regex::new(r"(?P<id>[^\s]+\.py::[^\s]+)").expect("pytest node id pattern is valid")
    })
}

fn pytest_status_word(word: &str) -> Option<Bucket> {
    match word {
        "PASSED" | "XPASS" => Some(Bucket::Passed),
        "FAILED" | "ERROR" => Some(Bucket::Failed),
        "SKIPPED" | "XFAIL" => Some(Bucket::Skipped),
        _ => None,
    }
}

fn parse_pytest(output: &str) -> TestOutcomes {
    let mut outcomes = TestOutcomes::default();

    for line in output.lines() {
        let Some(caps) = pytest_node_id().captures(line) else {
            continue;
        };
        let Some(id_match) = caps.name("id") else {
            continue;
        };

        // `id STATUS [ 50%]` (verbose) or `STATUS id - reason` (short summary, xdist)
        let after = line[id_match.end()..].split_whitespace().next();
        let before = line[..id_match.start()].split_whitespace().last();
        let bucket = after
            .and_then(pytest_status_word)
            .or_else(|| before.and_then(pytest_status_word))
            .or_else(|| {
                if line.contains("FAILED") {
                    Some(Bucket::Failed)
                } else if line.contains("PASSED") {
                    Some(Bucket::Passed)
                } else if line.contains("SKIPPED") {
                    Some(Bucket::Skipped)
                } else {
                    None
                }
            });

        if let Some(bucket) = bucket {
            bucket.push(&mut outcomes, id_match.as_str().to_string());
        }
    }

    outcomes
}

// ============================================================================
// unittest / nose2
// ============================================================================

fn unittest_test_line() -> &'static Regex {
    static TEST_LINE: OnceLock<Regex> = OnceLock::new();
    TEST_LINE.get_or_init(|| {
        Regex::new(r"^(?P<name>\w+) \((?P<origin>[\w.]+)\)(?P<rest>.*)$")
            .expect("unittest result pattern is valid")
    })
}

fn unittest_failure_header() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(r"^(?:FAIL|ERROR): (?P<name>\w+) \((?P<origin>[\w.]+)\)")
            .expect("unittest failure header pattern is valid")
    })
}

fn unittest_failed_summary() -> &'static Regex {
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    SUMMARY.get_or_init(|| {
        Regex::new(r"^FAILED \((?:failures|errors)=\d+").expect("unittest summary pattern is valid")
    })
}

/// Rebuild the dotted `module.Class.method` identifier.
///
/// Python 3.11+ already prints the full dotted path inside the
/// parentheses; older versions print only `module.Class`.
fn unittest_id(name: &str, origin: &str) -> String {
    if origin.ends_with(&format!(".{}", name)) {
        origin.to_string()
    } else {
        format!("{}.{}", origin, name)
    }
}

/// Assertion failures and errors both land in the failed bucket.
fn unittest_outcome(text: &str) -> Option<Bucket> {
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }
    if lowered == "ok" || lowered == "unexpected success" {
        Some(Bucket::Passed)
    } else if lowered == "fail" || lowered == "error" {
        Some(Bucket::Failed)
    } else if lowered.starts_with("skip") || lowered == "expected failure" {
        Some(Bucket::Skipped)
    } else {
        None
    }
}

fn parse_unittest(output: &str) -> TestOutcomes {
    let mut outcomes = TestOutcomes::default();
    // Test whose result lands on a later line because the test printed something
    let mut pending: Option<String> = None;

    for line in output.lines() {
        if let Some(caps) = unittest_test_line().captures(line) {
            let name = caps.name("name").map(|m| m.as_str()).unwrap_or_default();
            let origin = caps.name("origin").map(|m| m.as_str()).unwrap_or_default();
            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
            let id = unittest_id(name, origin);

            match rest.trim_start().strip_prefix("...") {
                Some(result_text) => match unittest_outcome(result_text) {
                    Some(bucket) => {
                        bucket.push(&mut outcomes, id);
                        pending = None;
                    }
                    None => pending = Some(id),
                },
                None => pending = None,
            }
            continue;
        }

        if let Some(bucket) = unittest_outcome(line) {
            if let Some(id) = pending.take() {
                bucket.push(&mut outcomes, id);
            }
        }
    }

    if outcomes.failed.is_empty() && output.lines().any(|l| unittest_failed_summary().is_match(l)) {
        tracing::debug!(
            "Verbose result lines missing failures; falling back to FAIL/ERROR headers"
        );
        for line in output.lines() {
            if let Some(caps) = unittest_failure_header().captures(line) {
                let name = caps.name("name").map(|m| m.as_str()).unwrap_or_default();
                let origin = caps.name("origin").map(|m| m.as_str()).unwrap_or_default();
                outcomes.failed.push(unittest_id(name, origin));
            }
        }
    }

    outcomes
}
