//! Test Relay Output
//!
//! Pure functions over raw test runner output: cleanup, per-test result
//! extraction for pytest/unittest/nose2, summary extraction and
//! token-budget truncation. Nothing here does I/O.
//!
//! ## Module Organization
//!
//! - `clean` - ANSI stripping and line normalization
//! - `parser` - passed/failed/skipped identifier extraction
//! - `summary` - ordered summary strategies with a never-empty fallback
//! - `tokens` - `TokenCounter` trait and the byte heuristic
//! - `truncate` - failure-preserving truncation to a token budget

pub mod clean;
pub mod parser;
pub mod summary;
pub mod tokens;
pub mod truncate;

pub use clean::{clean_output, strip_ansi};
pub use parser::extract_results;
pub use summary::{extract_summary, NO_OUTPUT_SUMMARY};
pub use tokens::{estimate_tokens, HeuristicTokenCounter, TokenCounter};
pub use truncate::{truncate_to_budget, TRUNCATION_MARKER};

use serde::{Deserialize, Serialize};
use test_relay_core::{RunnerKind, TestOutcomes};

/// Everything derived from one run's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub outcomes: TestOutcomes,
    pub summary: String,
    /// Cleaned output within the token budget
    pub details: String,
}

/// Clean `raw` once and run every extractor over it.
pub fn analyze(
    raw: &str,
    runner: RunnerKind,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> ParsedOutput {
    let cleaned = clean_output(raw);
    ParsedOutput {
        outcomes: extract_results(&cleaned, runner),
        summary: extract_summary(&cleaned, runner),
        details: truncate_to_budget(&cleaned, max_tokens, counter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_colored_pytest_output() {
        let raw = "\x1b[1mtests/test_a.py::test_x \x1b[32mPASSED\x1b[0m\r\n\
                   tests/test_a.py::test_y \x1b[31mFAILED\x1b[0m\r\n\
                   \x1b[31m==== 1 failed, 1 passed in 0.02s ====\x1b[0m\r\n";
        let parsed = analyze(raw, RunnerKind::Pytest, 4000, &HeuristicTokenCounter::default());

        assert_eq!(parsed.outcomes.passed, vec!["tests/test_a.py::test_x"]);
        assert_eq!(parsed.outcomes.failed, vec!["tests/test_a.py::test_y"]);
        assert_eq!(parsed.summary, "1 failed, 1 passed in 0.02s");
        assert!(!parsed.details.contains('\x1b'));
        assert!(!parsed.details.contains('\r'));
    }

    #[test]
    fn test_analyze_empty_output() {
        let parsed = analyze("", RunnerKind::Unittest, 10, &HeuristicTokenCounter::default());
        assert!(parsed.outcomes.is_empty());
        assert_eq!(parsed.summary, NO_OUTPUT_SUMMARY);
        assert_eq!(parsed.details, "");
    }
}
