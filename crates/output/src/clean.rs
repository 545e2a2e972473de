//! Output Cleanup
//!
//! Normalizes raw runner output before parsing: terminal escape codes
//! are stripped, carriage-return progress redraws become separate lines
//! and runs of blank lines are collapsed.

use regex::Regex;
use std::sync::OnceLock;

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").expect("ANSI pattern is valid")
    })
}

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ansi_escape().replace_all(text, "").into_owned()
}

/// Clean raw combined output for parsing and display.
pub fn clean_output(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    let normalized = stripped.replace("\r\n", "\n").replace('\r', "\n");

    let mut cleaned = String::with_capacity(normalized.len());
    let mut blank_run = 0usize;
    for line in normalized.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }

    // Keep a single trailing newline at most
    while cleaned.ends_with("\n\n") {
        cleaned.pop();
    }
    if !raw.ends_with('\n') && !raw.ends_with("\r\n") {
        if cleaned.ends_with('\n') {
            cleaned.pop();
        }
    }
    cleaned
}
