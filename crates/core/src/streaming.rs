//! Progress Event Types
//!
//! Live feedback emitted while a test run is in flight. These events are
//! purely for UX: the terminal `TestResult` travels on its own channel and
//! is the only thing persisted or queried.

use serde::{Deserialize, Serialize};

/// Which pipe a line of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "STDOUT"),
            OutputStream::Stderr => write!(f, "STDERR"),
        }
    }
}

/// Progress event for one test run, correlated by result id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The command is about to be started
    Started {
        result_id: String,
        command: Vec<String>,
    },

    /// One line of runner output, in arrival order
    Output { stream: OutputStream, line: String },

    /// Container lifecycle note (created, removed, ...)
    Container { message: String },

    /// The process or container is gone
    Finished {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        timed_out: bool,
    },

    /// The final result has been written to the store
    Stored { result_id: String },

    /// Something went wrong; the run still ends with a result
    Error { message: String },
}

impl ProgressEvent {
    /// Human-readable single line, as printed by console consumers.
    pub fn to_display_line(&self) -> String {
        match self {
            ProgressEvent::Started { result_id, command } => {
                format!("--- Starting test run {} : {} ---", result_id, command.join(" "))
            }
            ProgressEvent::Output { stream, line } => format!("{}: {}", stream, line),
            ProgressEvent::Container { message } => format!("CONTAINER: {}", message),
            ProgressEvent::Finished {
                exit_code,
                timed_out,
            } => {
                if *timed_out {
                    "Process timed out".to_string()
                } else {
                    match exit_code {
                        Some(code) => format!("Process completed with return code: {}", code),
                        None => "Process completed without an exit code".to_string(),
                    }
                }
            }
            ProgressEvent::Stored { result_id } => format!("RESULT_STORED:{}", result_id),
            ProgressEvent::Error { message } => format!("ERROR: {}", message),
        }
    }
}
