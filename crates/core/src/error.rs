//! Core Error Types
//!
//! Error vocabulary shared by every crate in the Test Relay workspace.
//! Only `thiserror` and std are involved so the leaf crates stay light;
//! the application crate wraps these in its own `AppError`.

use thiserror::Error;

/// Core error type for the Test Relay workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Caller supplied an unusable configuration (bad path, unknown runner, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A field failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A stored or textual value could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Store backend failure
    #[error("Store error: {0}")]
    Store(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether this error means the caller asked for something invalid,
    /// as opposed to something going wrong at runtime.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, CoreError::Config(_) | CoreError::Validation(_))
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
