//! Test Relay Core
//!
//! Shared vocabulary for the Test Relay workspace: error types, the test
//! execution domain model, progress events and the result store trait.
//! Nothing here spawns processes or touches a database.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `models` - Runner kinds, execution config, test results and statuses
//! - `builders` - Validating builder for `TestExecutionConfig`
//! - `streaming` - Progress events emitted during a run
//! - `store` - `ResultStore` trait implemented by the storage backends

pub mod builders;
pub mod error;
pub mod models;
pub mod store;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Domain Model ───────────────────────────────────────────────────────
pub use models::{
    ExecutionMode, LastFailedSet, OutputStyle, RunnerKind, TestExecutionConfig, TestOutcomes,
    TestResult, TestResultSummary, TestStatus, DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT_SECS,
};

// ── Builder ────────────────────────────────────────────────────────────
pub use builders::TestExecutionConfigBuilder;

// ── Store Trait ────────────────────────────────────────────────────────
pub use store::ResultStore;

// ── Progress Events ────────────────────────────────────────────────────
pub use streaming::{OutputStream, ProgressEvent};
