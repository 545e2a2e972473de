//! Test Relay - Rust Backend Library
//!
//! Runs Python test suites (pytest, unittest, nose2, `uv run pytest`) on
//! the host or in a throwaway Docker container, condenses their output
//! into a `TestResult` and persists it for later lookup.
//! It includes:
//! - Test execution services (validation, command building, runners, orchestrator)
//! - Storage layer (SQLite and in-memory result stores, JSON config)
//! - Data models and utilities

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export the domain model and output analysis crates
pub use test_relay_core::{
    CoreError, CoreResult, ExecutionMode, LastFailedSet, OutputStream, ProgressEvent, ResultStore,
    RunnerKind, TestExecutionConfig, TestExecutionConfigBuilder, TestOutcomes, TestResult,
    TestResultSummary, TestStatus,
};
pub use test_relay_output::{analyze, HeuristicTokenCounter, ParsedOutput, TokenCounter};

pub use models::settings::{ContainerSettings, RelaySettings, SettingsUpdate};
pub use services::execution::{StreamingRun, TestExecutionOrchestrator};
pub use storage::{ConfigService, Database, MemoryResultStore};
pub use utils::error::{AppError, AppResult};
