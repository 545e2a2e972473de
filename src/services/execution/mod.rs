//! Test Execution
//!
//! Everything between a `TestExecutionConfig` and a stored `TestResult`:
//! host-side validation, runner command building, local and container
//! process runners, and the orchestrator tying them together.

pub mod command;
pub mod container;
pub mod local;
pub mod orchestrator;
pub mod process;
pub mod validation;

pub use command::CommandBuilder;
pub use container::{ContainerRunner, CONTAINER_PREFIX};
pub use local::LocalProcessRunner;
pub use orchestrator::{
    StreamingRun, TestExecutionOrchestrator, CANCELLED_SUMMARY, NO_TESTS_SUMMARY,
};
pub use process::{ExecutionRequest, ProcessOutput, ProcessRunner};
pub use validation::{validate_config, TestTarget, ValidatedConfig};
