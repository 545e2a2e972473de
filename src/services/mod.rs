//! Services
//!
//! Business logic services for the application.

pub mod execution;

pub use execution::{
    ContainerRunner, LocalProcessRunner, ProcessRunner, StreamingRun, TestExecutionOrchestrator,
};
