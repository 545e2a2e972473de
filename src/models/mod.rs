//! Data Models
//!
//! Application-level data structures. The test execution domain model
//! lives in `test_relay_core`.

pub mod settings;

pub use settings::*;
