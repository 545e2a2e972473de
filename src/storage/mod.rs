//! Storage Layer
//!
//! Handles all data persistence: the SQLite result store, the in-memory
//! result store and the JSON config.

pub mod config;
pub mod database;
pub mod memory;

pub use config::*;
pub use database::*;
pub use memory::*;
