//! Integration Tests Module
//!
//! End-to-end tests over the public library API: the orchestrator with
//! scripted and real subprocess runners, and the SQLite result store.

// Orchestrator runs against scripted runners and real subprocesses
mod orchestrator_test;

// SQLite result store persistence and last-failed bookkeeping
mod storage_test;
