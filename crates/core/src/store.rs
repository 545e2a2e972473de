//! Result Store Trait
//!
//! Durable keyed storage for test results plus the per-project
//! "last failed" set. The application crate provides a SQLite-backed
//! implementation and an in-memory one; the orchestrator only sees this
//! trait, so any relational or embedded backend can be plugged in.

use async_trait::async_trait;

use crate::error::CoreResult;
use crate::models::{LastFailedSet, TestExecutionConfig, TestResult, TestResultSummary};

/// Storage contract consumed by the orchestrator.
///
/// Implementations own persisted rows exclusively once `store_result`
/// returns; callers keep no references into them.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a finished run.
    ///
    /// When `result.failed_tests` is non-empty the last-failed set for
    /// `result.project_path` is overwritten with it as part of the same
    /// write. Last writer wins between concurrent runs on one project.
    async fn store_result(
        &self,
        result: &TestResult,
        config: &TestExecutionConfig,
    ) -> CoreResult<()>;

    /// Fetch one result by id.
    async fn get_result(&self, id: &str) -> CoreResult<Option<TestResult>>;

    /// Most recent results first.
    async fn list_results(&self, limit: usize) -> CoreResult<Vec<TestResultSummary>>;

    /// Full last-failed record for a project, if any run of it ever failed.
    async fn get_last_failed_set(&self, project_path: &str) -> CoreResult<Option<LastFailedSet>>;

    /// Failed identifiers from the last failing run of a project.
    async fn get_last_failed(&self, project_path: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .get_last_failed_set(project_path)
            .await?
            .map(|set| set.tests)
            .unwrap_or_default())
    }
}
