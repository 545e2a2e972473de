//! In-Memory Result Store
//!
//! Process-local `ResultStore` for embedding the orchestrator without a
//! database file, and for tests. Contents are lost when dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use test_relay_core::{
    CoreResult, LastFailedSet, ResultStore, TestExecutionConfig, TestResult, TestResultSummary,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    /// Insertion order, oldest first
    order: Vec<String>,
    results: HashMap<String, TestResult>,
    last_failed: HashMap<String, LastFailedSet>,
}

/// `ResultStore` kept entirely in memory.
#[derive(Default)]
pub struct MemoryResultStore {
    state: RwLock<MemoryState>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the last-failed set of a project.
    pub async fn set_last_failed(&self, project_path: &str, tests: Vec<String>) {
        let mut state = self.state.write().await;
        state.last_failed.insert(
            project_path.to_string(),
            LastFailedSet {
                project_path: project_path.to_string(),
                tests,
                updated_at: Utc::now(),
            },
        );
    }

    /// Number of stored results
    pub async fn len(&self) -> usize {
        self.state.read().await.results.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn store_result(
        &self,
        result: &TestResult,
        _config: &TestExecutionConfig,
    ) -> CoreResult<()> {
        let mut state = self.state.write().await;
        if state.results.insert(result.id.clone(), result.clone()).is_none() {
            state.order.push(result.id.clone());
        }
        if !result.failed_tests.is_empty() {
            state.last_failed.insert(
                result.project_path.clone(),
                LastFailedSet {
                    project_path: result.project_path.clone(),
                    tests: result.failed_tests.clone(),
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(())
    }

    async fn get_result(&self, id: &str) -> CoreResult<Option<TestResult>> {
        Ok(self.state.read().await.results.get(id).cloned())
    }

    async fn list_results(&self, limit: usize) -> CoreResult<Vec<TestResultSummary>> {
        let state = self.state.read().await;
        let mut summaries: Vec<TestResultSummary> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.results.get(id))
            .map(TestResult::to_summary)
            .collect();
        // stable sort keeps insertion order among equal timestamps
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn get_last_failed_set(&self, project_path: &str) -> CoreResult<Option<LastFailedSet>> {
        Ok(self.state.read().await.last_failed.get(project_path).cloned())
    }
}
