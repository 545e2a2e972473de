//! Test Execution Orchestrator
//!
//! Entry point of a test run: validates the configuration, looks up the
//! last-failed set when asked to, builds the runner command, hands it to
//! the local or container `ProcessRunner`, turns the output into a
//! `TestResult` and persists it.
//!
//! Configuration problems are returned as errors before anything is
//! spawned. Everything that goes wrong afterwards ends up in the returned
//! (and stored) result with status `error`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use test_relay_core::{
    ExecutionMode, ProgressEvent, ResultStore, TestExecutionConfig, TestResult, TestStatus,
};
use test_relay_output::{analyze, truncate_to_budget, HeuristicTokenCounter, TokenCounter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::command::CommandBuilder;
use super::container::ContainerRunner;
use super::local::LocalProcessRunner;
use super::process::{emit, ExecutionRequest, ProcessOutput, ProcessRunner};
use super::validation::{validate_config, ValidatedConfig};
use crate::models::settings::RelaySettings;
use crate::utils::error::{AppError, AppResult};

/// Capacity of the progress channel handed out by `run_streaming`
const EVENT_BUFFER: usize = 256;

/// Summary prefix of runs that collected nothing
pub const NO_TESTS_SUMMARY: &str = "No tests found or executed.";

/// Summary of cancelled runs
pub const CANCELLED_SUMMARY: &str = "Test run cancelled";

/// A run started with [`TestExecutionOrchestrator::run_streaming`].
pub struct StreamingRun {
    /// Id the final result will be stored under
    pub result_id: String,
    /// Progress events; closed once the result is stored
    pub events: mpsc::Receiver<ProgressEvent>,
    handle: JoinHandle<TestResult>,
    cancel: CancellationToken,
}

impl StreamingRun {
    /// Stop the run; it still finishes with a stored `error` result.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the final result. Events not yet received are discarded.
    pub async fn finish(self) -> AppResult<TestResult> {
        let StreamingRun { events, handle, .. } = self;
        drop(events);
        handle
            .await
            .map_err(|e| AppError::internal(format!("Test run task failed: {}", e)))
    }
}

/// Runs tests and records their results.
#[derive(Clone)]
pub struct TestExecutionOrchestrator {
    store: Arc<dyn ResultStore>,
    local: Arc<dyn ProcessRunner>,
    container: Arc<dyn ProcessRunner>,
    counter: Arc<dyn TokenCounter>,
    settings: Arc<RelaySettings>,
    commands: CommandBuilder,
}

impl TestExecutionOrchestrator {
    /// Orchestrator with the host and Docker runners configured from `settings`.
    pub fn new(settings: RelaySettings, store: Arc<dyn ResultStore>) -> Self {
        let grace = Duration::from_secs(settings.terminate_grace_secs);
        let local = Arc::new(LocalProcessRunner::new(grace));
        let container = Arc::new(ContainerRunner::new(settings.container.clone(), grace));
        Self::with_runners(settings, store, local, container)
    }

    /// Orchestrator with explicit runners.
    pub fn with_runners(
        settings: RelaySettings,
        store: Arc<dyn ResultStore>,
        local: Arc<dyn ProcessRunner>,
        container: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            store,
            local,
            container,
            counter: Arc::new(HeuristicTokenCounter::default()),
            commands: CommandBuilder::new(&settings),
            settings: Arc::new(settings),
        }
    }

    /// Replace the token counter used for the detail budget.
    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Run tests and return the stored result.
    pub async fn run(&self, config: TestExecutionConfig) -> AppResult<TestResult> {
        self.run_with_cancel(config, CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        config: TestExecutionConfig,
        cancel: CancellationToken,
    ) -> AppResult<TestResult> {
        let validated = validate_config(&config)?;
        let result_id = Uuid::new_v4().to_string();
        Ok(self.execute(result_id, validated, None, cancel).await)
    }

    /// Start a run in the background and stream its progress.
    ///
    /// Validation happens before this returns, so configuration errors
    /// are reported here rather than through the event stream.
    pub fn run_streaming(&self, config: TestExecutionConfig) -> AppResult<StreamingRun> {
        let validated = validate_config(&config)?;
        let result_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let this = self.clone();
        let id = result_id.clone();
        let task_cancel = cancel.clone();
        let handle =
            tokio::spawn(async move { this.execute(id, validated, Some(tx), task_cancel).await });

        Ok(StreamingRun {
            result_id,
            events: rx,
            handle,
            cancel,
        })
    }

    async fn execute(
        &self,
        result_id: String,
        validated: ValidatedConfig,
        events: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> TestResult {
        let started = Instant::now();
        let created_at = Utc::now();
        let config = &validated.config;
        let project_key = validated.project_key();

        let last_failed = if config.rerun_last_failed {
            match self.store.get_last_failed(&project_key).await {
                Ok(ids) => {
                    if ids.is_empty() {
                        tracing::info!(
                            project = %project_key,
                            "No last-failed tests recorded; running the selected path"
                        );
                    }
                    ids
                }
                Err(e) => {
                    tracing::warn!(
                        project = %project_key,
                        error = %e,
                        "Failed to load last-failed tests; running the selected path"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let command = self.commands.build(&validated, &last_failed);
        let request = ExecutionRequest {
            command: command.clone(),
            cwd: validated.project_root.clone(),
            env: self.settings.env.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            result_id: result_id.clone(),
            image: config.container_image.clone(),
        };

        tracing::info!(
            result_id = %result_id,
            project = %project_key,
            runner = %config.runner,
            mode = %config.mode,
            "Starting test run"
        );
        emit(
            events.as_ref(),
            ProgressEvent::Started {
                result_id: result_id.clone(),
                command,
            },
        )
        .await;

        let runner = match config.mode {
            ExecutionMode::Local => &self.local,
            ExecutionMode::Container => &self.container,
        };
        let outcome = runner.execute(&request, events.clone(), cancel).await;
        let execution_time = started.elapsed().as_secs_f64();

        let result = match outcome {
            Ok(output) => self.assemble(&result_id, &validated, output, execution_time, created_at),
            Err(e) => {
                tracing::error!(result_id = %result_id, error = %e, "Test execution failed");
                emit(events.as_ref(), ProgressEvent::Error { message: e.to_string() }).await;
                self.error_result(&result_id, &validated, &e, execution_time, created_at)
            }
        };

        tracing::info!(
            result_id = %result_id,
            status = %result.status,
            passed = result.passed_tests.len(),
            failed = result.failed_tests.len(),
            skipped = result.skipped_tests.len(),
            execution_time = result.execution_time,
            "Test run finished"
        );

        match self.store.store_result(&result, config).await {
            Ok(()) => {
                emit(
                    events.as_ref(),
                    ProgressEvent::Stored {
                        result_id: result_id.clone(),
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::warn!(result_id = %result_id, error = %e, "Failed to store test result");
                emit(
                    events.as_ref(),
                    ProgressEvent::Error {
                        message: format!("Failed to store result: {}", e),
                    },
                )
                .await;
            }
        }

        result
    }

    fn base_result(
        result_id: &str,
        validated: &ValidatedConfig,
        execution_time: f64,
        created_at: DateTime<Utc>,
    ) -> TestResult {
        let config = &validated.config;
        TestResult {
            id: result_id.to_string(),
            project_path: validated.project_key(),
            test_path: config.test_path_opt().map(str::to_string),
            runner: config.runner,
            execution_mode: config.mode,
            status: TestStatus::Error,
            summary: String::new(),
            details: String::new(),
            passed_tests: Vec::new(),
            failed_tests: Vec::new(),
            skipped_tests: Vec::new(),
            exit_code: None,
            execution_time,
            created_at,
        }
    }

    fn assemble(
        &self,
        result_id: &str,
        validated: &ValidatedConfig,
        output: ProcessOutput,
        execution_time: f64,
        created_at: DateTime<Utc>,
    ) -> TestResult {
        let config = &validated.config;
        let parsed = analyze(
            &output.combined_output,
            config.runner,
            config.max_tokens,
            self.counter.as_ref(),
        );
        let outcomes = parsed.outcomes.deduplicated();

        let (status, summary) = if output.cancelled {
            (TestStatus::Error, CANCELLED_SUMMARY.to_string())
        } else {
            let status = TestStatus::classify(output.timed_out, output.exit_code, &outcomes);
            let summary = match status {
                TestStatus::Timeout => {
                    format!("Tests timed out after {} seconds", config.timeout_secs)
                }
                TestStatus::NoTests => format!("{}\n{}", NO_TESTS_SUMMARY, parsed.summary),
                _ => parsed.summary,
            };
            (status, summary)
        };

        let mut result = Self::base_result(result_id, validated, execution_time, created_at);
        result.status = status;
        result.summary = summary;
        result.details = parsed.details;
        result.passed_tests = outcomes.passed;
        result.failed_tests = outcomes.failed;
        result.skipped_tests = outcomes.skipped;
        result.exit_code = output.exit_code;

        if let Err(violation) = result.validate_invariants() {
            tracing::warn!(
                result_id = %result_id,
                violation = %violation,
                "Assembled result breaks an invariant"
            );
        }
        result
    }

    fn error_result(
        &self,
        result_id: &str,
        validated: &ValidatedConfig,
        error: &AppError,
        execution_time: f64,
        created_at: DateTime<Utc>,
    ) -> TestResult {
        let message = error.to_string();
        let mut result = Self::base_result(result_id, validated, execution_time, created_at);
        result.status = TestStatus::Error;
        result.summary = format!(
            "Test execution error: {}",
            message.lines().next().unwrap_or_default()
        );
        result.details =
            truncate_to_budget(&message, validated.config.max_tokens, self.counter.as_ref());
        result
    }
}
