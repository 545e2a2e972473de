//! Local Process Runner
//!
//! Runs the test command as a host subprocess in the project directory.

use std::time::Duration;

use async_trait::async_trait;
use test_relay_core::ProgressEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::process::{command_for, emit, supervise, ExecutionRequest, ProcessOutput, ProcessRunner};
use crate::utils::error::AppResult;

/// `ProcessRunner` for host subprocesses.
#[derive(Debug, Clone)]
pub struct LocalProcessRunner {
    /// Time between the terminate signal and the kill on timeout
    grace: Duration,
}

impl LocalProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for LocalProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> AppResult<ProcessOutput> {
        let mut cmd = command_for(&request.command)?;
        cmd.current_dir(&request.cwd).envs(&request.env);
        // flush Python output per line so progress streams live
        cmd.env("PYTHONUNBUFFERED", "1");

        tracing::debug!(
            result_id = %request.result_id,
            cwd = %request.cwd.display(),
            command = %request.command.join(" "),
            "Starting local test process"
        );

        let output = supervise(cmd, request.timeout, self.grace, events.as_ref(), &cancel).await?;

        emit(
            events.as_ref(),
            ProgressEvent::Finished {
                exit_code: output.exit_code,
                timed_out: output.timed_out,
            },
        )
        .await;
        Ok(output)
    }
}
