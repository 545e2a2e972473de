//! Container Runner
//!
//! Runs the test command inside a throwaway Docker container through the
//! `docker` CLI. The project is bind-mounted read-write at the configured
//! mount path, the container is named after the result id, and it is
//! always removed afterwards, whatever happened to the run.

use std::time::Duration;

use async_trait::async_trait;
use test_relay_core::ProgressEvent;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::process::{command_for, emit, supervise, ExecutionRequest, ProcessOutput, ProcessRunner};
use crate::models::settings::ContainerSettings;
use crate::utils::error::{AppError, AppResult};

/// Prefix of every container this runner creates
pub const CONTAINER_PREFIX: &str = "test-relay-";

/// `ProcessRunner` backed by the Docker CLI.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    settings: ContainerSettings,
    grace: Duration,
}

impl ContainerRunner {
    pub fn new(settings: ContainerSettings, grace: Duration) -> Self {
        Self { settings, grace }
    }

    /// Name of the container used for a run.
    pub fn container_name(result_id: &str) -> String {
        format!("{}{}", CONTAINER_PREFIX, result_id)
    }

    /// Arguments of `docker create` for `request`.
    fn create_args(&self, request: &ExecutionRequest, name: &str) -> Vec<String> {
        let mount = &self.settings.mount_path;
        let image = request
            .image
            .clone()
            .unwrap_or_else(|| self.settings.default_image.clone());

        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!("{}:{}:rw", request.cwd.display(), mount),
            "-w".to_string(),
            mount.clone(),
            "-e".to_string(),
            "PYTHONUNBUFFERED=1".to_string(),
        ];

        let mut env: Vec<_> = request.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }

        args.push(image);

        match self.settings.setup_command.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(setup) => {
                // positional args keep the test command unquoted
                args.push("sh".to_string());
                args.push("-c".to_string());
                args.push(format!("{} && exec \"$@\"", setup));
                args.push("test-relay".to_string());
                args.extend(request.command.iter().cloned());
            }
            None => args.extend(request.command.iter().cloned()),
        }
        args
    }

    /// Run a short docker CLI command to completion.
    async fn docker(&self, args: &[String]) -> AppResult<std::process::Output> {
        Command::new(&self.settings.docker_binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AppError::command(format!(
                    "Failed to run {} {}: {}",
                    self.settings.docker_binary,
                    args.first().map(String::as_str).unwrap_or_default(),
                    e
                ))
            })
    }

    async fn create(&self, request: &ExecutionRequest, name: &str) -> AppResult<()> {
        let output = self.docker(&self.create_args(request, name)).await?;
        if !output.status.success() {
            return Err(AppError::command(format!(
                "Failed to create container: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn exit_code(&self, name: &str) -> Option<i32> {
        let args = [
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.ExitCode}}".to_string(),
            name.to_string(),
        ];
        match self.docker(&args).await {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).trim().parse().ok()
            }
            Ok(output) => {
                tracing::warn!(
                    container = %name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Failed to inspect container exit code"
                );
                None
            }
            Err(e) => {
                tracing::warn!(
                    container = %name,
                    error = %e,
                    "Failed to inspect container exit code"
                );
                None
            }
        }
    }

    async fn stop(&self, name: &str) {
        let args = [
            "stop".to_string(),
            "-t".to_string(),
            self.grace.as_secs().to_string(),
            name.to_string(),
        ];
        if let Err(e) = self.docker(&args).await {
            tracing::warn!(container = %name, error = %e, "Failed to stop container");
        }
    }

    async fn remove(&self, name: &str, events: Option<&mpsc::Sender<ProgressEvent>>) {
        let args = ["rm".to_string(), "-f".to_string(), name.to_string()];
        match self.docker(&args).await {
            Ok(output) if output.status.success() => {
                tracing::debug!(container = %name, "Removed container");
                emit(
                    events,
                    ProgressEvent::Container {
                        message: format!("Removed container {}", name),
                    },
                )
                .await;
            }
            Ok(output) => tracing::warn!(
                container = %name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Failed to remove container"
            ),
            Err(e) => tracing::warn!(container = %name, error = %e, "Failed to remove container"),
        }
    }
}

#[async_trait]
impl ProcessRunner for ContainerRunner {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> AppResult<ProcessOutput> {
        let name = Self::container_name(&request.result_id);
        let events_ref = events.as_ref();

        tracing::info!(
            container = %name,
            image = request.image.as_deref().unwrap_or(&self.settings.default_image),
            command = %request.command.join(" "),
            "Creating test container"
        );
        if let Err(e) = self.create(request, &name).await {
            // a half-created container may still exist
            self.remove(&name, events_ref).await;
            return Err(e);
        }
        emit(
            events_ref,
            ProgressEvent::Container {
                message: format!("Created container {}", name),
            },
        )
        .await;

        let attach = command_for(&[
            self.settings.docker_binary.clone(),
            "start".to_string(),
            "-a".to_string(),
            name.clone(),
        ]);
        let supervised = match attach {
            Ok(cmd) => supervise(cmd, request.timeout, self.grace, events_ref, &cancel).await,
            Err(e) => Err(e),
        };

        let mut output = match supervised {
            Ok(output) => output,
            Err(e) => {
                self.remove(&name, events_ref).await;
                return Err(e);
            }
        };

        if output.timed_out || output.cancelled {
            // killing the attached client leaves the container running
            self.stop(&name).await;
        } else if let Some(code) = self.exit_code(&name).await {
            output.exit_code = Some(code);
        }

        self.remove(&name, events_ref).await;

        emit(
            events_ref,
            ProgressEvent::Finished {
                exit_code: output.exit_code,
                timed_out: output.timed_out,
            },
        )
        .await;
        Ok(output)
    }
}
