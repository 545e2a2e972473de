//! Runner Command Building
//!
//! Turns a validated run configuration into the argv of the test runner.
//! Arguments are laid out as: base invocation, test selectors, the
//! max-failures flag, the verbosity flag, then the caller's extra args.

use test_relay_core::{ExecutionMode, RunnerKind};

use super::validation::ValidatedConfig;
use crate::models::settings::RelaySettings;

/// Builds runner command lines for one relay configuration.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    python_executable: String,
    uv_executable: String,
    mount_path: String,
}

impl CommandBuilder {
    pub fn new(settings: &RelaySettings) -> Self {
        Self {
            python_executable: settings.python_executable.clone(),
            uv_executable: settings.uv_executable.clone(),
            mount_path: settings.container.mount_path.trim_end_matches('/').to_string(),
        }
    }

    /// Build the argv for `validated`.
    ///
    /// A non-empty `last_failed` list replaces the path-based selector;
    /// the identifiers are passed through as they were stored.
    pub fn build(&self, validated: &ValidatedConfig, last_failed: &[String]) -> Vec<String> {
        let config = &validated.config;
        let runner = config.runner;
        let host_root = validated.project_key();
        let root = match config.mode {
            ExecutionMode::Local => host_root.clone(),
            ExecutionMode::Container => self.mount_path.clone(),
        };

        let mut argv = runner.base_invocation(&self.python_executable, &self.uv_executable);

        if last_failed.is_empty() {
            argv.extend(self.path_selectors(validated, runner, &root));
        } else {
            argv.extend(last_failed.iter().cloned());
        }

        if let Some(max_failures) = config.max_failures {
            argv.extend(runner.max_failures_args(max_failures));
        }
        argv.push(runner.verbose_flag().to_string());

        match config.mode {
            ExecutionMode::Local => argv.extend(config.extra_args.iter().cloned()),
            ExecutionMode::Container => argv.extend(
                config
                    .extra_args
                    .iter()
                    .map(|arg| arg.replace(&host_root, &self.mount_path)),
            ),
        }

        tracing::debug!(runner = %runner, command = %argv.join(" "), "Built test command");
        argv
    }

    fn path_selectors(
        &self,
        validated: &ValidatedConfig,
        runner: RunnerKind,
        root: &str,
    ) -> Vec<String> {
        let target = validated.target.as_ref();
        match runner {
            RunnerKind::Pytest | RunnerKind::UvPytest => target
                .map(|t| vec![format!("{}/{}", root, t.display_path())])
                .unwrap_or_default(),
            RunnerKind::Unittest => match target {
                Some(t) => match t.module_name() {
                    Some(module) => vec![module],
                    None => vec![
                        "discover".to_string(),
                        "-s".to_string(),
                        format!("{}/{}", root, t.display_path()),
                        "-t".to_string(),
                        root.to_string(),
                    ],
                },
                None => vec!["discover".to_string(), "-s".to_string(), root.to_string()],
            },
            RunnerKind::Nose2 => match target {
                Some(t) => match t.module_name() {
                    Some(module) => vec![module],
                    None => vec![
                        "-s".to_string(),
                        format!("{}/{}", root, t.display_path()),
                        "-t".to_string(),
                        root.to_string(),
                    ],
                },
                None => Vec::new(),
            },
        }
    }
}
