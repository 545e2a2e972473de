//! Execution Config Builder
//!
//! Builder for [`TestExecutionConfig`] following the usual pattern:
//! 1. Create with `::new(project_path)`
//! 2. Chain `.field(value)` calls
//! 3. Call `.build()` which validates and returns `CoreResult<TestExecutionConfig>`
//!
//! Only field-level checks happen here. Filesystem checks (the project
//! directory exists, the test path stays inside it) need the host and are
//! done by the orchestrator right before a run.

use std::path::PathBuf;

use crate::error::{CoreError, CoreResult};
use crate::models::{
    ExecutionMode, RunnerKind, TestExecutionConfig, DEFAULT_MAX_TOKENS, DEFAULT_TIMEOUT_SECS,
};

/// Builder for a test run configuration.
///
/// # Example
/// ```ignore
/// let config = TestExecutionConfigBuilder::new("/srv/app")
///     .test_path("tests/test_api.py")
///     .runner(RunnerKind::Pytest)
///     .max_failures(1)
///     .timeout_secs(120)
///     .build()?;
/// ```
#[derive(Debug)]
pub struct TestExecutionConfigBuilder {
    project_path: PathBuf,
    test_path: String,
    runner: RunnerKind,
    mode: ExecutionMode,
    max_failures: Option<u32>,
    rerun_last_failed: bool,
    timeout_secs: Option<u64>,
    max_tokens: Option<usize>,
    container_image: Option<String>,
    extra_args: Vec<String>,
}

impl TestExecutionConfigBuilder {
    /// Create a new builder for the given project root.
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            test_path: String::new(),
            runner: RunnerKind::default(),
            mode: ExecutionMode::default(),
            max_failures: None,
            rerun_last_failed: false,
            timeout_secs: None,
            max_tokens: None,
            container_image: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the test selector, relative to the project root.
    pub fn test_path(mut self, path: impl Into<String>) -> Self {
        self.test_path = path.into();
        self
    }

    pub fn runner(mut self, runner: RunnerKind) -> Self {
        self.runner = runner;
        self
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Stop after `n` failures.
    pub fn max_failures(mut self, n: u32) -> Self {
        self.max_failures = Some(n);
        self
    }

    /// Only run the tests that failed last time.
    pub fn rerun_last_failed(mut self, enabled: bool) -> Self {
        self.rerun_last_failed = enabled;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Image for container mode. Switches the mode to container.
    pub fn container_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = Some(image.into());
        self.mode = ExecutionMode::Container;
        self
    }

    pub fn extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn extra_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CoreResult<TestExecutionConfig> {
        if self.project_path.as_os_str().is_empty() {
            return Err(CoreError::validation("project_path is required"));
        }

        let timeout_secs = self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(CoreError::validation("timeout_secs must be > 0"));
        }

        let max_tokens = self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(CoreError::validation("max_tokens must be > 0"));
        }

        if self.max_failures == Some(0) {
            return Err(CoreError::validation("max_failures must be > 0"));
        }

        if let Some(image) = &self.container_image {
            if image.trim().is_empty() {
                return Err(CoreError::validation("container_image cannot be empty"));
            }
        }

        Ok(TestExecutionConfig {
            project_path: self.project_path,
            test_path: self.test_path.trim().to_string(),
            runner: self.runner,
            mode: self.mode,
            max_failures: self.max_failures,
            rerun_last_failed: self.rerun_last_failed,
            timeout_secs,
            max_tokens,
            container_image: self.container_image,
            extra_args: self.extra_args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TestExecutionConfigBuilder::new("/srv/app").build().unwrap();
        assert_eq!(config.runner, RunnerKind::Pytest);
        assert_eq!(config.mode, ExecutionMode::Local);
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.max_tokens, 4000);
        assert!(config.test_path.is_empty());
        assert!(!config.rerun_last_failed);
    }

    #[test]
    fn test_builder_full() {
        let config = TestExecutionConfigBuilder::new("/srv/app")
            .test_path("  tests/test_api.py ")
            .runner(RunnerKind::Nose2)
            .max_failures(2)
            .rerun_last_failed(true)
            .timeout_secs(30)
            .max_tokens(500)
            .extra_args(["--log-level", "debug"])
            .build()
            .unwrap();
        assert_eq!(config.test_path, "tests/test_api.py");
        assert_eq!(config.runner, RunnerKind::Nose2);
        assert_eq!(config.max_failures, Some(2));
        assert_eq!(config.extra_args, vec!["--log-level", "debug"]);
    }

    #[test]
    fn test_container_image_switches_mode() {
        let config = TestExecutionConfigBuilder::new("/srv/app")
            .container_image("python:3.12-slim")
            .build()
            .unwrap();
        assert_eq!(config.mode, ExecutionMode::Container);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = TestExecutionConfigBuilder::new("/srv/app")
            .timeout_secs(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn test_zero_budget_and_cutoff_rejected() {
        assert!(TestExecutionConfigBuilder::new("/srv/app")
            .max_tokens(0)
            .build()
            .is_err());
        assert!(TestExecutionConfigBuilder::new("/srv/app")
            .max_failures(0)
            .build()
            .is_err());
    }

    #[test]
    fn test_empty_project_path_rejected() {
        assert!(TestExecutionConfigBuilder::new("").build().is_err());
    }
}
