//! Test Execution Models
//!
//! Data structures shared by the parser, the process runners, the
//! orchestrator and the result stores.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default wall-clock timeout for a run, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default token budget for the detail text handed to LLM consumers
pub const DEFAULT_MAX_TOKENS: usize = 4000;

// ============================================================================
// Runner Kind
// ============================================================================

/// How a runner formats its per-test result lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStyle {
    /// `path/to/test_file.py::test_name PASSED`
    Pytest,
    /// `test_name (module.Class) ... ok`
    Unittest,
}

/// Supported test runners.
///
/// Each variant owns its base invocation, its flags and the output
/// style its results are parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerKind {
    #[serde(rename = "pytest")]
    Pytest,
    #[serde(rename = "unittest")]
    Unittest,
    #[serde(rename = "nose2")]
    Nose2,
    #[serde(rename = "uv-pytest", alias = "uv")]
    UvPytest,
}

impl Default for RunnerKind {
    fn default() -> Self {
        RunnerKind::Pytest
    }
}

impl RunnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerKind::Pytest => "pytest",
            RunnerKind::Unittest => "unittest",
            RunnerKind::Nose2 => "nose2",
            RunnerKind::UvPytest => "uv-pytest",
        }
    }

    /// Output format this runner produces with verbose reporting on.
    pub fn output_style(&self) -> OutputStyle {
        match self {
            RunnerKind::Pytest | RunnerKind::UvPytest => OutputStyle::Pytest,
            RunnerKind::Unittest | RunnerKind::Nose2 => OutputStyle::Unittest,
        }
    }

    /// Program and leading arguments that start the runner.
    pub fn base_invocation(&self, python: &str, uv: &str) -> Vec<String> {
        let parts: Vec<&str> = match self {
            RunnerKind::Pytest => vec![python, "-m", "pytest"],
            RunnerKind::Unittest => vec![python, "-m", "unittest"],
            RunnerKind::Nose2 => vec![python, "-m", "nose2"],
            RunnerKind::UvPytest => vec![uv, "run", "pytest"],
        };
        parts.into_iter().map(String::from).collect()
    }

    /// Flags equivalent to "stop after `n` failures".
    ///
    /// unittest and nose2 only know fail-fast, so any cutoff maps to it.
    pub fn max_failures_args(&self, n: u32) -> Vec<String> {
        match self {
            RunnerKind::Pytest | RunnerKind::UvPytest => {
                if n == 1 {
                    vec!["-x".to_string()]
                } else {
                    vec![format!("--maxfail={}", n)]
                }
            }
            RunnerKind::Unittest => vec!["-f".to_string()],
            RunnerKind::Nose2 => vec!["-F".to_string()],
        }
    }

    pub fn verbose_flag(&self) -> &'static str {
        "-v"
    }
}

impl std::fmt::Display for RunnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunnerKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pytest" => Ok(RunnerKind::Pytest),
            "unittest" => Ok(RunnerKind::Unittest),
            "nose2" => Ok(RunnerKind::Nose2),
            "uv-pytest" | "uv" => Ok(RunnerKind::UvPytest),
            other => Err(CoreError::config(format!(
                "Unsupported test runner: '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Execution Mode
// ============================================================================

/// Where the test command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Subprocess on the host
    Local,
    /// Throwaway Docker container with the project bind-mounted
    #[serde(alias = "docker")]
    Container,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Local
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Container => "container",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ExecutionMode::Local),
            "container" | "docker" => Ok(ExecutionMode::Container),
            other => Err(CoreError::config(format!(
                "Unsupported execution mode: '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// Test Status
// ============================================================================

/// Final status of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Ran to completion, nothing failed, at least one test passed or skipped
    Passed,
    /// Ran to completion with failing tests or a non-zero exit code
    Failed,
    /// The process or container could not be run
    Error,
    /// Wall-clock timeout hit; the process was terminated
    Timeout,
    /// Clean exit but nothing was collected
    NoTests,
}

impl TestStatus {
    /// Derive the status of a finished run.
    ///
    /// Priority: timeout, then "nothing ran" (clean exit with empty lists),
    /// then failed (non-zero exit or any failed test), then passed. The
    /// parsed lists are trusted over the exit code, which only breaks ties.
    pub fn classify(timed_out: bool, exit_code: Option<i32>, outcomes: &TestOutcomes) -> Self {
        if timed_out {
            return TestStatus::Timeout;
        }
        let clean_exit = exit_code == Some(0);
        if clean_exit && outcomes.is_empty() {
            return TestStatus::NoTests;
        }
        if !clean_exit || !outcomes.failed.is_empty() {
            return TestStatus::Failed;
        }
        TestStatus::Passed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Error => "error",
            TestStatus::Timeout => "timeout",
            TestStatus::NoTests => "no_tests",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(TestStatus::Passed),
            "failed" => Ok(TestStatus::Failed),
            "error" => Ok(TestStatus::Error),
            "timeout" => Ok(TestStatus::Timeout),
            "no_tests" => Ok(TestStatus::NoTests),
            other => Err(CoreError::parse(format!("Unknown test status: '{}'", other))),
        }
    }
}

// ============================================================================
// Test Outcomes
// ============================================================================

/// Test identifiers extracted from runner output, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcomes {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl TestOutcomes {
    pub fn is_empty(&self) -> bool {
        self.passed.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Drop repeated identifiers within each list, keeping the first
    /// occurrence so discovery order is preserved.
    pub fn deduplicated(self) -> Self {
        fn dedup(list: Vec<String>) -> Vec<String> {
            let mut seen = std::collections::HashSet::new();
            list.into_iter()
                .filter(|id| seen.insert(id.clone()))
                .collect()
        }
        Self {
            passed: dedup(self.passed),
            failed: dedup(self.failed),
            skipped: dedup(self.skipped),
        }
    }
}

// ============================================================================
// Execution Config
// ============================================================================

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_max_tokens() -> usize {
    DEFAULT_MAX_TOKENS
}

/// Input of a single test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecutionConfig {
    /// Absolute path of an existing project directory
    pub project_path: PathBuf,
    /// File, directory or pytest node relative to the project; empty runs everything
    #[serde(default)]
    pub test_path: String,
    #[serde(default)]
    pub runner: RunnerKind,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Stop after this many failures
    #[serde(default)]
    pub max_failures: Option<u32>,
    /// Select only the tests that failed in the last failing run of this project
    #[serde(default, alias = "run_last_failed")]
    pub rerun_last_failed: bool,
    #[serde(default = "default_timeout_secs", alias = "timeout")]
    pub timeout_secs: u64,
    /// Token budget for the `details` field of the result
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Image used in container mode
    #[serde(default, alias = "docker_image")]
    pub container_image: Option<String>,
    /// Extra arguments appended to the runner command line
    #[serde(default, alias = "additional_args")]
    pub extra_args: Vec<String>,
}

impl TestExecutionConfig {
    /// Config for the given project with every other field defaulted.
    pub fn new(project_path: impl Into<PathBuf>) -> Self {
        Self {
            project_path: project_path.into(),
            test_path: String::new(),
            runner: RunnerKind::default(),
            mode: ExecutionMode::default(),
            max_failures: None,
            rerun_last_failed: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tokens: DEFAULT_MAX_TOKENS,
            container_image: None,
            extra_args: Vec::new(),
        }
    }

    /// Test path if one was given.
    pub fn test_path_opt(&self) -> Option<&str> {
        let trimmed = self.test_path.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

// ============================================================================
// Test Result
// ============================================================================

/// Outcome of one test run, as returned to callers and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Generated at run start; persistence key and streaming correlation id
    pub id: String,
    pub project_path: String,
    pub test_path: Option<String>,
    pub runner: RunnerKind,
    pub execution_mode: ExecutionMode,
    pub status: TestStatus,
    pub summary: String,
    /// Runner output truncated to the configured token budget
    pub details: String,
    pub passed_tests: Vec<String>,
    pub failed_tests: Vec<String>,
    pub skipped_tests: Vec<String>,
    /// Process or container exit code, when one was observed
    pub exit_code: Option<i32>,
    /// Wall-clock seconds
    pub execution_time: f64,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    /// Check the status/list invariants; returns a description of the
    /// first violation found.
    pub fn validate_invariants(&self) -> Result<(), String> {
        let all_empty = self.passed_tests.is_empty()
            && self.failed_tests.is_empty()
            && self.skipped_tests.is_empty();
        match self.status {
            TestStatus::Passed => {
                if !self.failed_tests.is_empty() {
                    return Err("passed result has failed tests".to_string());
                }
                if self.passed_tests.is_empty() && self.skipped_tests.is_empty() {
                    return Err("passed result has no passed or skipped tests".to_string());
                }
            }
            TestStatus::NoTests => {
                if !all_empty {
                    return Err("no_tests result has test identifiers".to_string());
                }
                if self.exit_code != Some(0) {
                    return Err("no_tests result requires a clean exit".to_string());
                }
            }
            TestStatus::Failed | TestStatus::Error | TestStatus::Timeout => {}
        }
        Ok(())
    }

    /// Short listing form of this result.
    pub fn to_summary(&self) -> TestResultSummary {
        TestResultSummary {
            id: self.id.clone(),
            timestamp: self.created_at,
            status: self.status,
            summary: self.summary.clone(),
            execution_time: self.execution_time,
        }
    }
}

/// Row returned when listing results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TestStatus,
    pub summary: String,
    pub execution_time: f64,
}

/// Failed identifiers of the most recent failing run for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastFailedSet {
    pub project_path: String,
    pub tests: Vec<String>,
    pub updated_at: DateTime<Utc>,
}
