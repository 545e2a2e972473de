//! Orchestrator Integration Tests
//!
//! Full runs through `TestExecutionOrchestrator`: command selection,
//! status classification, persistence and the last-failed rerun loop.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use test_relay::services::execution::{ExecutionRequest, ProcessOutput, ProcessRunner};
use test_relay::{
    AppError, AppResult, Database, ExecutionMode, ProgressEvent, RelaySettings, ResultStore,
    RunnerKind, TestExecutionConfig, TestExecutionOrchestrator, TestStatus,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Helpers
// ============================================================================

/// Runner replaying one canned output per call, in order.
struct ReplayRunner {
    outputs: Mutex<Vec<ProcessOutput>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl ReplayRunner {
    fn new(outputs: Vec<ProcessOutput>) -> Arc<Self> {
        let mut outputs = outputs;
        outputs.reverse();
        Arc::new(Self {
            outputs: Mutex::new(outputs),
            commands: Mutex::new(Vec::new()),
        })
    }

    fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ReplayRunner {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        _events: Option<mpsc::Sender<ProgressEvent>>,
        _cancel: CancellationToken,
    ) -> AppResult<ProcessOutput> {
        self.commands.lock().unwrap().push(request.command.clone());
        self.outputs
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| AppError::internal("no output left to replay"))
    }
}

fn exited(code: i32, output: &str) -> ProcessOutput {
    ProcessOutput {
        combined_output: output.to_string(),
        exit_code: Some(code),
        ..Default::default()
    }
}

/// Project with one passing and one failing pytest file.
fn sample_project() -> tempfile::TempDir {
    let temp = tempfile::tempdir().unwrap();
    let tests = temp.path().join("tests");
    std::fs::create_dir_all(&tests).unwrap();
    std::fs::write(tests.join("test_ok.py"), "def test_one():\n    assert True\n").unwrap();
    std::fs::write(tests.join("test_bad.py"), "def test_two():\n    assert 1 == 2\n").unwrap();
    temp
}

fn key(path: &Path) -> String {
    path.canonicalize().unwrap().to_string_lossy().into_owned()
}

const FAILING_RUN: &str = "\
============================= test session starts ==============================
collected 2 items

tests/test_bad.py::test_two FAILED                                       [ 50%]
tests/test_ok.py::test_one PASSED                                        [100%]

=================================== FAILURES ===================================
___________________________________ test_two ___________________________________

    def test_two():
>       assert 1 == 2
E       assert 1 == 2

tests/test_bad.py:2: AssertionError
=========================== short test summary info ============================
FAILED tests/test_bad.py::test_two - assert 1 == 2
========================= 1 failed, 1 passed in 0.03s ==========================
";

// ============================================================================
// Scripted Runner Tests
// ============================================================================

#[tokio::test]
async fn test_failed_run_then_rerun_of_last_failed() {
    let temp = sample_project();
    let runner = ReplayRunner::new(vec![
        exited(1, FAILING_RUN),
        exited(0, "tests/test_bad.py::test_two PASSED\n==== 1 passed in 0.01s ====\n"),
    ]);
    let store = Arc::new(Database::new_in_memory().unwrap());
    let orchestrator = TestExecutionOrchestrator::with_runners(
        RelaySettings::default(),
        store.clone(),
        runner.clone(),
        runner.clone(),
    );

    let first = orchestrator
        .run(TestExecutionConfig::new(temp.path()))
        .await
        .unwrap();
    assert_eq!(first.status, TestStatus::Failed);
    assert_eq!(first.failed_tests, vec!["tests/test_bad.py::test_two"]);
    assert_eq!(first.passed_tests, vec!["tests/test_ok.py::test_one"]);
    assert!(first.summary.contains("test_bad.py::test_two"));
    assert!(first.details.contains("FAILURES"));
    assert_eq!(first.project_path, key(temp.path()));

    let mut rerun = TestExecutionConfig::new(temp.path());
    rerun.rerun_last_failed = true;
    let second = orchestrator.run(rerun).await.unwrap();
    assert_eq!(second.status, TestStatus::Passed);

    let commands = runner.commands();
    assert_eq!(
        commands[1],
        vec!["python3", "-m", "pytest", "tests/test_bad.py::test_two", "-v"]
    );

    // a passing run leaves the last-failed set alone
    assert_eq!(
        store.get_last_failed(&key(temp.path())).await.unwrap(),
        vec!["tests/test_bad.py::test_two"]
    );

    let listed = store.list_results(10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[1].id, first.id);
}

#[tokio::test]
async fn test_rerun_without_history_runs_selected_path() {
    let temp = sample_project();
    let runner = ReplayRunner::new(vec![exited(0, "tests/test_ok.py::test_one PASSED\n")]);
    let store = Arc::new(Database::new_in_memory().unwrap());
    let orchestrator = TestExecutionOrchestrator::with_runners(
        RelaySettings::default(),
        store,
        runner.clone(),
        runner.clone(),
    );

    let mut config = TestExecutionConfig::new(temp.path());
    config.test_path = "tests/test_ok.py".to_string();
    config.rerun_last_failed = true;
    let result = orchestrator.run(config).await.unwrap();

    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(
        runner.commands()[0][3],
        format!("{}/tests/test_ok.py", key(temp.path()))
    );
}

#[tokio::test]
async fn test_passing_file_then_failing_file_records_failures() {
    let temp = sample_project();
    let runner = ReplayRunner::new(vec![
        exited(0, "tests/test_ok.py::test_one PASSED\n==== 1 passed in 0.01s ====\n"),
        exited(
            1,
            "tests/test_bad.py::test_two FAILED\n\
             FAILED tests/test_bad.py::test_two - assert 1 == 2\n\
             ==== 1 failed in 0.02s ====\n",
        ),
    ]);
    let store = Arc::new(Database::new_in_memory().unwrap());
    let orchestrator = TestExecutionOrchestrator::with_runners(
        RelaySettings::default(),
        store.clone(),
        runner.clone(),
        runner.clone(),
    );

    let mut ok = TestExecutionConfig::new(temp.path());
    ok.test_path = "tests/test_ok.py".to_string();
    let first = orchestrator.run(ok).await.unwrap();
    assert_eq!(first.status, TestStatus::Passed);
    assert!(first.failed_tests.is_empty());
    assert!(store.get_last_failed(&key(temp.path())).await.unwrap().is_empty());

    let mut bad = TestExecutionConfig::new(temp.path());
    bad.test_path = "tests/test_bad.py".to_string();
    let second = orchestrator.run(bad).await.unwrap();
    assert_eq!(second.status, TestStatus::Failed);
    assert_eq!(second.failed_tests, vec!["tests/test_bad.py::test_two"]);
    assert_eq!(
        store.get_last_failed(&key(temp.path())).await.unwrap(),
        vec!["tests/test_bad.py::test_two"]
    );

    let root = key(temp.path());
    let commands = runner.commands();
    assert_eq!(commands[0][3], format!("{}/tests/test_ok.py", root));
    assert_eq!(commands[1][3], format!("{}/tests/test_bad.py", root));
}

#[tokio::test]
async fn test_container_mode_uses_container_runner() {
    let temp = sample_project();
    let local = ReplayRunner::new(Vec::new());
    let container = ReplayRunner::new(vec![exited(
        0,
        concat!(
            "test_one (tests.test_ok.TestOk) ... ok\n\n",
            "----------------------------------------------------------------------\n",
            "Ran 1 test in 0.001s\n\nOK\n",
        ),
    )]);
    let store = Arc::new(Database::new_in_memory().unwrap());
    let orchestrator = TestExecutionOrchestrator::with_runners(
        RelaySettings::default(),
        store,
        local.clone(),
        container.clone(),
    );

    let mut config = TestExecutionConfig::new(temp.path());
    config.mode = ExecutionMode::Container;
    config.runner = RunnerKind::Unittest;
    config.container_image = Some("python:3.12".to_string());
    let result = orchestrator.run(config).await.unwrap();

    assert!(local.commands().is_empty());
    assert_eq!(
        container.commands()[0],
        vec!["python3", "-m", "unittest", "discover", "-s", "/app", "-v"]
    );
    assert_eq!(result.status, TestStatus::Passed);
    assert_eq!(result.execution_mode, ExecutionMode::Container);
    assert_eq!(result.passed_tests, vec!["tests.test_ok.TestOk.test_one"]);
    assert!(result.summary.contains("Ran 1 test"));
}

#[tokio::test]
async fn test_invalid_configs_are_rejected_before_running() {
    let temp = sample_project();
    let runner = ReplayRunner::new(Vec::new());
    let store = Arc::new(Database::new_in_memory().unwrap());
    let orchestrator = TestExecutionOrchestrator::with_runners(
        RelaySettings::default(),
        store.clone(),
        runner.clone(),
        runner.clone(),
    );

    let mut escaping = TestExecutionConfig::new(temp.path());
    escaping.test_path = "../elsewhere".to_string();
    let mut zero_timeout = TestExecutionConfig::new(temp.path());
    zero_timeout.timeout_secs = 0;

    for config in [
        TestExecutionConfig::new("relative/dir"),
        TestExecutionConfig::new(temp.path().join("missing")),
        escaping,
        zero_timeout,
    ] {
        let err = orchestrator.run(config).await.unwrap_err();
        assert!(err.is_caller_error(), "unexpected error kind: {}", err);
    }

    assert!(runner.commands().is_empty());
    assert!(store.list_results(10).await.unwrap().is_empty());
}

// ============================================================================
// Real Subprocess Tests
// ============================================================================

#[cfg(unix)]
mod subprocess {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    /// Stand-in interpreter: ignores its arguments and runs `body`.
    fn fake_python(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-python");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn settings_with(python: String) -> RelaySettings {
        RelaySettings {
            python_executable: python,
            terminate_grace_secs: 1,
            ..RelaySettings::default()
        }
    }

    #[tokio::test]
    async fn test_local_run_parses_real_output() {
        let project = sample_project();
        let bin = tempfile::tempdir().unwrap();
        let python = fake_python(
            bin.path(),
            "echo 'tests/test_ok.py::test_one PASSED'\n\
             echo 'tests/test_bad.py::test_two FAILED' >&2\n\
             echo '==== 1 failed, 1 passed in 0.01s ===='\n\
             exit 1",
        );
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(settings_with(python), store.clone());

        let result = orchestrator
            .run(TestExecutionConfig::new(project.path()))
            .await
            .unwrap();

        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.passed_tests, vec!["tests/test_ok.py::test_one"]);
        assert_eq!(result.failed_tests, vec!["tests/test_bad.py::test_two"]);
        assert!(result.summary.contains("1 failed, 1 passed"));

        let stored = store.get_result(&result.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TestStatus::Failed);
        assert_eq!(stored.failed_tests, result.failed_tests);
    }

    #[tokio::test]
    async fn test_timeout_is_stored_as_timeout() {
        let project = sample_project();
        let bin = tempfile::tempdir().unwrap();
        let python = fake_python(bin.path(), "echo 'tests/test_ok.py::test_one PASSED'\nsleep 30");
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(settings_with(python), store.clone());

        let mut config = TestExecutionConfig::new(project.path());
        config.timeout_secs = 1;
        let started = Instant::now();
        let result = orchestrator.run(config).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.status, TestStatus::Timeout);
        assert_eq!(result.summary, "Tests timed out after 1 seconds");
        assert!(result.details.contains("test_one PASSED"));
        assert_eq!(
            store.get_result(&result.id).await.unwrap().unwrap().status,
            TestStatus::Timeout
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_stored_as_error() {
        let project = sample_project();
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(
            settings_with("/nonexistent/python-for-relay".to_string()),
            store.clone(),
        );

        let result = orchestrator
            .run(TestExecutionConfig::new(project.path()))
            .await
            .unwrap();
        assert_eq!(result.status, TestStatus::Error);
        assert!(!result.details.is_empty());
        assert!(store.get_result(&result.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_streaming_forwards_output_lines() {
        let project = sample_project();
        let bin = tempfile::tempdir().unwrap();
        let python = fake_python(bin.path(), "echo 'tests/test_ok.py::test_one PASSED'");
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(settings_with(python), store);

        let mut run = orchestrator
            .run_streaming(TestExecutionConfig::new(project.path()))
            .unwrap();
        let mut lines = Vec::new();
        let mut stored = false;
        while let Some(event) = run.events.recv().await {
            match event {
                ProgressEvent::Output { line, .. } => lines.push(line),
                ProgressEvent::Stored { .. } => stored = true,
                _ => {}
            }
        }
        let result = run.finish().await.unwrap();

        assert!(stored);
        assert!(lines.iter().any(|l| l.contains("test_one PASSED")));
        assert_eq!(result.status, TestStatus::Passed);
    }

    #[tokio::test]
    async fn test_timeout_holds_while_progress_goes_unread() {
        let project = sample_project();
        let bin = tempfile::tempdir().unwrap();
        let marker = bin.path().join("still-running");
        let python = fake_python(
            bin.path(),
            &format!(
                "i=0; while [ $i -lt 600 ]; do echo line $i; i=$((i+1)); done\n\
                 sleep 3\ntouch '{}'\nsleep 5",
                marker.display()
            ),
        );
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(settings_with(python), store.clone());

        let mut config = TestExecutionConfig::new(project.path());
        config.timeout_secs = 1;
        let run = orchestrator.run_streaming(config).unwrap();

        // nobody reads run.events while the process would still be running
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!marker.exists(), "test process outlived its timeout");

        let result = tokio::time::timeout(Duration::from_secs(10), run.finish())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, TestStatus::Timeout);
        assert!(result.details.contains("line 0"));
        assert!(store.get_result(&result.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_streaming_run_is_error() {
        let project = sample_project();
        let bin = tempfile::tempdir().unwrap();
        let python = fake_python(bin.path(), "echo started\nsleep 30");
        let store = Arc::new(Database::new_in_memory().unwrap());
        let orchestrator = TestExecutionOrchestrator::new(settings_with(python), store);

        let mut run = orchestrator
            .run_streaming(TestExecutionConfig::new(project.path()))
            .unwrap();
        while let Some(event) = run.events.recv().await {
            if matches!(event, ProgressEvent::Output { .. }) {
                run.cancel();
                break;
            }
        }
        let result = tokio::time::timeout(Duration::from_secs(10), run.finish())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.status, TestStatus::Error);
    }
}
