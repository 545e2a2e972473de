//! Storage Integration Tests
//!
//! The SQLite result store behind the public API: persistence across
//! reopen, concurrent writers and last-failed bookkeeping per project.

use std::sync::Arc;

use chrono::{Duration, Utc};
use test_relay::{
    ConfigService, Database, ExecutionMode, MemoryResultStore, ResultStore, RunnerKind,
    SettingsUpdate, TestExecutionConfig, TestResult, TestStatus,
};

fn result(id: &str, project: &str, status: TestStatus, failed: &[&str]) -> TestResult {
    TestResult {
        id: id.to_string(),
        project_path: project.to_string(),
        test_path: Some("tests".to_string()),
        runner: RunnerKind::Pytest,
        execution_mode: ExecutionMode::Local,
        status,
        summary: format!("{} run", status),
        details: String::new(),
        passed_tests: if failed.is_empty() {
            vec!["tests/test_a.py::test_ok".to_string()]
        } else {
            Vec::new()
        },
        failed_tests: failed.iter().map(|s| s.to_string()).collect(),
        skipped_tests: Vec::new(),
        exit_code: Some(if failed.is_empty() { 0 } else { 1 }),
        execution_time: 0.5,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_database_path_from_settings_survives_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let config_path = temp.path().join("config.json");
    let db_path = temp.path().join("store").join("results.db");

    let mut service = ConfigService::with_path(&config_path).unwrap();
    service
        .update_config(SettingsUpdate {
            database_path: Some(db_path.clone()),
            ..Default::default()
        })
        .unwrap();

    let settings = ConfigService::with_path(&config_path).unwrap().get_config_clone();
    let configured = settings.database_path.unwrap();
    assert_eq!(configured, db_path);

    {
        let db = Database::open(&configured).unwrap();
        db.store_result(
            &result("r1", "/srv/app", TestStatus::Failed, &["tests/test_a.py::test_bad"]),
            &TestExecutionConfig::new("/srv/app"),
        )
        .await
        .unwrap();
    }

    let reopened = Database::open(&configured).unwrap();
    let loaded = reopened.get_result("r1").await.unwrap().unwrap();
    assert_eq!(loaded.status, TestStatus::Failed);
    assert_eq!(loaded.test_path.as_deref(), Some("tests"));
    assert_eq!(
        reopened.get_last_failed("/srv/app").await.unwrap(),
        vec!["tests/test_a.py::test_bad"]
    );
}

#[tokio::test]
async fn test_concurrent_writers_on_file_database() {
    let temp = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open(temp.path().join("results.db")).unwrap());

    let mut handles = Vec::new();
    for i in 0..16 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let project = format!("/srv/p{}", i % 4);
            let failed = format!("t::f{}", i);
            db.store_result(
                &result(&format!("r{}", i), &project, TestStatus::Failed, &[failed.as_str()]),
                &TestExecutionConfig::new(&project),
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(db.list_results(100).await.unwrap().len(), 16);
    for p in 0..4 {
        let tests = db.get_last_failed(&format!("/srv/p{}", p)).await.unwrap();
        // last writer wins; never a merge of several runs
        assert_eq!(tests.len(), 1);
    }
}

#[tokio::test]
async fn test_storing_same_id_twice_keeps_one_row() {
    let db = Database::new_in_memory().unwrap();
    let config = TestExecutionConfig::new("/srv/app");
    let mut first = result("same", "/srv/app", TestStatus::Passed, &[]);
    db.store_result(&first, &config).await.unwrap();

    first.summary = "rewritten".to_string();
    db.store_result(&first, &config).await.unwrap();

    let listed = db.list_results(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].summary, "rewritten");
}

#[tokio::test]
async fn test_stores_agree_on_listing_and_last_failed() {
    let sqlite = Database::new_in_memory().unwrap();
    let memory = MemoryResultStore::new();
    let config = TestExecutionConfig::new("/srv/app");

    let mut older = result("older", "/srv/app", TestStatus::Failed, &["t::a", "t::b"]);
    older.created_at = Utc::now() - Duration::minutes(5);
    let newer = result("newer", "/srv/app", TestStatus::Passed, &[]);

    let stores: [&dyn ResultStore; 2] = [&sqlite, &memory];
    for store in stores {
        store.store_result(&older, &config).await.unwrap();
        store.store_result(&newer, &config).await.unwrap();

        let ids: Vec<String> = store
            .list_results(10)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(store.get_last_failed("/srv/app").await.unwrap(), vec!["t::a", "t::b"]);
        assert!(store.get_result("missing").await.unwrap().is_none());
    }
}
