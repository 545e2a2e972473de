//! SQLite Database
//!
//! Embedded result store using rusqlite with r2d2 connection pooling.
//! Implements `ResultStore`; blocking SQLite work runs on the tokio
//! blocking pool.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use test_relay_core::{
    CoreResult, ExecutionMode, LastFailedSet, ResultStore, RunnerKind, TestExecutionConfig,
    TestResult, TestResultSummary, TestStatus,
};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Raw test result row from the database
#[derive(Debug, Clone)]
struct TestResultRow {
    id: String,
    project_path: String,
    test_path: Option<String>,
    runner: String,
    execution_mode: String,
    status: String,
    summary: String,
    details: String,
    passed_tests: String,
    failed_tests: String,
    skipped_tests: String,
    exit_code: Option<i32>,
    execution_time: f64,
    created_at: String,
}

const RESULT_COLUMNS: &str = "id, project_path, test_path, runner, execution_mode, status,
     summary, details, passed_tests, failed_tests, skipped_tests, exit_code,
     execution_time, created_at";

fn map_result_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TestResultRow> {
    Ok(TestResultRow {
        id: row.get(0)?,
        project_path: row.get(1)?,
        test_path: row.get(2)?,
        runner: row.get(3)?,
        execution_mode: row.get(4)?,
        status: row.get(5)?,
        summary: row.get(6)?,
        details: row.get(7)?,
        passed_tests: row.get(8)?,
        failed_tests: row.get(9)?,
        skipped_tests: row.get(10)?,
        exit_code: row.get(11)?,
        execution_time: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_id_list(raw: &str) -> AppResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| AppError::database(format!("Invalid test id list: {}", e)))
}

impl TestResultRow {
    fn into_result(self) -> AppResult<TestResult> {
        Ok(TestResult {
            runner: RunnerKind::from_str(&self.runner)?,
            execution_mode: ExecutionMode::from_str(&self.execution_mode)?,
            status: TestStatus::from_str(&self.status)?,
            passed_tests: parse_id_list(&self.passed_tests)?,
            failed_tests: parse_id_list(&self.failed_tests)?,
            skipped_tests: parse_id_list(&self.skipped_tests)?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            project_path: self.project_path,
            test_path: self.test_path,
            summary: self.summary,
            details: self.details,
            exit_code: self.exit_code,
            execution_time: self.execution_time,
        })
    }
}

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a database from an existing connection pool.
    pub fn from_pool(pool: DbPool) -> AppResult<Self> {
        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    ///
    /// Uses an in-memory SQLite database with the same schema as the
    /// file-backed one.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        Self::from_pool(pool)
    }

    /// Open the database at the default location (~/.test-relay/results.db)
    pub fn new() -> AppResult<Self> {
        Self::open(database_path()?)
    }

    /// Open (or create) a file-backed database with connection pooling
    pub fn open(db_path: impl AsRef<Path>) -> AppResult<Self> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
        });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        tracing::debug!(path = %db_path.display(), "Opened result database");
        Self::from_pool(pool)
    }

    /// Initialize the database schema
    fn init_schema(&self) -> AppResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS test_results (
                id TEXT PRIMARY KEY,
                project_path TEXT NOT NULL,
                test_path TEXT,
                runner TEXT NOT NULL,
                execution_mode TEXT NOT NULL,
                status TEXT NOT NULL,
                summary TEXT NOT NULL,
                details TEXT NOT NULL,
                passed_tests TEXT NOT NULL DEFAULT '[]',
                failed_tests TEXT NOT NULL DEFAULT '[]',
                skipped_tests TEXT NOT NULL DEFAULT '[]',
                exit_code INTEGER,
                execution_time REAL NOT NULL DEFAULT 0.0,
                config TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_test_results_created_at
             ON test_results(created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_test_results_project
             ON test_results(project_path, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS last_failed_tests (
                project_path TEXT PRIMARY KEY,
                tests TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    // ========================================================================
    // Test Result Operations (synchronous internally, wrapped for async)
    // ========================================================================

    fn store_result_sync(
        pool: &DbPool,
        result: &TestResult,
        config: &TestExecutionConfig,
    ) -> AppResult<()> {
        let mut conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;

        let passed = serde_json::to_string(&result.passed_tests)?;
        let failed = serde_json::to_string(&result.failed_tests)?;
        let skipped = serde_json::to_string(&result.skipped_tests)?;
        let config_json = serde_json::to_string(config)?;
        let created_at = format_timestamp(&result.created_at);

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO test_results
             (id, project_path, test_path, runner, execution_mode, status, summary,
              details, passed_tests, failed_tests, skipped_tests, exit_code,
              execution_time, config, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                result.id,
                result.project_path,
                result.test_path,
                result.runner.as_str(),
                result.execution_mode.as_str(),
                result.status.as_str(),
                result.summary,
                result.details,
                passed,
                failed,
                skipped,
                result.exit_code,
                result.execution_time,
                config_json,
                created_at,
            ],
        )?;

        if !result.failed_tests.is_empty() {
            tx.execute(
                "INSERT INTO last_failed_tests (project_path, tests, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(project_path) DO UPDATE
                 SET tests = excluded.tests, updated_at = excluded.updated_at",
                params![result.project_path, failed, format_timestamp(&Utc::now())],
            )?;
        }
        tx.commit()?;

        tracing::debug!(
            id = %result.id,
            status = %result.status,
            failed = result.failed_tests.len(),
            "Stored test result"
        );
        Ok(())
    }

    fn get_result_sync(pool: &DbPool, id: &str) -> AppResult<Option<TestResult>> {
        let conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;

        let result = conn.query_row(
            &format!("SELECT {} FROM test_results WHERE id = ?1", RESULT_COLUMNS),
            params![id],
            map_result_row,
        );

        match result {
            Ok(row) => Ok(Some(row.into_result()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::database(e.to_string())),
        }
    }

    fn list_results_sync(
        pool: &DbPool,
        project_path: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<TestResultSummary>> {
        let conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(
            "SELECT id, created_at, status, summary, execution_time
             FROM test_results
             WHERE (?1 IS NULL OR project_path = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![project_path, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, created_at, status, summary, execution_time)| {
                Ok::<_, AppError>(TestResultSummary {
                    id,
                    timestamp: parse_timestamp(&created_at)?,
                    status: TestStatus::from_str(&status)?,
                    summary,
                    execution_time,
                })
            })
            .collect()
    }

    fn get_last_failed_sync(pool: &DbPool, project_path: &str) -> AppResult<Option<LastFailedSet>> {
        let conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;

        let result = conn.query_row(
            "SELECT tests, updated_at FROM last_failed_tests WHERE project_path = ?1",
            params![project_path],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        );

        match result {
            Ok((tests, updated_at)) => Ok(Some(LastFailedSet {
                project_path: project_path.to_string(),
                tests: parse_id_list(&tests)?,
                updated_at: parse_timestamp(&updated_at)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AppError::database(e.to_string())),
        }
    }

    fn cleanup_old_results_sync(pool: &DbPool, days: u32) -> AppResult<usize> {
        let conn = pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))?;
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let deleted = conn.execute(
            "DELETE FROM test_results WHERE created_at < ?1",
            params![format_timestamp(&cutoff)],
        )?;
        Ok(deleted)
    }

    /// Results of one project, most recent first
    pub async fn list_results_for_project(
        &self,
        project_path: &str,
        limit: usize,
    ) -> AppResult<Vec<TestResultSummary>> {
        let pool = self.pool.clone();
        let project_path = project_path.to_string();
        tokio::task::spawn_blocking(move || {
            Self::list_results_sync(&pool, Some(project_path.as_str()), limit)
        })
        .await
        .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
    }

    /// Delete results older than `days` days; returns how many were removed.
    ///
    /// Last-failed sets are kept: they describe the latest failure, not a
    /// run, and are replaced by the next failing run anyway.
    pub async fn cleanup_old_results(&self, days: u32) -> AppResult<usize> {
        let pool = self.pool.clone();
        let deleted =
            tokio::task::spawn_blocking(move || Self::cleanup_old_results_sync(&pool, days))
                .await
                .map_err(|e| AppError::internal(format!("Task join error: {}", e)))??;
        tracing::info!(days, deleted, "Cleaned up old test results");
        Ok(deleted)
    }
}

#[async_trait]
impl ResultStore for Database {
    async fn store_result(
        &self,
        result: &TestResult,
        config: &TestExecutionConfig,
    ) -> CoreResult<()> {
        let pool = self.pool.clone();
        let result = result.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::store_result_sync(&pool, &result, &config))
            .await
            .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
            .map_err(Into::into)
    }

    async fn get_result(&self, id: &str) -> CoreResult<Option<TestResult>> {
        let pool = self.pool.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || Self::get_result_sync(&pool, &id))
            .await
            .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
            .map_err(Into::into)
    }

    async fn list_results(&self, limit: usize) -> CoreResult<Vec<TestResultSummary>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || Self::list_results_sync(&pool, None, limit))
            .await
            .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
            .map_err(Into::into)
    }

    async fn get_last_failed_set(&self, project_path: &str) -> CoreResult<Option<LastFailedSet>> {
        let pool = self.pool.clone();
        let project_path = project_path.to_string();
        tokio::task::spawn_blocking(move || Self::get_last_failed_sync(&pool, &project_path))
            .await
            .map_err(|e| AppError::internal(format!("Task join error: {}", e)))?
            .map_err(Into::into)
    }
}
