//! # Main - CLI Entry Point
//!
//! Thin command-line front end over the test relay library. Every
//! subcommand prints JSON on stdout; logs go to stderr.
//!
//! ## Subcommands
//!
//! - `run`: execute tests and store the result (`--stream` prints progress)
//! - `get`: fetch a stored result by id
//! - `list`: most recent results, optionally for one project
//! - `last-failed`: failed identifiers of a project's last failing run
//! - `cleanup`: delete results older than N days
//! - `config`: print the effective settings, persisting any `--set-*` changes first
//!
//! ## Global Options
//!
//! - `--config` / `TEST_RELAY_CONFIG`: settings file (default ~/.test-relay/config.json)
//! - `--database` / `TEST_RELAY_DB`: SQLite file (default ~/.test-relay/results.db)

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use test_relay::{
    ConfigService, Database, ExecutionMode, ResultStore, RunnerKind, SettingsUpdate,
    TestExecutionConfig, TestExecutionOrchestrator, TestResult, TestStatus,
};

#[derive(Parser)]
#[command(name = "test-relay", version, about = "Run Python test suites and keep their results")]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, env = "TEST_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database for results
    #[arg(long, env = "TEST_RELAY_DB")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tests and store the result
    Run {
        /// Absolute path of the project root
        project_path: PathBuf,
        /// File, directory or pytest node id relative to the project
        #[arg(long, default_value = "")]
        test_path: String,
        /// pytest, unittest, nose2 or uv-pytest
        #[arg(long, default_value = "pytest", value_parser = parse_runner)]
        runner: RunnerKind,
        /// local or container
        #[arg(long, default_value = "local", value_parser = parse_mode)]
        mode: ExecutionMode,
        /// Stop after this many failures
        #[arg(long)]
        max_failures: Option<u32>,
        /// Only run the tests that failed last time
        #[arg(long)]
        last_failed: bool,
        /// Wall-clock timeout in seconds (defaults to the configured value)
        #[arg(long)]
        timeout: Option<u64>,
        /// Token budget for the stored output (defaults to the configured value)
        #[arg(long)]
        max_tokens: Option<usize>,
        /// Docker image for container mode
        #[arg(long)]
        image: Option<String>,
        /// Print progress events to stderr while running
        #[arg(long)]
        stream: bool,
        /// Extra arguments passed to the runner after `--`
        #[arg(last = true)]
        extra_args: Vec<String>,
    },
    /// Fetch a stored result
    Get {
        id: String,
    },
    /// List recent results
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only results of this project
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Show the last failed tests of a project
    LastFailed {
        project_path: PathBuf,
    },
    /// Delete results older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Print the effective settings, applying any changes first
    Config {
        /// Python interpreter used for local runs
        #[arg(long)]
        set_python: Option<String>,
        /// uv executable for the uv-pytest runner
        #[arg(long)]
        set_uv: Option<String>,
        /// Default timeout in seconds
        #[arg(long)]
        set_timeout: Option<u64>,
        /// Default token budget
        #[arg(long)]
        set_max_tokens: Option<usize>,
        /// Seconds between SIGTERM and SIGKILL
        #[arg(long)]
        set_terminate_grace: Option<u64>,
        /// Docker CLI binary
        #[arg(long)]
        set_docker: Option<String>,
        /// Default container image
        #[arg(long)]
        set_image: Option<String>,
        /// Shell command run in the container before the tests
        #[arg(long)]
        set_setup_command: Option<String>,
        /// SQLite database for results
        #[arg(long)]
        set_database: Option<PathBuf>,
    },
}

fn parse_runner(s: &str) -> Result<RunnerKind, String> {
    RunnerKind::from_str(s).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<ExecutionMode, String> {
    ExecutionMode::from_str(s).map_err(|e| e.to_string())
}

/// Canonical form used as the project key, falling back to the input.
fn project_key(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code_for(result: &TestResult) -> i32 {
    match result.status {
        TestStatus::Passed | TestStatus::NoTests => 0,
        TestStatus::Failed => 1,
        TestStatus::Error | TestStatus::Timeout => 2,
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling test run");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // LOG_FORMAT=json for machine consumption, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    let mut config_service = match &cli.config {
        Some(path) => ConfigService::with_path(path),
        None => ConfigService::new(),
    }
    .context("Failed to load settings")?;
    let settings = config_service.get_config_clone();

    let database = match cli.database.clone().or_else(|| settings.database_path.clone()) {
        Some(path) => Database::open(&path),
        None => Database::new(),
    }
    .context("Failed to open result database")?;
    let database = Arc::new(database);

    match cli.command {
        Commands::Run {
            project_path,
            test_path,
            runner,
            mode,
            max_failures,
            last_failed,
            timeout,
            max_tokens,
            image,
            stream,
            extra_args,
        } => {
            let config = TestExecutionConfig {
                project_path,
                test_path,
                runner,
                mode,
                max_failures,
                rerun_last_failed: last_failed,
                timeout_secs: timeout.unwrap_or(settings.default_timeout_secs),
                max_tokens: max_tokens.unwrap_or(settings.default_max_tokens),
                container_image: image,
                extra_args,
            };
            let orchestrator = TestExecutionOrchestrator::new(settings, database.clone());

            let result = if stream {
                let mut run = orchestrator.run_streaming(config)?;
                let token = CancellationToken::new();
                cancel_on_ctrl_c(token.clone());
                loop {
                    tokio::select! {
                        event = run.events.recv() => match event {
                            Some(event) => eprintln!("{}", event.to_display_line()),
                            None => break,
                        },
                        _ = token.cancelled(), if !token.is_cancelled() => run.cancel(),
                    }
                }
                run.finish().await?
            } else {
                let token = CancellationToken::new();
                cancel_on_ctrl_c(token.clone());
                orchestrator.run_with_cancel(config, token).await?
            };

            print_json(&result)?;
            std::process::exit(exit_code_for(&result));
        }
        Commands::Get { id } => match database.get_result(&id).await? {
            Some(result) => print_json(&result)?,
            None => anyhow::bail!("No test result with id {}", id),
        },
        Commands::List { limit, project } => {
            let results = match project {
                Some(project) => {
                    database
                        .list_results_for_project(&project_key(&project), limit)
                        .await?
                }
                None => database.list_results(limit).await?,
            };
            print_json(&results)?;
        }
        Commands::LastFailed { project_path } => {
            let tests = database.get_last_failed(&project_key(&project_path)).await?;
            print_json(&tests)?;
        }
        Commands::Cleanup { days } => {
            let deleted = database.cleanup_old_results(days).await?;
            tracing::info!(deleted, days, "Cleaned up old test results");
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Commands::Config {
            set_python,
            set_uv,
            set_timeout,
            set_max_tokens,
            set_terminate_grace,
            set_docker,
            set_image,
            set_setup_command,
            set_database,
        } => {
            let update = SettingsUpdate {
                database_path: set_database,
                python_executable: set_python,
                uv_executable: set_uv,
                default_timeout_secs: set_timeout,
                default_max_tokens: set_max_tokens,
                terminate_grace_secs: set_terminate_grace,
                docker_binary: set_docker,
                default_image: set_image,
                setup_command: set_setup_command,
            };
            if update.is_empty() {
                print_json(config_service.get_config())?;
            } else {
                let updated = config_service
                    .update_config(update)
                    .context("Failed to update settings")?;
                tracing::info!("Settings updated");
                print_json(&updated)?;
            }
        }
    }

    Ok(())
}
