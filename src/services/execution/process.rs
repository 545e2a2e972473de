//! Process Supervision
//!
//! The `ProcessRunner` seam used by the orchestrator, plus the shared
//! supervisor that spawns a command, collects stdout and stderr line by
//! line in arrival order, and enforces the wall-clock timeout and
//! cancellation with terminate-then-kill.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use test_relay_core::{OutputStream, ProgressEvent};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::utils::error::{AppError, AppResult};

/// How long to keep reading buffered output after the process is gone.
/// Grandchildren that inherited the pipes could otherwise hold us forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One command to run under supervision.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// Host working directory (the project root)
    pub cwd: PathBuf,
    /// Extra environment for the command
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Correlation id of the run; containers are named after it
    pub result_id: String,
    /// Image for container runs
    pub image: Option<String>,
}

/// What came out of a supervised run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// stdout and stderr interleaved in arrival order, one line each
    pub combined_output: String,
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    /// Host pid of the supervised process
    pub pid: Option<u32>,
}

/// Runs a test command somewhere and reports how it ended.
///
/// Only failures to start or talk to the runtime are errors; a command
/// that runs and fails is a successful `ProcessOutput` with a non-zero
/// exit code.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn execute(
        &self,
        request: &ExecutionRequest,
        events: Option<mpsc::Sender<ProgressEvent>>,
        cancel: CancellationToken,
    ) -> AppResult<ProcessOutput>;
}

/// Send a progress event if anyone is listening.
pub(crate) async fn emit(events: Option<&mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = events {
        // a dropped receiver only means nobody watches the progress
        let _ = tx.send(event).await;
    }
}

/// Forward an output line without waiting on the listener.
///
/// Returns `false` when the line was dropped because the buffer is full.
/// The supervisor loop must keep polling its deadline, so output lines
/// never wait for a slow reader; `combined_output` still has every line.
fn emit_output(
    events: Option<&mpsc::Sender<ProgressEvent>>,
    stream: OutputStream,
    line: String,
) -> bool {
    match events {
        Some(tx) => match tx.try_send(ProgressEvent::Output { stream, line }) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
        },
        None => true,
    }
}

enum Finish {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Build a `Command` for `argv` with piped output in its own process group.
pub(crate) fn command_for(argv: &[String]) -> AppResult<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AppError::command("Empty command line"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    Ok(cmd)
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<(OutputStream, String)>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(&['\n', '\r'][..])
                        .to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(stream = %stream, error = %e, "Output reader stopped");
                    break;
                }
            }
        }
    })
}

/// Signal the whole process group of `pid`.
#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: libc::c_int) {
    if let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) {
        // SAFETY: plain syscall on a pgid we created with process_group(0)
        unsafe {
            libc::kill(-pid, signal);
        }
    }
}

/// Terminate, wait up to `grace`, then kill.
async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM);
        if tokio::time::timeout(grace, child.wait()).await.is_ok() {
            // leader is gone; make sure nothing it forked survives
            signal_group(pid, libc::SIGKILL);
            return;
        }
        signal_group(pid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = (pid, grace);

    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill test process");
    }
}

/// Spawn `cmd` and supervise it until it exits, times out or is cancelled.
pub(crate) async fn supervise(
    mut cmd: Command,
    timeout: Duration,
    grace: Duration,
    events: Option<&mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) -> AppResult<ProcessOutput> {
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::command(format!("Failed to spawn process: {}", e)))?;
    let pid = child.id();

    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, OutputStream::Stdout, line_tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, OutputStream::Stderr, line_tx.clone()));
    }
    drop(line_tx);

    let mut combined = String::new();
    let mut dropped = 0usize;
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let finish = loop {
        tokio::select! {
            Some((stream, line)) = line_rx.recv() => {
                combined.push_str(&line);
                combined.push('\n');
                if !emit_output(events, stream, line) {
                    dropped += 1;
                }
            }
            status = child.wait() => break Finish::Exited(status),
            _ = &mut deadline => break Finish::TimedOut,
            _ = cancel.cancelled() => break Finish::Cancelled,
        }
    };

    let (exit_code, timed_out, cancelled) = match finish {
        Finish::Exited(status) => {
            let status = status
                .map_err(|e| AppError::command(format!("Failed to wait for process: {}", e)))?;
            (status.code(), false, false)
        }
        Finish::TimedOut => {
            tracing::warn!(
                pid = ?pid,
                timeout_secs = timeout.as_secs(),
                "Test process timed out; terminating"
            );
            terminate(&mut child, pid, grace).await;
            (None, true, false)
        }
        Finish::Cancelled => {
            tracing::info!(pid = ?pid, "Test run cancelled; terminating");
            terminate(&mut child, pid, grace).await;
            (None, false, true)
        }
    };

    let drain = async {
        while let Some((stream, line)) = line_rx.recv().await {
            combined.push_str(&line);
            combined.push('\n');
            if !emit_output(events, stream, line) {
                dropped += 1;
            }
        }
    };
    if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        tracing::debug!(pid = ?pid, "Output pipes still open after exit; stopped reading");
    }
    if dropped > 0 {
        tracing::debug!(
            pid = ?pid,
            dropped,
            "Progress listener fell behind; output lines not forwarded"
        );
    }
    for reader in readers {
        reader.abort();
    }
    if timed_out {
        combined.push_str(&format!(
            "[Test execution timed out after {} seconds]\n",
            timeout.as_secs()
        ));
    }

    Ok(ProcessOutput {
        combined_output: combined,
        exit_code,
        timed_out,
        cancelled,
        pid,
    })
}
