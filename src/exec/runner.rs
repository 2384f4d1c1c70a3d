// src/exec/runner.rs

//! External process runner.
//!
//! Spawns a program with an argument vector (never through a shell), captures
//! stdout/stderr as they are produced, and enforces a timeout: SIGTERM first,
//! SIGKILL after a grace period. On unix the child leads its own process group
//! and signals go to the whole group, so background grandchildren are covered.
//!
//! One deadline covers both the exit of the child and the draining of its
//! output pipes. A timeout comes back as [`RunResult::timed_out`] together
//! with whatever output was captured; callers raise
//! [`crate::errors::SeqError::ProcessTimeout`] from it. Spawn failures are an `Error`
//! result, not an `Err`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::errors::Result;
use crate::exec::env::child_env;

/// Grace period between SIGTERM and SIGKILL on timeout.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub step_id: String,
    pub run_id: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    /// Explicit variables, added on top of the filtered ambient environment.
    pub env: BTreeMap<String, String>,
}

/// Classified process outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Exit code 0.
    Success,
    /// Any other exit code.
    Failed,
    /// No exit code: killed by a signal, timed out or never started.
    Error,
}

impl RunStatus {
    pub fn classify(exit_code: Option<i32>) -> Self {
        match exit_code {
            Some(0) => RunStatus::Success,
            Some(_) => RunStatus::Failed,
            None => RunStatus::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub step_id: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    /// The deadline passed before the process exited and closed its output.
    pub timed_out: bool,
}

/// New run identifier: UTC timestamp plus a random suffix, safe as a
/// directory name and sortable by start time.
pub fn new_run_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    kill_grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }
}

impl ProcessRunner {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run to completion or to the deadline, keeping the output either way.
    pub async fn run(&self, req: RunRequest) -> Result<RunResult> {
        let start_time = Utc::now();
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + req.timeout;

        info!(
            step = %req.step_id,
            run_id = %req.run_id,
            program = %req.program,
            cwd = ?req.cwd,
            timeout_ms = req.timeout.as_millis() as u64,
            "starting step process"
        );

        let mut cmd = Command::new(&req.program);
        cmd.args(&req.args)
            .current_dir(&req.cwd)
            .env_clear()
            .envs(child_env(&req.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(step = %req.step_id, error = %e, "failed to spawn step process");
                return Ok(RunResult {
                    step_id: req.step_id,
                    run_id: req.run_id,
                    start_time,
                    end_time: Utc::now(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    exit_code: None,
                    status: RunStatus::Error,
                    stdout: String::new(),
                    stderr: format!("failed to spawn '{}': {e}", req.program),
                    timed_out: false,
                });
            }
        };
        // `Child::id` is gone once the child is reaped, but its group may live on.
        let pid = child.id();

        let mut stdout = Capture::spawn(child.stdout.take(), &req.step_id, "stdout");
        let mut stderr = Capture::spawn(child.stderr.take(), &req.step_id, "stderr");

        let finished = tokio::time::timeout_at(deadline, async {
            let status = child.wait().await;
            stdout.finish().await;
            stderr.finish().await;
            status
        })
        .await;

        let (exit_code, timed_out) = match finished {
            Ok(waited) => {
                let status: ExitStatus = waited
                    .with_context(|| format!("waiting for process of step '{}'", req.step_id))?;
                (status.code(), false)
            }
            Err(_) => {
                warn!(
                    step = %req.step_id,
                    run_id = %req.run_id,
                    timeout_ms = req.timeout.as_millis() as u64,
                    "step process timed out; terminating"
                );
                self.terminate(&mut child, pid, &req.step_id).await;
                stdout.abort();
                stderr.abort();
                (None, true)
            }
        };

        let run_status = RunStatus::classify(exit_code);
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            step = %req.step_id,
            run_id = %req.run_id,
            exit_code = ?exit_code,
            status = ?run_status,
            timed_out,
            duration_ms,
            "step process exited"
        );

        Ok(RunResult {
            step_id: req.step_id,
            run_id: req.run_id,
            start_time,
            end_time: Utc::now(),
            duration_ms,
            exit_code,
            status: run_status,
            stdout: stdout.text(),
            stderr: stderr.text(),
            timed_out,
        })
    }

    /// SIGTERM, wait for the grace period, then SIGKILL.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>, step_id: &str) {
        signal_group(child, pid, step_id, Signal::Term);

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(_) => debug!(step = %step_id, "process exited after SIGTERM"),
            Err(_) => warn!(
                step = %step_id,
                grace_ms = self.kill_grace.as_millis() as u64,
                "process ignored SIGTERM; killing"
            ),
        }
        // The leader may be gone while the rest of its group is not.
        signal_group(child, pid, step_id, Signal::Kill);
        if let Err(e) = child.kill().await {
            debug!(step = %step_id, error = %e, "process already gone");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, pid: Option<u32>, step_id: &str, signal: Signal) {
    let Some(pid) = pid else {
        return;
    };
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: kill(2) has no memory-safety preconditions. The child was
    // spawned as the leader of group `pid`.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(step = %step_id, pid, ?signal, error = %err, "failed to signal process group");
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _pid: Option<u32>, step_id: &str, _signal: Signal) {
    if let Err(e) = child.start_kill() {
        debug!(step = %step_id, error = %e, "failed to terminate process");
    }
}

/// Output of one stream, readable even when the reader task is aborted.
struct Capture {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl Capture {
    fn spawn<R>(reader: Option<R>, step_id: &str, stream: &'static str) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let Some(reader) = reader else {
            return Self { buf, handle: None };
        };
        let step_id = step_id.to_string();
        let sink = Arc::clone(&buf);

        let handle = tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut line = Vec::new();

            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        trace!(step = %step_id, stream, "{}", String::from_utf8_lossy(&line).trim_end());
                        sink.lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner())
                            .extend_from_slice(&line);
                    }
                    Err(e) => {
                        warn!(step = %step_id, stream, error = %e, "error reading process output");
                        break;
                    }
                }
            }
        });

        Self {
            buf,
            handle: Some(handle),
        }
    }

    /// Wait for the stream to reach EOF.
    async fn finish(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            if let Err(e) = handle.await {
                warn!(error = %e, "output reader task failed");
            }
            self.handle = None;
        }
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn text(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }
}
