// src/artifacts.rs

//! Run artifacts.
//!
//! Every execution attempt leaves `<runs>/<run_id>/<step_id>/` behind with
//! `stdout.log`, `stderr.log` and `status.json`. Artifacts are written once
//! and never touched again.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{Result, SeqError};
use crate::exec::{RunResult, RunStatus};
use crate::fs::write_atomic;
use crate::sequence::validate::check_id;

pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";
pub const STATUS_FILE: &str = "status.json";

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub step_id: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Milliseconds.
    pub duration: u64,
    pub exit_code: Option<i32>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
}

impl From<&RunResult> for RunRecord {
    fn from(r: &RunResult) -> Self {
        Self {
            step_id: r.step_id.clone(),
            run_id: r.run_id.clone(),
            start_time: r.start_time,
            end_time: r.end_time,
            duration: r.duration_ms,
            exit_code: r.exit_code,
            status: r.status,
            timed_out: r.timed_out,
        }
    }
}

/// Directory holding the artifacts of one step in one run.
pub fn artifact_dir(runs_root: &Path, run_id: &str, step_id: &str) -> PathBuf {
    runs_root.join(run_id).join(step_id)
}

/// Persist `result` and return its artifact directory.
pub fn save(runs_root: &Path, result: &RunResult) -> Result<PathBuf> {
    if let Some(v) = check_id("step_id", &result.step_id) {
        return Err(SeqError::Validation(vec![v]));
    }
    if !is_safe_component(&result.run_id) {
        return Err(SeqError::validation(
            "run_id",
            format!("'{}' is not a valid run id", result.run_id),
        ));
    }

    let dir = artifact_dir(runs_root, &result.run_id, &result.step_id);
    let record = serde_json::to_string_pretty(&RunRecord::from(result))?;

    write_atomic(&dir.join(STDOUT_FILE), result.stdout.as_bytes())?;
    write_atomic(&dir.join(STDERR_FILE), result.stderr.as_bytes())?;
    // status.json last: its presence marks a complete artifact.
    write_atomic(&dir.join(STATUS_FILE), record.as_bytes())?;

    debug!(step = %result.step_id, run_id = %result.run_id, dir = ?dir, "run artifacts saved");
    Ok(dir)
}

pub fn load_record(dir: &Path) -> Result<RunRecord> {
    let text = std::fs::read_to_string(dir.join(STATUS_FILE))?;
    Ok(serde_json::from_str(&text)?)
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
