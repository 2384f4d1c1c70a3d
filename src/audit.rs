// src/audit.rs

//! Audit trail.
//!
//! The engine emits one [`AuditEvent`] per state-changing operation and per
//! reconciler classification. Persisting, redacting and paging events is the
//! sink's business; the engine only ever calls [`AuditSink::append`], and a
//! failing sink is logged and otherwise ignored (see [`record`]).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Result, SeqError};

/// Outcome recorded with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub result: AuditResult,
}

impl AuditEvent {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            payload: None,
            result,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<()>;
}

/// Append `event`, logging instead of failing.
pub fn record(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.append(&event) {
        warn!(
            action = %event.action,
            target = %event.target,
            error = %e,
            "failed to append audit event"
        );
    }
}

/// One JSON object per line, appended to a file.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every event; a missing file yields none.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>> {
        let Some(text) = crate::fs::read_optional(&self.path)? else {
            return Ok(Vec::new());
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(SeqError::from))
            .collect()
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| SeqError::Other(anyhow!("audit lock poisoned")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating audit dir {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening audit log {:?}", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to audit log {:?}", self.path))?;
        Ok(())
    }
}

/// Keeps events in memory. For tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| SeqError::Other(anyhow!("audit lock poisoned")))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl AuditSink for Broken {
        fn append(&self, _event: &AuditEvent) -> Result<()> {
            Err(SeqError::Other(anyhow!("disk full")))
        }
    }

    #[test]
    fn jsonl_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAuditSink::new(dir.path().join("logs/audit.jsonl"));

        sink.append(&AuditEvent::new("cli", "step.add", "a", AuditResult::Success))
            .unwrap();
        sink.append(
            &AuditEvent::new("cli", "step.run", "a", AuditResult::Failure)
                .with_payload(serde_json::json!({ "exitCode": 2 })),
        )
        .unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(text.lines().count(), 2);

        let events = sink.read_all().unwrap();
        assert_eq!(events[0].action, "step.add");
        assert_eq!(events[0].payload, None);
        assert_eq!(events[1].result, AuditResult::Failure);
        assert_eq!(events[1].payload.as_ref().unwrap()["exitCode"], 2);
    }

    #[test]
    fn record_swallows_sink_errors() {
        record(&Broken, AuditEvent::new("t", "x", "y", AuditResult::Success));

        let mem = MemoryAuditSink::new();
        record(&mem, AuditEvent::new("t", "x", "y", AuditResult::Success));
        assert_eq!(mem.events().len(), 1);
    }
}
