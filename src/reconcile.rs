// src/reconcile.rs

//! Orphan reconciliation.
//!
//! A step recorded as `RUNNING` is only trusted while its process can still
//! be addressed through the process backend. Anything else (backend down,
//! no recorded index, index no longer selectable) is an orphan and goes to
//! `FAILED`. All orphans are persisted in one write.

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditResult, AuditSink, record};
use crate::dag::set_step_status;
use crate::errors::Result;
use crate::exec::{ProcessBackend, ProcessMapStore};
use crate::sequence::SequenceStore;
use crate::types::{NodeId, StepStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Steps that were `RUNNING` when the pass started.
    pub checked: usize,
    pub orphaned: Vec<NodeId>,
    /// Orphans actually moved to `FAILED`.
    pub reconciled: Vec<NodeId>,
    /// Running steps whose process answered the probe.
    pub alive: Vec<NodeId>,
    pub backing_available: bool,
}

#[derive(Debug, Clone, Copy)]
enum OrphanReason {
    BackendUnreachable,
    NoMapping,
    ProcessGone,
}

impl OrphanReason {
    fn as_str(self) -> &'static str {
        match self {
            OrphanReason::BackendUnreachable => "backend-unreachable",
            OrphanReason::NoMapping => "no-process-mapping",
            OrphanReason::ProcessGone => "process-gone",
        }
    }
}

pub async fn reconcile(
    store: &SequenceStore,
    process_map: &ProcessMapStore,
    backend: &dyn ProcessBackend,
    audit: &dyn AuditSink,
    actor: &str,
) -> Result<ReconcileReport> {
    let seq = store.read_strict()?;
    let running: Vec<NodeId> = seq
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Running)
        .map(|s| s.id.clone())
        .collect();

    let backing_available = backend.is_reachable().await;
    let mut report = ReconcileReport {
        checked: running.len(),
        backing_available,
        ..ReconcileReport::default()
    };
    if running.is_empty() {
        info!(backing_available, "reconcile: no running steps");
        return Ok(report);
    }

    let indices = process_map.load()?;
    let mut orphans: Vec<(NodeId, OrphanReason)> = Vec::new();

    for id in running {
        let reason = match indices.get(&id) {
            _ if !backing_available => Some(OrphanReason::BackendUnreachable),
            None => Some(OrphanReason::NoMapping),
            Some(&index) => match backend.select_process(index).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(step = %id, index, error = %e, "process probe failed");
                    Some(OrphanReason::ProcessGone)
                }
            },
        };

        match reason {
            Some(reason) => orphans.push((id, reason)),
            None => {
                info!(step = %id, "reconcile: process alive");
                record(
                    audit,
                    AuditEvent::new(actor, "reconcile.alive", &id, AuditResult::Success),
                );
                report.alive.push(id);
            }
        }
    }

    if orphans.is_empty() {
        return Ok(report);
    }

    let reconciled = store.update(|seq| {
        let mut moved = Vec::new();
        for (id, _) in &orphans {
            // Skip steps that changed since the probe started.
            if seq.step(id).map(|s| s.status) == Some(StepStatus::Running) {
                set_step_status(seq, id, StepStatus::Failed)?;
                moved.push(id.clone());
            }
        }
        Ok(moved)
    })?;

    for (id, reason) in &orphans {
        let moved = reconciled.contains(id);
        info!(step = %id, reason = reason.as_str(), moved, "reconcile: orphaned step");
        record(
            audit,
            AuditEvent::new(
                actor,
                "reconcile.orphaned",
                id,
                if moved {
                    AuditResult::Success
                } else {
                    AuditResult::Failure
                },
            )
            .with_payload(json!({ "reason": reason.as_str(), "status": "FAILED" })),
        );
    }

    let orphan_ids: Vec<NodeId> = orphans.into_iter().map(|(id, _)| id).collect();
    if let Err(e) = process_map.remove_many(&orphan_ids) {
        warn!(error = %e, "failed to drop process indices of orphaned steps");
    }

    report.orphaned = orphan_ids;
    report.reconciled = reconciled;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::exec::UnreachableBackend;
    use crate::sequence::{Sequence, Step};
    use crate::types::Model;

    #[tokio::test]
    async fn unreachable_backend_fails_every_running_step() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(dir.path().join("sequence.toml"));
        let map = ProcessMapStore::new(dir.path().join("processes.toml"));

        let mut seq = Sequence::new("r");
        for (id, status) in [
            ("a", StepStatus::Running),
            ("b", StepStatus::Running),
            ("c", StepStatus::Done),
        ] {
            let mut s = Step::new(id, id, Model::Codex, "p.md");
            s.status = status;
            seq.steps.push(s);
        }
        store.write(&seq).unwrap();
        map.set("a", 3).unwrap();

        let audit = MemoryAuditSink::new();
        let report = reconcile(&store, &map, &UnreachableBackend, &audit, "test")
            .await
            .unwrap();

        assert_eq!(report.checked, 2);
        assert!(!report.backing_available);
        assert_eq!(report.orphaned, vec!["a", "b"]);
        assert_eq!(report.reconciled, vec!["a", "b"]);

        let seq = store.read().unwrap();
        assert_eq!(seq.step("a").unwrap().status, StepStatus::Failed);
        assert_eq!(seq.step("b").unwrap().status, StepStatus::Failed);
        assert_eq!(seq.step("c").unwrap().status, StepStatus::Done);
        assert!(map.load().unwrap().is_empty());
        assert_eq!(audit.events().len(), 2);
    }

    #[tokio::test]
    async fn nothing_running_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SequenceStore::new(dir.path().join("sequence.toml"));
        let map = ProcessMapStore::new(dir.path().join("processes.toml"));

        let report = reconcile(&store, &map, &UnreachableBackend, &MemoryAuditSink::new(), "t")
            .await
            .unwrap();
        assert_eq!(report.checked, 0);
        assert!(!store.path().exists());
    }
}
