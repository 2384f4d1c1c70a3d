// src/engine/orchestrator.rs

//! The orchestration service.
//!
//! `Orchestrator` is the one entry point the CLI (or any embedding) talks to.
//! Every operation re-reads the sequence document, so there is no long-lived
//! in-memory graph: mutations are a single read-modify-write through
//! [`SequenceStore::update`], and every state change is reported to the audit
//! sink.
//!
//! Execution follows the same discipline: a step is persisted as `RUNNING`
//! right before its process starts and as `DONE`/`FAILED` once it ends. A
//! failure to persist the final status is logged and never hides the
//! execution error itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::artifacts;
use crate::audit::{AuditEvent, AuditResult, AuditSink, record};
use crate::config::EngineConfig;
use crate::dag::state::dependency_satisfied;
use crate::dag::{approve_gate, block_gate, is_runnable, runnable_steps, set_step_status};
use crate::engine::action::SequenceAction;
use crate::errors::{Result, SeqError};
use crate::exec::{
    CommandLine, ProcessBackend, ProcessMapStore, ProcessRunner, RunRequest, RunStatus,
    UnreachableBackend, build_command, new_run_id,
};
use crate::policy::{PolicyAction, PolicyDecision, PolicyEngine};
use crate::reconcile::{self, ReconcileReport};
use crate::sequence::mutate;
use crate::sequence::{Gate, Sequence, SequenceStore, Step, StepPatch};
use crate::types::{ActionType, FailPolicy, NodeId, StepStatus};
use crate::workspace::Workspace;

/// Summary of one finished execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRun {
    pub step_id: NodeId,
    pub run_id: String,
    /// Step status after the run.
    pub status: StepStatus,
    pub run_status: RunStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,
    /// Whether the final status made it to disk.
    pub persisted: bool,
}

/// Result of one member of a batch or group run.
#[derive(Debug)]
pub struct StepOutcome {
    pub step_id: NodeId,
    pub result: Result<StepRun>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(run) if run.status == StepStatus::Done)
    }

    fn skipped(&self) -> bool {
        matches!(&self.result, Err(SeqError::NotRunnable { .. }))
    }

    pub fn to_json(&self) -> Value {
        match &self.result {
            Ok(run) => json!({ "stepId": self.step_id, "run": run }),
            Err(e) => json!({ "stepId": self.step_id, "error": e.to_payload(false) }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopOutcome {
    pub index: Option<u32>,
    pub backend_stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartOutcome {
    pub index: u32,
    pub backend_restarted: bool,
}

/// Everything needed to start one step.
#[derive(Debug, Clone)]
struct PreparedRun {
    step_id: NodeId,
    command: CommandLine,
    /// As written on the step, relative to the workspace root.
    cwd: PathBuf,
    timeout: Duration,
}

impl PreparedRun {
    fn policy_action(&self, action_type: ActionType) -> PolicyAction {
        PolicyAction::new(action_type)
            .command(self.command.to_string())
            .cwd(&self.cwd)
    }
}

struct Inner {
    workspace: Workspace,
    config: EngineConfig,
    store: SequenceStore,
    process_map: ProcessMapStore,
    backend: Arc<dyn ProcessBackend>,
    audit: Arc<dyn AuditSink>,
    runner: ProcessRunner,
}

/// Cheap to clone; clones share the store lock and collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workspace", &self.inner.workspace)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        workspace: Workspace,
        config: EngineConfig,
        backend: Arc<dyn ProcessBackend>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let runner = ProcessRunner::new(config.kill_grace());
        Self {
            inner: Arc::new(Inner {
                store: workspace.sequence_store(),
                process_map: workspace.process_map(),
                workspace,
                config,
                backend,
                audit,
                runner,
            }),
        }
    }

    /// Workspace defaults: settings from `config.toml`, JSONL audit log, and
    /// no process multiplexer.
    pub fn open(workspace: Workspace) -> Result<Self> {
        let config = workspace.load_config()?;
        let audit = Arc::new(workspace.audit_sink());
        Ok(Self::new(
            workspace,
            config,
            Arc::new(UnreachableBackend),
            audit,
        ))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.inner.workspace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SequenceStore {
        &self.inner.store
    }

    pub fn process_map(&self) -> &ProcessMapStore {
        &self.inner.process_map
    }

    /// The policy as currently on disk.
    pub fn policy(&self) -> Result<PolicyEngine> {
        self.inner.workspace.load_policy()
    }

    fn root(&self) -> &Path {
        self.inner.workspace.root()
    }

    // ---------------------------------------------------------------------
    // Audit and policy plumbing
    // ---------------------------------------------------------------------

    fn audit<T>(&self, action: &str, target: &str, payload: Option<Value>, res: &Result<T>) {
        let (result, payload) = match res {
            Ok(_) => (AuditResult::Success, payload),
            Err(e) => {
                let error = serde_json::to_value(e.to_payload(false)).unwrap_or(Value::Null);
                let payload = match payload {
                    Some(Value::Object(mut map)) => {
                        map.insert("error".to_string(), error);
                        Value::Object(map)
                    }
                    _ => json!({ "error": error }),
                };
                (AuditResult::Failure, Some(payload))
            }
        };

        let mut event = AuditEvent::new(&self.inner.config.actor, action, target, result);
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        record(self.inner.audit.as_ref(), event);
    }

    fn mutate<T, F>(&self, action: &str, target: &str, payload: Option<Value>, f: F) -> Result<T>
    where
        F: FnOnce(&mut Sequence) -> Result<T>,
    {
        let res = self.inner.store.update(f);
        self.audit(action, target, payload, &res);
        res
    }

    fn check(
        &self,
        policy: &PolicyEngine,
        action: &PolicyAction,
        confirmed: bool,
        audit_action: &str,
        target: &str,
    ) -> Result<PolicyDecision> {
        let res = policy.enforce(action, confirmed);
        if res.is_err() {
            self.audit(audit_action, target, None, &res);
        }
        res
    }

    fn enforce(
        &self,
        action: &PolicyAction,
        confirmed: bool,
        audit_action: &str,
        target: &str,
    ) -> Result<PolicyDecision> {
        let policy = self.policy()?;
        self.check(&policy, action, confirmed, audit_action, target)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Tolerant read of the current sequence.
    pub fn sequence(&self) -> Result<Sequence> {
        self.inner.store.read()
    }

    pub fn runnable(&self) -> Result<Vec<NodeId>> {
        let seq = self.sequence()?;
        Ok(runnable_steps(&seq).into_iter().map(|s| s.id.clone()).collect())
    }

    /// Evaluate a command against the policy without running anything.
    pub fn policy_check(&self, command: &str, cwd: Option<&Path>) -> Result<PolicyDecision> {
        let mut action = PolicyAction::new(ActionType::RunStep).command(command);
        if let Some(cwd) = cwd {
            action = action.cwd(cwd);
        }
        Ok(self.policy()?.evaluate(&action))
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Create an empty sequence document.
    pub fn init(&self, name: &str) -> Result<Sequence> {
        let path = self.inner.store.path();
        let res = if path.exists() {
            Err(SeqError::Conflict(format!("sequence document {:?}", path)))
        } else {
            let seq = Sequence::new(name);
            self.inner.store.write(&seq).map(|_| seq)
        };
        self.audit("sequence.init", name, None, &res);
        res
    }

    pub fn add_step(&self, step: Step, confirmed: bool) -> Result<()> {
        let id = step.id.clone();
        self.enforce(&PolicyAction::new(ActionType::AddStep), confirmed, "step.add", &id)?;
        let payload = json!({ "model": step.model, "dependsOn": step.depends_on });
        self.mutate("step.add", &id, Some(payload), |seq| mutate::add_step(seq, step))
    }

    pub fn update_step(&self, id: &str, patch: StepPatch) -> Result<()> {
        self.mutate("step.update", id, None, |seq| mutate::update_step(seq, id, patch))
    }

    /// Commanded status change. Returns the previous status.
    pub fn set_step_status(&self, id: &str, status: StepStatus) -> Result<StepStatus> {
        self.mutate(
            "step.status",
            id,
            Some(json!({ "status": status })),
            |seq| set_step_status(seq, id, status),
        )
    }

    pub fn remove_step(&self, id: &str, confirmed: bool) -> Result<Step> {
        self.enforce(&PolicyAction::new(ActionType::RemoveStep), confirmed, "step.remove", id)?;
        self.mutate("step.remove", id, None, |seq| mutate::remove_step(seq, id))
    }

    pub fn add_gate(&self, gate: Gate) -> Result<()> {
        let id = gate.id.clone();
        self.mutate("gate.add", &id, None, |seq| mutate::add_gate(seq, gate))
    }

    pub fn remove_gate(&self, id: &str) -> Result<Gate> {
        self.mutate("gate.remove", id, None, |seq| mutate::remove_gate(seq, id))
    }

    /// Approve a gate. Returns the steps released from `BLOCKED`.
    pub fn approve_gate(&self, id: &str, confirmed: bool) -> Result<Vec<NodeId>> {
        self.enforce(&PolicyAction::new(ActionType::ApproveGate), confirmed, "gate.approve", id)?;
        let res = self.inner.store.update(|seq| approve_gate(seq, id));
        let payload = res.as_ref().ok().map(|unblocked| json!({ "unblocked": unblocked }));
        self.audit("gate.approve", id, payload, &res);
        res
    }

    pub fn block_gate(&self, id: &str) -> Result<()> {
        self.mutate("gate.block", id, None, |seq| block_gate(seq, id))
    }

    /// `node` now depends on `dep`. A cycle leaves the document untouched.
    pub fn add_dependency(&self, node: &str, dep: &str) -> Result<()> {
        self.mutate("dep.add", node, Some(json!({ "dep": dep })), |seq| {
            mutate::add_dependency(seq, node, dep)
        })
    }

    pub fn remove_dependency(&self, node: &str, dep: &str) -> Result<()> {
        self.mutate("dep.remove", node, Some(json!({ "dep": dep })), |seq| {
            mutate::remove_dependency(seq, node, dep)
        })
    }

    pub fn add_parallel_group(
        &self,
        group_id: &str,
        template: Step,
        fanout: u32,
        confirmed: bool,
    ) -> Result<Vec<NodeId>> {
        let action = PolicyAction::new(ActionType::AddStep).fanout(fanout);
        self.enforce(&action, confirmed, "group.add", group_id)?;
        self.mutate(
            "group.add",
            group_id,
            Some(json!({ "fanout": fanout })),
            |seq| mutate::add_parallel_group(seq, group_id, &template, fanout),
        )
    }

    pub fn add_fusion(&self, synth: Step, candidates: &[NodeId], confirmed: bool) -> Result<()> {
        let id = synth.id.clone();
        self.enforce(&PolicyAction::new(ActionType::AddStep), confirmed, "fusion.add", &id)?;
        self.mutate(
            "fusion.add",
            &id,
            Some(json!({ "candidates": candidates })),
            |seq| mutate::add_fusion(seq, synth, candidates),
        )
    }

    // ---------------------------------------------------------------------
    // Local execution
    // ---------------------------------------------------------------------

    fn prepare(&self, seq: &Sequence, id: &str) -> Result<PreparedRun> {
        let step = seq
            .step(id)
            .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;
        if !is_runnable(seq, step) {
            return Err(not_runnable(seq, step));
        }
        self.prepare_command(step)
    }

    fn prepare_command(&self, step: &Step) -> Result<PreparedRun> {
        let template = self.inner.config.template_for(step.model);
        let command = build_command(&template, self.root(), &step.prompt_file)?;
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.inner.config.default_timeout());

        Ok(PreparedRun {
            step_id: step.id.clone(),
            command,
            cwd: PathBuf::from(step.cwd.as_deref().unwrap_or(".")),
            timeout,
        })
    }

    /// Run one runnable step to completion.
    pub async fn run_step(&self, id: &str, confirmed: bool) -> Result<StepRun> {
        let seq = self.inner.store.read_strict()?;
        let prep = self.prepare(&seq, id)?;
        let action = prep
            .policy_action(ActionType::RunStep)
            .concurrency(seq.running_count() as u32);
        self.enforce(&action, confirmed, "step.run", id)?;
        self.execute(prep).await
    }

    /// Run every currently runnable step concurrently.
    ///
    /// The whole batch is checked against the policy before anything starts;
    /// one denial rejects the batch. Outcomes come back in topological order.
    pub async fn run_runnable(&self, confirmed: bool) -> Result<Vec<StepOutcome>> {
        let seq = self.inner.store.read_strict()?;
        let ids: Vec<NodeId> = runnable_steps(&seq).iter().map(|s| s.id.clone()).collect();
        if ids.is_empty() {
            info!("no runnable steps");
            return Ok(Vec::new());
        }

        let policy = self.policy()?;
        let running = seq.running_count() as u32;
        let mut batch = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let prep = self.prepare(&seq, id)?;
            let action = prep
                .policy_action(ActionType::RunAll)
                .concurrency(running + i as u32);
            self.check(&policy, &action, confirmed, "run.all", id)?;
            batch.push(prep);
        }

        info!(steps = ?ids, "running runnable steps");

        let mut set = JoinSet::new();
        let mut tasks = HashMap::new();
        for prep in batch {
            let this = self.clone();
            let step_id = prep.step_id.clone();
            let handle = set.spawn(async move {
                let step_id = prep.step_id.clone();
                let result = this.execute(prep).await;
                StepOutcome { step_id, result }
            });
            tasks.insert(handle.id(), step_id);
        }

        let mut outcomes = Vec::with_capacity(ids.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    let Some(step_id) = tasks.remove(&e.id()) else {
                        warn!(error = %e, "unknown step task did not complete");
                        continue;
                    };
                    warn!(step = %step_id, error = %e, "step task did not complete");
                    let err = SeqError::Other(anyhow::anyhow!("step task did not complete: {e}"));
                    self.finish(
                        &step_id,
                        StepStatus::Failed,
                        json!({ "error": err.to_payload(false) }),
                    );
                    outcomes.push(StepOutcome {
                        step_id,
                        result: Err(err),
                    });
                }
            }
        }
        outcomes.sort_by_key(|o| ids.iter().position(|id| *id == o.step_id));
        Ok(outcomes)
    }

    /// Run the members of a parallel group one after another, in document
    /// order, honouring the group's fail policy (default `stop-all`).
    ///
    /// Members that are not runnable when their turn comes are reported and
    /// skipped.
    pub async fn run_group(&self, group_id: &str, confirmed: bool) -> Result<Vec<StepOutcome>> {
        let seq = self.inner.store.read_strict()?;
        let members: Vec<&Step> = seq
            .steps
            .iter()
            .filter(|s| s.group_id.as_deref() == Some(group_id))
            .collect();
        if members.is_empty() {
            return Err(SeqError::NotFound(format!("group '{group_id}'")));
        }

        let fail_policy = members
            .iter()
            .find_map(|s| s.fail_policy)
            .unwrap_or(FailPolicy::StopAll);

        let policy = self.policy()?;
        let running = seq.running_count() as u32;
        for member in &members {
            let prep = self.prepare_command(member)?;
            let action = prep
                .policy_action(ActionType::RunGroup)
                .fanout(members.len() as u32)
                .concurrency(running);
            self.check(&policy, &action, confirmed, "group.run", group_id)?;
        }

        let ids: Vec<NodeId> = members.iter().map(|s| s.id.clone()).collect();
        info!(group = %group_id, members = ?ids, ?fail_policy, "running group");

        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let mut outcome = self.run_member(&id).await;

            if is_failure(&outcome) && fail_policy == FailPolicy::Retry {
                info!(group = %group_id, step = %id, "member failed; retrying once");
                match self.inner.store.update(|seq| set_step_status(seq, &id, StepStatus::Ready)) {
                    Ok(_) => outcome = self.run_member(&id).await,
                    Err(e) => warn!(step = %id, error = %e, "could not reset step for retry"),
                }
            }

            let failed = is_failure(&outcome);
            outcomes.push(outcome);

            if failed && fail_policy == FailPolicy::StopAll {
                info!(group = %group_id, step = %id, "member failed; stopping group");
                break;
            }
        }

        Ok(outcomes)
    }

    async fn run_member(&self, id: &str) -> StepOutcome {
        let result = match self
            .inner
            .store
            .read_strict()
            .and_then(|seq| self.prepare(&seq, id))
        {
            Ok(prep) => self.execute(prep).await,
            Err(e) => Err(e),
        };
        StepOutcome {
            step_id: id.to_string(),
            result,
        }
    }

    async fn execute(&self, prep: PreparedRun) -> Result<StepRun> {
        let id = prep.step_id.clone();
        let run_id = new_run_id();

        let marked = self.inner.store.update(|seq| {
            let step = seq
                .step(&id)
                .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;
            if !is_runnable(seq, step) {
                return Err(not_runnable(seq, step));
            }
            set_step_status(seq, &id, StepStatus::Running).map(|_| ())
        });
        self.audit(
            "step.start",
            &id,
            Some(json!({ "runId": run_id, "program": prep.command.program })),
            &marked,
        );
        marked?;

        let mut env = BTreeMap::new();
        env.insert("SEQDAG_STEP_ID".to_string(), id.clone());
        env.insert("SEQDAG_RUN_ID".to_string(), run_id.clone());
        env.insert(
            "SEQDAG_HOME".to_string(),
            self.root().to_string_lossy().into_owned(),
        );

        let request = RunRequest {
            step_id: id.clone(),
            run_id: run_id.clone(),
            program: prep.command.program.clone(),
            args: prep.command.args.clone(),
            cwd: self.root().join(&prep.cwd),
            timeout: prep.timeout,
            env,
        };

        let timeout_ms = prep.timeout.as_millis() as u64;
        let result = match self.inner.runner.run(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(step = %id, run_id = %run_id, error = %e, "step execution failed");
                self.finish(
                    &id,
                    StepStatus::Failed,
                    json!({ "runId": run_id, "error": e.to_payload(false) }),
                );
                return Err(e);
            }
        };

        let artifacts = match artifacts::save(&self.inner.workspace.runs_dir(), &result) {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!(step = %id, run_id = %run_id, error = %e, "failed to save run artifacts");
                None
            }
        };

        if result.timed_out {
            let err = SeqError::ProcessTimeout {
                step: id.clone(),
                timeout_ms,
            };
            self.finish(
                &id,
                StepStatus::Failed,
                json!({ "runId": run_id, "error": err.to_payload(false) }),
            );
            return Err(err);
        }

        let status = if result.status == RunStatus::Success {
            StepStatus::Done
        } else {
            StepStatus::Failed
        };

        let persisted = self.finish(
            &id,
            status,
            json!({
                "runId": run_id,
                "exitCode": result.exit_code,
                "runStatus": result.status,
            }),
        );

        Ok(StepRun {
            step_id: id,
            run_id,
            status,
            run_status: result.status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            artifacts,
            persisted,
        })
    }

    /// Persist a terminal status. Failures are logged, not raised.
    fn finish(&self, id: &str, status: StepStatus, payload: Value) -> bool {
        let res = self
            .inner
            .store
            .update(|seq| set_step_status(seq, id, status).map(|_| ()));
        self.audit("step.finish", id, Some(payload), &res);
        match res {
            Ok(()) => {
                info!(step = %id, %status, "step finished");
                true
            }
            Err(e) => {
                warn!(step = %id, %status, error = %e, "failed to persist step status");
                false
            }
        }
    }

    // ---------------------------------------------------------------------
    // Backend-driven execution
    // ---------------------------------------------------------------------

    /// Send a runnable step's command to the multiplexer process at `index`,
    /// then mark it `RUNNING` and remember the index.
    pub async fn dispatch_step(&self, id: &str, index: u32, confirmed: bool) -> Result<()> {
        let seq = self.inner.store.read_strict()?;
        let prep = self.prepare(&seq, id)?;
        let action = prep
            .policy_action(ActionType::SendCommand)
            .concurrency(seq.running_count() as u32);
        self.enforce(&action, confirmed, "step.dispatch", id)?;

        let payload = json!({ "index": index, "program": prep.command.program });
        let argv = prep.command.argv();
        if let Err(e) = self.inner.backend.send_command(index, &argv).await {
            let res: Result<()> = Err(e.into());
            self.audit("step.dispatch", id, Some(payload), &res);
            return res;
        }

        let res = self.inner.store.update(|seq| {
            let step = seq
                .step(id)
                .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;
            if !is_runnable(seq, step) {
                return Err(not_runnable(seq, step));
            }
            set_step_status(seq, id, StepStatus::Running).map(|_| ())
        });
        self.audit("step.dispatch", id, Some(payload), &res);
        res?;

        self.inner.process_map.set(id, index)?;
        info!(step = %id, index, "step dispatched");
        Ok(())
    }

    /// Ask the backend to stop the step's process, then mark it `FAILED`
    /// whether or not the stop request got through.
    pub async fn stop_step(&self, id: &str, confirmed: bool) -> Result<StopOutcome> {
        self.enforce(&PolicyAction::new(ActionType::StopStep), confirmed, "step.stop", id)?;

        let seq = self.inner.store.read_strict()?;
        if seq.step(id).is_none() {
            return Err(SeqError::NotFound(format!("step '{id}'")));
        }

        let index = self.inner.process_map.get(id)?;
        let backend_stopped = match index {
            Some(index) => match self.inner.backend.stop_process(index).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(step = %id, index, error = %e, "stop request failed; marking FAILED anyway");
                    false
                }
            },
            None => {
                debug!(step = %id, "no process index recorded; nothing to stop");
                false
            }
        };

        let outcome = StopOutcome {
            index,
            backend_stopped,
        };
        let res = self
            .inner
            .store
            .update(|seq| set_step_status(seq, id, StepStatus::Failed).map(|_| ()));
        self.audit(
            "step.stop",
            id,
            serde_json::to_value(outcome).ok(),
            &res,
        );
        res?;

        if let Err(e) = self.inner.process_map.remove(id) {
            warn!(step = %id, error = %e, "failed to drop process index");
        }
        Ok(outcome)
    }

    /// Restart the step's process through the backend and mark it `RUNNING`.
    /// A failing restart request is logged and the step is marked anyway.
    pub async fn restart_step(&self, id: &str, confirmed: bool) -> Result<RestartOutcome> {
        let seq = self.inner.store.read_strict()?;
        let step = seq
            .step(id)
            .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;
        let index = self
            .inner
            .process_map
            .get(id)?
            .ok_or_else(|| SeqError::NotFound(format!("process index for step '{id}'")))?;

        let prep = self.prepare_command(step)?;
        let others_running = seq
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Running && s.id != id)
            .count();
        let action = prep
            .policy_action(ActionType::RestartStep)
            .concurrency(others_running as u32);
        self.enforce(&action, confirmed, "step.restart", id)?;

        let backend_restarted = match self.inner.backend.restart_process(index).await {
            Ok(()) => true,
            Err(e) => {
                warn!(step = %id, index, error = %e, "restart request failed; marking RUNNING anyway");
                false
            }
        };

        let outcome = RestartOutcome {
            index,
            backend_restarted,
        };
        let res = self.inner.store.update(|seq| {
            let current = seq
                .step(id)
                .map(|s| s.status)
                .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;
            if current != StepStatus::Running {
                if current != StepStatus::Ready {
                    set_step_status(seq, id, StepStatus::Ready)?;
                }
                set_step_status(seq, id, StepStatus::Running)?;
            }
            Ok(())
        });
        self.audit(
            "step.restart",
            id,
            serde_json::to_value(outcome).ok(),
            &res,
        );
        res?;
        Ok(outcome)
    }

    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile::reconcile(
            &self.inner.store,
            &self.inner.process_map,
            self.inner.backend.as_ref(),
            self.inner.audit.as_ref(),
            &self.inner.config.actor,
        )
        .await
    }

    // ---------------------------------------------------------------------
    // Typed actions
    // ---------------------------------------------------------------------

    /// Dispatch a typed action and return its result as JSON.
    pub async fn apply_action(&self, action: SequenceAction, confirmed: bool) -> Result<Value> {
        debug!(action = action.name(), "applying action");
        let value = match action {
            SequenceAction::StepAdd(new) => {
                let step = Step::from(new);
                let id = step.id.clone();
                self.add_step(step, confirmed)?;
                json!({ "added": id })
            }
            SequenceAction::StepUpdate { id, patch } => {
                self.update_step(&id, patch)?;
                json!({ "updated": id })
            }
            SequenceAction::StepUpdateStatus { id, status } => {
                let previous = self.set_step_status(&id, status)?;
                json!({ "id": id, "previous": previous, "status": status })
            }
            SequenceAction::StepRemove { id } => {
                self.remove_step(&id, confirmed)?;
                json!({ "removed": id })
            }
            SequenceAction::GateAdd {
                id,
                name,
                depends_on,
            } => {
                let mut gate = Gate::new(id.clone(), name);
                gate.depends_on = depends_on;
                self.add_gate(gate)?;
                json!({ "added": id })
            }
            SequenceAction::GateApprove { id } => {
                let unblocked = self.approve_gate(&id, confirmed)?;
                json!({ "approved": id, "unblocked": unblocked })
            }
            SequenceAction::GateBlock { id } => {
                self.block_gate(&id)?;
                json!({ "blocked": id })
            }
            SequenceAction::GateRemove { id } => {
                self.remove_gate(&id)?;
                json!({ "removed": id })
            }
            SequenceAction::DepAdd { node, dep } => {
                self.add_dependency(&node, &dep)?;
                json!({ "node": node, "dependsOn": dep })
            }
            SequenceAction::DepRemove { node, dep } => {
                self.remove_dependency(&node, &dep)?;
                json!({ "node": node, "removed": dep })
            }
            SequenceAction::GroupAdd {
                group_id,
                fanout,
                template,
            } => {
                let ids =
                    self.add_parallel_group(&group_id, Step::from(template), fanout, confirmed)?;
                json!({ "group": group_id, "steps": ids })
            }
            SequenceAction::FusionAdd { synth, candidates } => {
                let synth = Step::from(synth);
                let id = synth.id.clone();
                self.add_fusion(synth, &candidates, confirmed)?;
                json!({ "synth": id, "candidates": candidates })
            }
            SequenceAction::RunStep { id } => serde_json::to_value(self.run_step(&id, confirmed).await?)?,
            SequenceAction::RunAll => outcomes_json(&self.run_runnable(confirmed).await?),
            SequenceAction::RunGroup { group_id } => {
                outcomes_json(&self.run_group(&group_id, confirmed).await?)
            }
            SequenceAction::DispatchStep { id, index } => {
                self.dispatch_step(&id, index, confirmed).await?;
                json!({ "dispatched": id, "index": index })
            }
            SequenceAction::StopStep { id } => {
                serde_json::to_value(self.stop_step(&id, confirmed).await?)?
            }
            SequenceAction::RestartStep { id } => {
                serde_json::to_value(self.restart_step(&id, confirmed).await?)?
            }
            SequenceAction::Reconcile => serde_json::to_value(self.reconcile().await?)?,
        };
        Ok(value)
    }
}

pub fn outcomes_json(outcomes: &[StepOutcome]) -> Value {
    Value::Array(outcomes.iter().map(StepOutcome::to_json).collect())
}

fn is_failure(outcome: &StepOutcome) -> bool {
    !outcome.succeeded() && !outcome.skipped()
}

fn not_runnable(seq: &Sequence, step: &Step) -> SeqError {
    let waiting: Vec<&str> = step
        .depends_on
        .iter()
        .filter(|d| !dependency_satisfied(seq, d))
        .map(String::as_str)
        .collect();

    let status = if step.status == StepStatus::Ready && !waiting.is_empty() {
        format!("READY, waiting on {}", waiting.join(", "))
    } else {
        step.status.to_string()
    };

    SeqError::NotRunnable {
        id: step.id.clone(),
        status,
    }
}
