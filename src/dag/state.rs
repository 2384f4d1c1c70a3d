// src/dag/state.rs

//! Step and gate lifecycle rules.
//!
//! Runnability is derived, never stored: a step is runnable when it is
//! `READY` and every dependency resolves to a `DONE` step or an `APPROVED`
//! gate. Unknown dependency IDs simply leave the step non-runnable.
//!
//! Approving a gate is the only transition that touches other nodes: every
//! `BLOCKED` step that depends on the gate and is now fully satisfied goes
//! back to `READY`.

use tracing::{debug, info};

use crate::dag::DagGraph;
use crate::errors::{Result, SeqError};
use crate::sequence::{Sequence, Step};
use crate::types::{GateStatus, NodeId, StepStatus};

/// Whether a single dependency ID is satisfied.
pub fn dependency_satisfied(seq: &Sequence, dep: &str) -> bool {
    if let Some(step) = seq.step(dep) {
        return step.status == StepStatus::Done;
    }
    if let Some(gate) = seq.gate(dep) {
        return gate.status == GateStatus::Approved;
    }
    false
}

pub fn deps_satisfied(seq: &Sequence, deps: &[NodeId]) -> bool {
    deps.iter().all(|d| dependency_satisfied(seq, d))
}

pub fn is_runnable(seq: &Sequence, step: &Step) -> bool {
    step.status == StepStatus::Ready && deps_satisfied(seq, &step.depends_on)
}

/// Runnable steps, in topological order.
pub fn runnable_steps(seq: &Sequence) -> Vec<&Step> {
    DagGraph::from_sequence(seq)
        .topological_sort()
        .iter()
        .filter_map(|id| seq.step(id))
        .filter(|step| is_runnable(seq, step))
        .collect()
}

/// Commanded status change for a step.
pub fn set_step_status(seq: &mut Sequence, id: &str, next: StepStatus) -> Result<StepStatus> {
    let step = seq
        .step_mut(id)
        .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;

    let prev = step.status;
    if !prev.can_transition_to(next) {
        return Err(SeqError::validation(
            "status",
            format!("step '{id}' cannot move from {prev} to {next}"),
        ));
    }

    step.status = next;
    debug!(step = %id, from = %prev, to = %next, "step status updated");
    Ok(prev)
}

/// Approve a gate and release the `BLOCKED` steps it was holding back.
///
/// Returns the IDs of steps that moved from `BLOCKED` to `READY`.
pub fn approve_gate(seq: &mut Sequence, id: &str) -> Result<Vec<NodeId>> {
    set_gate_status(seq, id, GateStatus::Approved)?;

    let candidates: Vec<NodeId> = seq
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Blocked && s.depends_on.iter().any(|d| d == id))
        .filter(|s| deps_satisfied(seq, &s.depends_on))
        .map(|s| s.id.clone())
        .collect();

    for step_id in &candidates {
        if let Some(step) = seq.step_mut(step_id) {
            step.status = StepStatus::Ready;
        }
    }

    info!(gate = %id, unblocked = ?candidates, "gate approved");
    Ok(candidates)
}

pub fn block_gate(seq: &mut Sequence, id: &str) -> Result<()> {
    set_gate_status(seq, id, GateStatus::Blocked)?;
    info!(gate = %id, "gate blocked");
    Ok(())
}

pub fn set_gate_status(seq: &mut Sequence, id: &str, next: GateStatus) -> Result<GateStatus> {
    let gate = seq
        .gate_mut(id)
        .ok_or_else(|| SeqError::NotFound(format!("gate '{id}'")))?;

    let prev = gate.status;
    if !prev.can_transition_to(next) {
        return Err(SeqError::validation(
            "status",
            format!("gate '{id}' cannot move from {prev} to {next}"),
        ));
    }
    gate.status = next;
    Ok(prev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::Gate;
    use crate::types::Model;

    fn step(id: &str, status: StepStatus, deps: &[&str]) -> Step {
        let mut s = Step::new(id, id, Model::ClaudeCode, "p.md");
        s.status = status;
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    fn ids(steps: Vec<&Step>) -> Vec<&str> {
        steps.into_iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn runnable_follows_completion() {
        let mut seq = Sequence::new("t");
        seq.steps.push(step("a", StepStatus::Ready, &[]));
        seq.steps.push(step("b", StepStatus::Ready, &["a"]));

        assert_eq!(ids(runnable_steps(&seq)), vec!["a"]);

        seq.step_mut("a").unwrap().status = StepStatus::Done;
        assert_eq!(ids(runnable_steps(&seq)), vec!["b"]);
    }

    #[test]
    fn unknown_dependency_is_not_runnable() {
        let mut seq = Sequence::new("t");
        seq.steps.push(step("a", StepStatus::Ready, &["ghost"]));
        assert!(runnable_steps(&seq).is_empty());
    }

    #[test]
    fn approving_gate_releases_only_fully_satisfied_steps() {
        let mut seq = Sequence::new("t");
        seq.steps.push(step("done", StepStatus::Done, &[]));
        seq.steps.push(step("pending", StepStatus::Ready, &[]));
        seq.steps.push(step("x", StepStatus::Blocked, &["g", "done"]));
        seq.steps.push(step("y", StepStatus::Blocked, &["g", "pending"]));
        seq.steps.push(step("z", StepStatus::Blocked, &["done"]));
        seq.gates.push(Gate::new("g", "gate"));

        let released = approve_gate(&mut seq, "g").unwrap();

        assert_eq!(released, vec!["x"]);
        assert_eq!(seq.step("x").unwrap().status, StepStatus::Ready);
        assert_eq!(seq.step("y").unwrap().status, StepStatus::Blocked);
        // Not a dependent of the gate: untouched.
        assert_eq!(seq.step("z").unwrap().status, StepStatus::Blocked);
        assert_eq!(seq.gate("g").unwrap().status, GateStatus::Approved);
    }

    #[test]
    fn blocked_gate_can_be_approved_later() {
        let mut seq = Sequence::new("t");
        seq.gates.push(Gate::new("g", "gate"));
        block_gate(&mut seq, "g").unwrap();
        approve_gate(&mut seq, "g").unwrap();
        assert_eq!(seq.gate("g").unwrap().status, GateStatus::Approved);
    }

    #[test]
    fn illegal_step_transition_is_rejected() {
        let mut seq = Sequence::new("t");
        seq.steps.push(step("a", StepStatus::Ready, &[]));
        let err = set_step_status(&mut seq, "a", StepStatus::Done).unwrap_err();
        assert!(matches!(err, SeqError::Validation(_)));
        assert_eq!(seq.step("a").unwrap().status, StepStatus::Ready);

        assert!(matches!(
            set_step_status(&mut seq, "nope", StepStatus::Done),
            Err(SeqError::NotFound(_))
        ));
    }
}
