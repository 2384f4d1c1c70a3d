// src/sequence/mutate.rs

//! In-memory mutations of a [`Sequence`].
//!
//! Every mutation works on a draft copy and only replaces the caller's
//! sequence once the draft passes full validation, so a failed call (unknown
//! ID, duplicate, cycle) never leaves a partial change behind.

use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, SeqError};
use crate::sequence::model::{Gate, Sequence, Step};
use crate::types::{FailPolicy, Model, NodeId, StepType};

/// Apply `f` to a draft and commit it only if the result validates.
fn commit<T, F>(seq: &mut Sequence, f: F) -> Result<T>
where
    F: FnOnce(&mut Sequence) -> Result<T>,
{
    let mut draft = seq.clone();
    let out = f(&mut draft)?;
    draft.validate()?;
    *seq = draft;
    Ok(out)
}

fn ensure_new_id(seq: &Sequence, id: &str) -> Result<()> {
    if seq.contains(id) {
        return Err(SeqError::Conflict(format!("node '{id}'")));
    }
    Ok(())
}

fn ensure_deps_exist(seq: &Sequence, deps: &[NodeId]) -> Result<()> {
    match deps.iter().find(|d| !seq.contains(d)) {
        Some(missing) => Err(SeqError::NotFound(format!("dependency '{missing}'"))),
        None => Ok(()),
    }
}

fn ensure_schema(violations: Vec<crate::errors::FieldViolation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(SeqError::Validation(violations))
    }
}

/// Nodes that would dangle if `id` were removed.
fn referrers_of(seq: &Sequence, id: &str) -> Vec<NodeId> {
    let mut out = seq.dependents_of(id);
    for step in &seq.steps {
        let refers = step.watchdog_for.as_deref() == Some(id)
            || step.fusion_synth.as_deref() == Some(id)
            || step
                .fusion_candidates
                .iter()
                .flatten()
                .any(|c| c == id);
        if refers && !out.contains(&step.id) {
            out.push(step.id.clone());
        }
    }
    out
}

pub fn add_step(seq: &mut Sequence, step: Step) -> Result<()> {
    ensure_schema(step.schema_violations("step"))?;
    ensure_new_id(seq, &step.id)?;
    ensure_deps_exist(seq, &step.depends_on)?;

    let id = step.id.clone();
    commit(seq, |draft| {
        draft.steps.push(step);
        Ok(())
    })?;
    debug!(step = %id, "step added");
    Ok(())
}

pub fn add_gate(seq: &mut Sequence, gate: Gate) -> Result<()> {
    ensure_schema(gate.schema_violations("gate"))?;
    ensure_new_id(seq, &gate.id)?;
    ensure_deps_exist(seq, &gate.depends_on)?;

    let id = gate.id.clone();
    commit(seq, |draft| {
        draft.gates.push(gate);
        Ok(())
    })?;
    debug!(gate = %id, "gate added");
    Ok(())
}

/// Remove a step that nothing else references.
pub fn remove_step(seq: &mut Sequence, id: &str) -> Result<Step> {
    let pos = seq
        .steps
        .iter()
        .position(|s| s.id == id)
        .ok_or_else(|| SeqError::NotFound(format!("step '{id}'")))?;

    let dependents = referrers_of(seq, id);
    if !dependents.is_empty() {
        return Err(SeqError::HasDependents {
            id: id.to_string(),
            dependents,
        });
    }

    let removed = seq.steps.remove(pos);
    debug!(step = %id, "step removed");
    Ok(removed)
}

pub fn remove_gate(seq: &mut Sequence, id: &str) -> Result<Gate> {
    let pos = seq
        .gates
        .iter()
        .position(|g| g.id == id)
        .ok_or_else(|| SeqError::NotFound(format!("gate '{id}'")))?;

    let dependents = seq.dependents_of(id);
    if !dependents.is_empty() {
        return Err(SeqError::HasDependents {
            id: id.to_string(),
            dependents,
        });
    }

    Ok(seq.gates.remove(pos))
}

/// Add edge "`node` depends on `dep`".
///
/// Fails with `CircularDependency` (and leaves `seq` untouched) if the edge
/// would close a cycle.
pub fn add_dependency(seq: &mut Sequence, node: &str, dep: &str) -> Result<()> {
    if !seq.contains(node) {
        return Err(SeqError::NotFound(format!("node '{node}'")));
    }
    if !seq.contains(dep) {
        return Err(SeqError::NotFound(format!("dependency '{dep}'")));
    }
    if node == dep {
        return Err(SeqError::CircularDependency(vec![
            node.to_string(),
            dep.to_string(),
        ]));
    }
    if seq
        .node(node)
        .is_some_and(|n| n.depends_on().iter().any(|d| d == dep))
    {
        return Err(SeqError::Conflict(format!("dependency '{node}' -> '{dep}'")));
    }

    commit(seq, |draft| {
        if let Some(deps) = draft.depends_on_mut(node) {
            deps.push(dep.to_string());
        }
        Ok(())
    })?;
    debug!(node = %node, dep = %dep, "dependency added");
    Ok(())
}

pub fn remove_dependency(seq: &mut Sequence, node: &str, dep: &str) -> Result<()> {
    let deps = seq
        .depends_on_mut(node)
        .ok_or_else(|| SeqError::NotFound(format!("node '{node}'")))?;

    let pos = deps
        .iter()
        .position(|d| d == dep)
        .ok_or_else(|| SeqError::NotFound(format!("dependency '{node}' -> '{dep}'")))?;
    deps.remove(pos);
    debug!(node = %node, dep = %dep, "dependency removed");
    Ok(())
}

/// Typed partial update of a step's descriptive attributes.
///
/// Status and dependencies have their own operations and are not part of a
/// patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: Option<StepType>,
    pub model: Option<Model>,
    pub prompt_file: Option<String>,
    pub cwd: Option<String>,
    pub group_id: Option<String>,
    pub fanout: Option<u32>,
    pub fail_policy: Option<FailPolicy>,
    pub timeout_ms: Option<u64>,
    pub watchdog_for: Option<NodeId>,
    #[serde(default, deserialize_with = "crate::engine::action::de_opt_bool_like")]
    pub orchestrator: Option<bool>,
}

impl StepPatch {
    pub fn is_empty(&self) -> bool {
        *self == StepPatch::default()
    }

    fn apply(self, step: &mut Step) {
        if let Some(v) = self.name {
            step.name = v;
        }
        if let Some(v) = self.step_type {
            step.step_type = v;
        }
        if let Some(v) = self.model {
            step.model = v;
        }
        if let Some(v) = self.prompt_file {
            step.prompt_file = v;
        }
        if let Some(v) = self.cwd {
            step.cwd = Some(v);
        }
        if let Some(v) = self.group_id {
            step.group_id = Some(v);
        }
        if let Some(v) = self.fanout {
            step.fanout = Some(v);
        }
        if let Some(v) = self.fail_policy {
            step.fail_policy = Some(v);
        }
        if let Some(v) = self.timeout_ms {
            step.timeout_ms = Some(v);
        }
        if let Some(v) = self.watchdog_for {
            step.watchdog_for = Some(v);
        }
        if let Some(v) = self.orchestrator {
            step.orchestrator = Some(v);
        }
    }
}

pub fn update_step(seq: &mut Sequence, id: &str, patch: StepPatch) -> Result<()> {
    if seq.step(id).is_none() {
        return Err(SeqError::NotFound(format!("step '{id}'")));
    }
    if patch.is_empty() {
        return Err(SeqError::validation("patch", "no fields to update"));
    }

    commit(seq, |draft| {
        if let Some(step) = draft.step_mut(id) {
            patch.apply(step);
        }
        Ok(())
    })
}

/// Expand `template` into `fanout` parallel steps `<group_id>-1 .. <group_id>-N`.
///
/// Each member copies the template's model, prompt, cwd and dependencies and
/// is tagged with the group. Returns the new IDs.
pub fn add_parallel_group(
    seq: &mut Sequence,
    group_id: &str,
    template: &Step,
    fanout: u32,
) -> Result<Vec<NodeId>> {
    if fanout == 0 {
        return Err(SeqError::validation("fanout", "must be >= 1"));
    }
    if seq
        .steps
        .iter()
        .any(|s| s.group_id.as_deref() == Some(group_id))
    {
        return Err(SeqError::Conflict(format!("group '{group_id}'")));
    }
    ensure_deps_exist(seq, &template.depends_on)?;

    let ids: Vec<NodeId> = (1..=fanout).map(|i| format!("{group_id}-{i}")).collect();
    for id in &ids {
        ensure_new_id(seq, id)?;
    }

    commit(seq, |draft| {
        for (i, id) in ids.iter().enumerate() {
            let mut member = template.clone();
            member.id = id.clone();
            member.name = format!("{} #{}", template.name, i + 1);
            member.step_type = StepType::Parallel;
            member.group_id = Some(group_id.to_string());
            member.fanout = Some(fanout);
            draft.steps.push(member);
        }
        Ok(())
    })?;

    debug!(group = %group_id, fanout, "parallel group expanded");
    Ok(ids)
}

/// Add a synthesis step that fans in over `candidates`.
pub fn add_fusion(seq: &mut Sequence, mut synth: Step, candidates: &[NodeId]) -> Result<()> {
    if candidates.is_empty() {
        return Err(SeqError::validation(
            "fusion_candidates",
            "at least one candidate is required",
        ));
    }
    if let Some(missing) = candidates.iter().find(|c| seq.step(c).is_none()) {
        return Err(SeqError::NotFound(format!("step '{missing}'")));
    }
    ensure_new_id(seq, &synth.id)?;
    ensure_deps_exist(seq, &synth.depends_on)?;

    synth.step_type = StepType::Fusion;
    for c in candidates {
        if !synth.depends_on.contains(c) {
            synth.depends_on.push(c.clone());
        }
    }
    synth.fusion_candidates = Some(candidates.to_vec());
    ensure_schema(synth.schema_violations("step"))?;

    let synth_id = synth.id.clone();
    commit(seq, |draft| {
        for c in candidates {
            if let Some(step) = draft.step_mut(c) {
                step.fusion_synth = Some(synth_id.clone());
            }
        }
        draft.steps.push(synth);
        Ok(())
    })?;

    debug!(synth = %synth_id, ?candidates, "fusion step added");
    Ok(())
}
