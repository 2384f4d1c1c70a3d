#![allow(dead_code)]

use seqdag::sequence::{Gate, Sequence, Step};
use seqdag::types::{FailPolicy, GateStatus, Model, StepStatus, StepType};

/// Builder for `Sequence` to simplify test setup.
///
/// Nodes are pushed as given; call [`SequenceBuilder::build`] to get the raw
/// value or [`SequenceBuilder::build_valid`] to assert it validates.
pub struct SequenceBuilder {
    seq: Sequence,
}

impl SequenceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            seq: Sequence::new(name),
        }
    }

    pub fn with_step(mut self, step: StepBuilder) -> Self {
        self.seq.steps.push(step.build());
        self
    }

    /// Shorthand: READY codex step with the given dependencies.
    pub fn step(self, id: &str, deps: &[&str]) -> Self {
        self.with_step(StepBuilder::new(id).depends_on(deps))
    }

    pub fn gate(mut self, id: &str, deps: &[&str], status: GateStatus) -> Self {
        let mut gate = Gate::new(id, format!("gate {id}"));
        gate.depends_on = deps.iter().map(|d| d.to_string()).collect();
        gate.status = status;
        self.seq.gates.push(gate);
        self
    }

    pub fn build(self) -> Sequence {
        self.seq
    }

    pub fn build_valid(self) -> Sequence {
        self.seq
            .validate()
            .expect("Failed to build valid sequence from builder");
        self.seq
    }
}

/// Builder for `Step`.
pub struct StepBuilder {
    step: Step,
}

impl StepBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            step: Step::new(id, format!("step {id}"), Model::Codex, format!("prompts/{id}.md")),
        }
    }

    pub fn model(mut self, model: Model) -> Self {
        self.step.model = model;
        self
    }

    pub fn prompt_file(mut self, path: &str) -> Self {
        self.step.prompt_file = path.to_string();
        self
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.step.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn status(mut self, status: StepStatus) -> Self {
        self.step.status = status;
        self
    }

    pub fn step_type(mut self, step_type: StepType) -> Self {
        self.step.step_type = step_type;
        self
    }

    pub fn group(mut self, group_id: &str) -> Self {
        self.step.group_id = Some(group_id.to_string());
        self
    }

    pub fn fail_policy(mut self, policy: FailPolicy) -> Self {
        self.step.fail_policy = Some(policy);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.step.timeout_ms = Some(ms);
        self
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.step.cwd = Some(cwd.to_string());
        self
    }

    pub fn build(self) -> Step {
        self.step
    }
}
