// src/sequence/model.rs

use serde::{Deserialize, Serialize};

use crate::types::{FailPolicy, GateStatus, Model, NodeId, StepStatus, StepType};

/// Current document format version written by this crate.
pub const SEQUENCE_VERSION: u32 = 1;

/// The persisted sequence document.
///
/// ```toml
/// version = 1
/// name = "release"
///
/// [[steps]]
/// id = "plan"
/// name = "Plan the change"
/// type = "base"
/// model = "claude-code"
/// prompt_file = "prompts/plan.md"
/// depends_on = []
/// status = "READY"
///
/// [[gates]]
/// id = "review"
/// name = "Human review"
/// depends_on = ["plan"]
/// status = "PENDING"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub gates: Vec<Gate>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            version: SEQUENCE_VERSION,
            name: "default".to_string(),
            steps: Vec::new(),
            gates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: NodeId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub step_type: StepType,
    pub model: Model,
    pub prompt_file: String,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    #[serde(default)]
    pub status: StepStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Parallel group membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Expected parallel width of the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fanout: Option<u32>,
    /// Set on a synthesis step: the candidates it fuses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_candidates: Option<Vec<NodeId>>,
    /// Set on a fusion candidate: the synthesis step consuming it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion_synth: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_policy: Option<FailPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// ID of the step this one monitors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watchdog_for: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<bool>,
}

impl Step {
    /// A minimal READY step with no optional attributes.
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        model: Model,
        prompt_file: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type: StepType::Base,
            model,
            prompt_file: prompt_file.into(),
            depends_on: Vec::new(),
            status: StepStatus::Ready,
            cwd: None,
            group_id: None,
            fanout: None,
            fusion_candidates: None,
            fusion_synth: None,
            fail_policy: None,
            timeout_ms: None,
            watchdog_for: None,
            orchestrator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    pub id: NodeId,
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    #[serde(default)]
    pub status: GateStatus,
}

impl Gate {
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            depends_on: Vec::new(),
            status: GateStatus::Pending,
        }
    }
}

/// Borrowed view of either kind of node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Step(&'a Step),
    Gate(&'a Gate),
}

impl<'a> NodeRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            NodeRef::Step(s) => &s.id,
            NodeRef::Gate(g) => &g.id,
        }
    }

    pub fn depends_on(&self) -> &'a [NodeId] {
        match self {
            NodeRef::Step(s) => &s.depends_on,
            NodeRef::Gate(g) => &g.depends_on,
        }
    }
}

impl Sequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn gate(&self, id: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.id == id)
    }

    pub fn gate_mut(&mut self, id: &str) -> Option<&mut Gate> {
        self.gates.iter_mut().find(|g| g.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.step(id).is_some() || self.gate(id).is_some()
    }

    /// All nodes, steps first, each list in document order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef<'_>> {
        self.steps
            .iter()
            .map(NodeRef::Step)
            .chain(self.gates.iter().map(NodeRef::Gate))
    }

    pub fn node(&self, id: &str) -> Option<NodeRef<'_>> {
        self.nodes().find(|n| n.id() == id)
    }

    /// Dependency list of a node, if it exists.
    pub fn depends_on_mut(&mut self, id: &str) -> Option<&mut Vec<NodeId>> {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            return Some(&mut step.depends_on);
        }
        self.gates
            .iter_mut()
            .find(|g| g.id == id)
            .map(|g| &mut g.depends_on)
    }

    /// IDs of nodes that list `id` in their `depends_on`.
    pub fn dependents_of(&self, id: &str) -> Vec<NodeId> {
        self.nodes()
            .filter(|n| n.depends_on().iter().any(|d| d == id))
            .map(|n| n.id().to_string())
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Running)
            .count()
    }
}
