// src/types.rs

//! Closed enumerations shared by the sequence model, the policy engine and
//! the CLI.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical node identifier (step or gate).
pub type NodeId = String;

/// Shape of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepType {
    #[serde(rename = "base")]
    Base,
    /// Member of a parallel group.
    #[serde(rename = "p")]
    Parallel,
    #[serde(rename = "c")]
    Chained,
    /// Fusion / synthesis step.
    #[serde(rename = "f")]
    Fusion,
    /// Orchestrated step.
    #[serde(rename = "b")]
    Orchestrated,
    #[serde(rename = "l")]
    LongAutonomy,
}

impl Default for StepType {
    fn default() -> Self {
        StepType::Base
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" => Ok(StepType::Base),
            "p" | "parallel" => Ok(StepType::Parallel),
            "c" | "chained" => Ok(StepType::Chained),
            "f" | "fusion" => Ok(StepType::Fusion),
            "b" | "orchestrated" => Ok(StepType::Orchestrated),
            "l" | "long-autonomy" => Ok(StepType::LongAutonomy),
            other => Err(format!(
                "invalid step type: {other} (expected base, p, c, f, b or l)"
            )),
        }
    }
}

/// External model whose command template a step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Model {
    ClaudeCode,
    Codex,
    Gemini,
}

impl Model {
    pub fn as_str(&self) -> &'static str {
        match self {
            Model::ClaudeCode => "claude-code",
            Model::Codex => "codex",
            Model::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude-code" | "claude" => Ok(Model::ClaudeCode),
            "codex" => Ok(Model::Codex),
            "gemini" => Ok(Model::Gemini),
            other => Err(format!(
                "invalid model: {other} (expected claude-code, codex or gemini)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Ready,
    Running,
    NeedsReview,
    Done,
    Failed,
    Blocked,
}

impl Default for StepStatus {
    fn default() -> Self {
        StepStatus::Ready
    }
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Ready => "READY",
            StepStatus::Running => "RUNNING",
            StepStatus::NeedsReview => "NEEDS_REVIEW",
            StepStatus::Done => "DONE",
            StepStatus::Failed => "FAILED",
            StepStatus::Blocked => "BLOCKED",
        }
    }

    /// Whether a directly commanded transition `self -> next` is allowed.
    ///
    /// Setting a status to itself is always allowed (no-op update).
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Ready, Running)
                | (Ready, Blocked)
                | (Blocked, Ready)
                | (Running, Done)
                | (Running, Failed)
                | (Running, NeedsReview)
                | (Running, Blocked)
                | (Done, NeedsReview)
                | (Done, Blocked)
                | (Done, Ready)
                | (NeedsReview, Done)
                | (NeedsReview, Ready)
                | (NeedsReview, Failed)
                | (Failed, Ready)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "READY" => Ok(StepStatus::Ready),
            "RUNNING" => Ok(StepStatus::Running),
            "NEEDS_REVIEW" => Ok(StepStatus::NeedsReview),
            "DONE" => Ok(StepStatus::Done),
            "FAILED" => Ok(StepStatus::Failed),
            "BLOCKED" => Ok(StepStatus::Blocked),
            other => Err(format!("invalid step status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pending,
    Approved,
    Blocked,
}

impl Default for GateStatus {
    fn default() -> Self {
        GateStatus::Pending
    }
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Pending => "PENDING",
            GateStatus::Approved => "APPROVED",
            GateStatus::Blocked => "BLOCKED",
        }
    }

    pub fn can_transition_to(&self, next: GateStatus) -> bool {
        use GateStatus::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Blocked)
                | (Blocked, Approved)
                | (Blocked, Pending)
                | (Approved, Pending)
        )
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a parallel group does when one of its members fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailPolicy {
    StopAll,
    Continue,
    Retry,
}

impl FromStr for FailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stop-all" => Ok(FailPolicy::StopAll),
            "continue" => Ok(FailPolicy::Continue),
            "retry" => Ok(FailPolicy::Retry),
            other => Err(format!(
                "invalid fail_policy: {other} (expected stop-all, continue or retry)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyMode {
    /// Execution actions always require confirmation.
    Safe,
    /// Confirmation only for explicitly listed action types.
    Power,
}

impl Default for PolicyMode {
    fn default() -> Self {
        PolicyMode::Safe
    }
}

/// Kinds of action the policy engine evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    RunStep,
    RunAll,
    RunGroup,
    SendCommand,
    RestartStep,
    StopStep,
    AddStep,
    RemoveStep,
    ApproveGate,
}

impl ActionType {
    /// Actions that start or re-start external processes.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            ActionType::RunStep
                | ActionType::RunAll
                | ActionType::RunGroup
                | ActionType::SendCommand
                | ActionType::RestartStep
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::RunStep => "run-step",
            ActionType::RunAll => "run-all",
            ActionType::RunGroup => "run-group",
            ActionType::SendCommand => "send-command",
            ActionType::RestartStep => "restart-step",
            ActionType::StopStep => "stop-step",
            ActionType::AddStep => "add-step",
            ActionType::RemoveStep => "remove-step",
            ActionType::ApproveGate => "approve-gate",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "run-step" => Ok(ActionType::RunStep),
            "run-all" => Ok(ActionType::RunAll),
            "run-group" => Ok(ActionType::RunGroup),
            "send-command" => Ok(ActionType::SendCommand),
            "restart-step" => Ok(ActionType::RestartStep),
            "stop-step" => Ok(ActionType::StopStep),
            "add-step" => Ok(ActionType::AddStep),
            "remove-step" => Ok(ActionType::RemoveStep),
            "approve-gate" => Ok(ActionType::ApproveGate),
            other => Err(format!("invalid action type: {other}")),
        }
    }
}
