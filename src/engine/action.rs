// src/engine/action.rs

//! Typed sequence actions.
//!
//! Actions arrive as JSON of the form `{"action": "<name>", "args": {...}}`.
//! Every variant has a closed field set, so unknown or misspelled fields are
//! rejected by deserialisation. Boolean-like strings are only accepted where a
//! field opts into [`de_opt_bool_like`].

use serde::de::{self, Deserializer};
use serde::Deserialize;

use crate::errors::{Result, SeqError};
use crate::sequence::{Step, StepPatch};
use crate::types::{FailPolicy, Model, NodeId, StepStatus, StepType};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", content = "args", rename_all = "kebab-case", deny_unknown_fields)]
pub enum SequenceAction {
    StepAdd(NewStep),
    StepUpdate {
        id: NodeId,
        patch: StepPatch,
    },
    StepUpdateStatus {
        id: NodeId,
        status: StepStatus,
    },
    StepRemove {
        id: NodeId,
    },
    GateAdd {
        id: NodeId,
        name: String,
        #[serde(default)]
        depends_on: Vec<NodeId>,
    },
    GateApprove {
        id: NodeId,
    },
    GateBlock {
        id: NodeId,
    },
    GateRemove {
        id: NodeId,
    },
    DepAdd {
        node: NodeId,
        dep: NodeId,
    },
    DepRemove {
        node: NodeId,
        dep: NodeId,
    },
    GroupAdd {
        group_id: String,
        fanout: u32,
        template: NewStep,
    },
    FusionAdd {
        synth: NewStep,
        candidates: Vec<NodeId>,
    },
    RunStep {
        id: NodeId,
    },
    RunAll,
    RunGroup {
        group_id: String,
    },
    DispatchStep {
        id: NodeId,
        index: u32,
    },
    StopStep {
        id: NodeId,
    },
    RestartStep {
        id: NodeId,
    },
    Reconcile,
}

impl SequenceAction {
    /// Parse a JSON action, reporting malformed input as a validation error.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(|e| SeqError::validation("action", e.to_string()))
    }

    /// Stable name, as used in the `action` tag and in audit events.
    pub fn name(&self) -> &'static str {
        match self {
            SequenceAction::StepAdd(_) => "step-add",
            SequenceAction::StepUpdate { .. } => "step-update",
            SequenceAction::StepUpdateStatus { .. } => "step-update-status",
            SequenceAction::StepRemove { .. } => "step-remove",
            SequenceAction::GateAdd { .. } => "gate-add",
            SequenceAction::GateApprove { .. } => "gate-approve",
            SequenceAction::GateBlock { .. } => "gate-block",
            SequenceAction::GateRemove { .. } => "gate-remove",
            SequenceAction::DepAdd { .. } => "dep-add",
            SequenceAction::DepRemove { .. } => "dep-remove",
            SequenceAction::GroupAdd { .. } => "group-add",
            SequenceAction::FusionAdd { .. } => "fusion-add",
            SequenceAction::RunStep { .. } => "run-step",
            SequenceAction::RunAll => "run-all",
            SequenceAction::RunGroup { .. } => "run-group",
            SequenceAction::DispatchStep { .. } => "dispatch-step",
            SequenceAction::StopStep { .. } => "stop-step",
            SequenceAction::RestartStep { .. } => "restart-step",
            SequenceAction::Reconcile => "reconcile",
        }
    }
}

/// Arguments describing a step to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewStep {
    pub id: NodeId,
    pub name: String,
    pub model: Model,
    pub prompt_file: String,
    #[serde(rename = "type", default)]
    pub step_type: StepType,
    #[serde(default)]
    pub depends_on: Vec<NodeId>,
    pub cwd: Option<String>,
    pub group_id: Option<String>,
    pub fanout: Option<u32>,
    pub fail_policy: Option<FailPolicy>,
    pub timeout_ms: Option<u64>,
    pub watchdog_for: Option<NodeId>,
    #[serde(default, deserialize_with = "de_opt_bool_like")]
    pub orchestrator: Option<bool>,
}

impl From<NewStep> for Step {
    fn from(n: NewStep) -> Self {
        let mut step = Step::new(n.id, n.name, n.model, n.prompt_file);
        step.step_type = n.step_type;
        step.depends_on = n.depends_on;
        step.cwd = n.cwd;
        step.group_id = n.group_id;
        step.fanout = n.fanout;
        step.fail_policy = n.fail_policy;
        step.timeout_ms = n.timeout_ms;
        step.watchdog_for = n.watchdog_for;
        step.orchestrator = n.orchestrator;
        step
    }
}

/// Strict parser for boolean-like strings.
pub fn parse_bool_like(input: &str) -> std::result::Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoolLike {
    Bool(bool),
    Text(String),
}

/// `Option<bool>` that also accepts boolean-like strings.
pub fn de_opt_bool_like<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<BoolLike>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolLike::Bool(b)) => Ok(Some(b)),
        Some(BoolLike::Text(s)) => parse_bool_like(&s).map(Some).map_err(de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_actions() {
        let a = SequenceAction::from_json(r#"{"action":"dep-add","args":{"node":"b","dep":"a"}}"#)
            .unwrap();
        assert_eq!(
            a,
            SequenceAction::DepAdd {
                node: "b".into(),
                dep: "a".into()
            }
        );
        assert_eq!(a.name(), "dep-add");

        let a = SequenceAction::from_json(r#"{"action":"run-all"}"#).unwrap();
        assert_eq!(a, SequenceAction::RunAll);
    }

    #[test]
    fn unknown_fields_and_actions_are_rejected() {
        for input in [
            r#"{"action":"dep-add","args":{"node":"b","dep":"a","force":true}}"#,
            r#"{"action":"step-update","args":{"id":"a","patch":{"colour":"red"}}}"#,
            r#"{"action":"launch-missiles","args":{}}"#,
            r#"{"action":"step-update-status","args":{"id":"a","status":"done"}}"#,
        ] {
            let err = SequenceAction::from_json(input).unwrap_err();
            assert!(matches!(err, SeqError::Validation(_)), "{input}");
        }
    }

    #[test]
    fn bool_like_strings_only_where_allowed() {
        let a = SequenceAction::from_json(
            r#"{"action":"step-update","args":{"id":"a","patch":{"orchestrator":"Yes"}}}"#,
        )
        .unwrap();
        let SequenceAction::StepUpdate { patch, .. } = a else {
            panic!("wrong variant");
        };
        assert_eq!(patch.orchestrator, Some(true));

        let bad = SequenceAction::from_json(
            r#"{"action":"step-update","args":{"id":"a","patch":{"orchestrator":"maybe"}}}"#,
        );
        assert!(bad.is_err());

        // Non-boolean fields do not coerce.
        let bad = SequenceAction::from_json(
            r#"{"action":"step-update","args":{"id":"a","patch":{"fanout":"3"}}}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn parse_bool_like_accepts_common_spellings() {
        assert_eq!(parse_bool_like(" TRUE "), Ok(true));
        assert_eq!(parse_bool_like("off"), Ok(false));
        assert!(parse_bool_like("").is_err());
    }

    #[test]
    fn new_step_converts_with_defaults() {
        let a = SequenceAction::from_json(
            r#"{"action":"step-add","args":{"id":"a","name":"A","model":"codex","prompt_file":"a.md","depends_on":["g"]}}"#,
        )
        .unwrap();
        let SequenceAction::StepAdd(new) = a else {
            panic!("wrong variant");
        };
        let step = Step::from(new);
        assert_eq!(step.step_type, StepType::Base);
        assert_eq!(step.status, StepStatus::Ready);
        assert_eq!(step.depends_on, vec!["g"]);
    }
}
