// src/engine/mod.rs

//! Orchestration engine.
//!
//! - [`orchestrator`] holds the [`Orchestrator`] service: queries, mutations,
//!   local and backend-driven execution, reconciliation.
//! - [`action`] is the typed action vocabulary accepted by
//!   [`Orchestrator::apply_action`].

pub mod action;
pub mod orchestrator;

pub use action::{NewStep, SequenceAction, parse_bool_like};
pub use orchestrator::{
    Orchestrator, RestartOutcome, StepOutcome, StepRun, StopOutcome, outcomes_json,
};
