// src/dag/mod.rs

//! DAG engine and lifecycle rules.
//!
//! - [`graph`] holds the dependency graph with cycle detection and
//!   topological ordering.
//! - [`state`] contains the step/gate state machine: runnability, commanded
//!   transitions and gate approval.

pub mod graph;
pub mod state;

pub use graph::DagGraph;
pub use state::{approve_gate, block_gate, is_runnable, runnable_steps, set_step_status};
