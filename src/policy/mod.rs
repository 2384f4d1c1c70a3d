// src/policy/mod.rs

//! Execution policy: which commands may run, where, and how many at once.

pub mod config;
pub mod engine;

pub use config::PolicyConfig;
pub use engine::{PolicyAction, PolicyDecision, PolicyEngine};
