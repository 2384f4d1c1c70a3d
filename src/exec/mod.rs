// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`runner`] spawns one step process and captures its output.
//! - [`env`] decides which environment variables a child may see.
//! - [`command`] turns a model's command template into an argv.
//! - [`backend`] is the process-multiplexer contract used by dispatch, stop,
//!   restart and the reconciler, plus the step -> index map.

pub mod backend;
pub mod command;
pub mod env;
pub mod runner;

pub use backend::{BackendUnavailable, ProcessBackend, ProcessMapStore, UnreachableBackend};
pub use command::{CommandLine, CommandTemplate, build_command};
pub use runner::{ProcessRunner, RunRequest, RunResult, RunStatus, new_run_id};
