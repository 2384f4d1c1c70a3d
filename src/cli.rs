// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::{FailPolicy, Model, NodeId, StepStatus, StepType};

/// Command-line arguments for `seqdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "seqdag",
    version,
    about = "Orchestrate AI-agent steps as a dependency DAG with manual gates.",
    long_about = None
)]
pub struct CliArgs {
    /// Workspace root. Default: `$SEQDAG_HOME`, else the current directory.
    #[arg(long, global = true, value_name = "PATH")]
    pub root: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SEQDAG_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Confirm actions that the policy wants confirmed.
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Create an empty sequence in the workspace.
    Init {
        #[arg(long, default_value = "default")]
        name: String,
    },
    /// Print nodes in topological order with their status.
    Show,
    #[command(subcommand)]
    Step(StepCommand),
    #[command(subcommand)]
    Dep(DepCommand),
    #[command(subcommand)]
    Gate(GateCommand),
    #[command(subcommand)]
    Group(GroupCommand),
    #[command(subcommand)]
    Fusion(FusionCommand),
    /// List steps that can run now.
    Runnable,
    /// Run one step.
    Run { id: NodeId },
    /// Run every runnable step concurrently.
    RunAll,
    /// Run a parallel group's members one after another.
    RunGroup { group_id: String },
    /// Fail RUNNING steps whose process can no longer be confirmed.
    Reconcile,
    #[command(subcommand)]
    Policy(PolicyCommand),
    /// Apply a JSON action, e.g. '{"action":"dep-add","args":{"node":"b","dep":"a"}}'.
    Apply { json: String },
}

#[derive(Debug, Clone, Subcommand)]
pub enum StepCommand {
    Add(StepAddArgs),
    UpdateStatus { id: NodeId, status: StepStatus },
    Remove { id: NodeId },
}

/// Step attributes shared by `step add`, `group add` and `fusion add`.
#[derive(Debug, Clone, Args)]
pub struct StepSpecArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub model: Model,
    #[arg(long, value_name = "PATH")]
    pub prompt_file: String,
    /// Comma-separated dependency IDs.
    #[arg(long, value_delimiter = ',')]
    pub depends_on: Vec<NodeId>,
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<String>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long)]
    pub fail_policy: Option<FailPolicy>,
}

#[derive(Debug, Clone, Args)]
pub struct StepAddArgs {
    pub id: NodeId,
    #[command(flatten)]
    pub spec: StepSpecArgs,
    #[arg(long = "type")]
    pub step_type: Option<StepType>,
    #[arg(long)]
    pub group_id: Option<String>,
    #[arg(long)]
    pub watchdog_for: Option<NodeId>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum DepCommand {
    /// `node` depends on `dep`.
    Add { node: NodeId, dep: NodeId },
    Remove { node: NodeId, dep: NodeId },
}

#[derive(Debug, Clone, Subcommand)]
pub enum GateCommand {
    Add {
        id: NodeId,
        #[arg(long)]
        name: String,
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<NodeId>,
    },
    Approve { id: NodeId },
    Block { id: NodeId },
    Remove { id: NodeId },
}

#[derive(Debug, Clone, Subcommand)]
pub enum GroupCommand {
    /// Expand a template into `<group>-1 .. <group>-N` parallel steps.
    Add {
        group_id: String,
        #[arg(long)]
        fanout: u32,
        #[command(flatten)]
        spec: StepSpecArgs,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum FusionCommand {
    /// Add a synthesis step over candidate steps.
    Add {
        id: NodeId,
        #[arg(long, value_delimiter = ',', required = true)]
        candidates: Vec<NodeId>,
        #[command(flatten)]
        spec: StepSpecArgs,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum PolicyCommand {
    /// Evaluate a command line against the workspace policy.
    Check {
        #[arg(long, value_name = "DIR")]
        cwd: Option<PathBuf>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_add() {
        let args = CliArgs::try_parse_from([
            "seqdag",
            "--root",
            "/w",
            "step",
            "add",
            "b",
            "--name",
            "B",
            "--model",
            "codex",
            "--prompt-file",
            "b.md",
            "--depends-on",
            "a,g",
        ])
        .unwrap();

        assert_eq!(args.root, Some(PathBuf::from("/w")));
        let Command::Step(StepCommand::Add(add)) = args.command else {
            panic!("wrong command");
        };
        assert_eq!(add.id, "b");
        assert_eq!(add.spec.model, Model::Codex);
        assert_eq!(add.spec.depends_on, vec!["a", "g"]);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from(["seqdag", "run", "a", "--yes"]).unwrap();
        assert!(args.yes);
        assert!(matches!(args.command, Command::Run { ref id } if id == "a"));
    }

    #[test]
    fn policy_check_takes_raw_command() {
        let args =
            CliArgs::try_parse_from(["seqdag", "policy", "check", "claude", "-p", "hi"]).unwrap();
        let Command::Policy(PolicyCommand::Check { command, .. }) = args.command else {
            panic!("wrong command");
        };
        assert_eq!(command, vec!["claude", "-p", "hi"]);
    }

    #[test]
    fn rejects_unknown_status() {
        assert!(CliArgs::try_parse_from(["seqdag", "step", "update-status", "a", "WHATEVER"]).is_err());
    }
}
