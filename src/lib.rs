// src/lib.rs

pub mod artifacts;
pub mod audit;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod policy;
pub mod reconcile;
pub mod sequence;
pub mod types;
pub mod workspace;

use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::cli::{
    CliArgs, Command, DepCommand, FusionCommand, GateCommand, GroupCommand, PolicyCommand,
    StepCommand, StepSpecArgs,
};
use crate::dag::state::is_runnable;
use crate::dag::DagGraph;
use crate::engine::{Orchestrator, SequenceAction, outcomes_json};
use crate::errors::Result;
use crate::sequence::{Gate, NodeRef, Sequence, Step};
use crate::workspace::Workspace;

pub use crate::errors::SeqError;

/// High-level entry point used by `main.rs`.
///
/// Resolves the workspace, builds the orchestrator and runs one command.
/// Results go to stdout as JSON (`show` prints a table).
pub async fn run(args: CliArgs) -> Result<()> {
    let workspace = Workspace::discover(args.root.clone())?;
    debug!(root = ?workspace.root(), "workspace resolved");

    let orch = Orchestrator::open(workspace)?;
    let yes = args.yes;

    match args.command {
        Command::Init { name } => {
            let seq = orch.init(&name)?;
            print_json(&json!({ "initialised": orch.store().path(), "name": seq.name }))
        }
        Command::Show => {
            print_sequence(&orch.sequence()?);
            Ok(())
        }
        Command::Step(cmd) => match cmd {
            StepCommand::Add(add) => {
                let mut step = step_from_spec(add.id, add.spec);
                if let Some(t) = add.step_type {
                    step.step_type = t;
                }
                step.group_id = add.group_id;
                step.watchdog_for = add.watchdog_for;
                let id = step.id.clone();
                orch.add_step(step, yes)?;
                print_json(&json!({ "added": id }))
            }
            StepCommand::UpdateStatus { id, status } => {
                let previous = orch.set_step_status(&id, status)?;
                print_json(&json!({ "id": id, "previous": previous, "status": status }))
            }
            StepCommand::Remove { id } => {
                orch.remove_step(&id, yes)?;
                print_json(&json!({ "removed": id }))
            }
        },
        Command::Dep(cmd) => match cmd {
            DepCommand::Add { node, dep } => {
                orch.add_dependency(&node, &dep)?;
                print_json(&json!({ "node": node, "dependsOn": dep }))
            }
            DepCommand::Remove { node, dep } => {
                orch.remove_dependency(&node, &dep)?;
                print_json(&json!({ "node": node, "removed": dep }))
            }
        },
        Command::Gate(cmd) => match cmd {
            GateCommand::Add {
                id,
                name,
                depends_on,
            } => {
                let mut gate = Gate::new(id.clone(), name);
                gate.depends_on = depends_on;
                orch.add_gate(gate)?;
                print_json(&json!({ "added": id }))
            }
            GateCommand::Approve { id } => {
                let unblocked = orch.approve_gate(&id, yes)?;
                print_json(&json!({ "approved": id, "unblocked": unblocked }))
            }
            GateCommand::Block { id } => {
                orch.block_gate(&id)?;
                print_json(&json!({ "blocked": id }))
            }
            GateCommand::Remove { id } => {
                orch.remove_gate(&id)?;
                print_json(&json!({ "removed": id }))
            }
        },
        Command::Group(GroupCommand::Add {
            group_id,
            fanout,
            spec,
        }) => {
            let template = step_from_spec(group_id.clone(), spec);
            let ids = orch.add_parallel_group(&group_id, template, fanout, yes)?;
            print_json(&json!({ "group": group_id, "steps": ids }))
        }
        Command::Fusion(FusionCommand::Add {
            id,
            candidates,
            spec,
        }) => {
            let synth = step_from_spec(id.clone(), spec);
            orch.add_fusion(synth, &candidates, yes)?;
            print_json(&json!({ "synth": id, "candidates": candidates }))
        }
        Command::Runnable => print_json(&orch.runnable()?),
        Command::Run { id } => print_json(&orch.run_step(&id, yes).await?),
        Command::RunAll => print_json(&outcomes_json(&orch.run_runnable(yes).await?)),
        Command::RunGroup { group_id } => {
            print_json(&outcomes_json(&orch.run_group(&group_id, yes).await?))
        }
        Command::Reconcile => print_json(&orch.reconcile().await?),
        Command::Policy(PolicyCommand::Check { cwd, command }) => {
            let decision = orch.policy_check(&command.join(" "), cwd.as_deref())?;
            print_json(&decision)
        }
        Command::Apply { json } => {
            let action = SequenceAction::from_json(&json)?;
            print_json(&orch.apply_action(action, yes).await?)
        }
    }
}

fn step_from_spec(id: String, spec: StepSpecArgs) -> Step {
    let mut step = Step::new(id, spec.name, spec.model, spec.prompt_file);
    step.depends_on = spec.depends_on;
    step.cwd = spec.cwd;
    step.timeout_ms = spec.timeout_ms;
    step.fail_policy = spec.fail_policy;
    step
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Nodes in topological order, one per line.
fn print_sequence(seq: &Sequence) {
    println!("{} (version {})", seq.name, seq.version);
    let order = DagGraph::from_sequence(seq).topological_sort();
    if order.is_empty() {
        println!("  (empty)");
        return;
    }

    for id in order {
        match seq.node(&id) {
            Some(NodeRef::Step(step)) => {
                let marker = if is_runnable(seq, step) { "*" } else { " " };
                println!(
                    "{marker} step {:<24} {:<13} {:<12} deps: [{}]",
                    step.id,
                    step.status.to_string(),
                    step.model.to_string(),
                    step.depends_on.join(", ")
                );
            }
            Some(NodeRef::Gate(gate)) => {
                println!(
                    "  gate {:<24} {:<13} {:<12} deps: [{}]",
                    gate.id,
                    gate.status.to_string(),
                    "",
                    gate.depends_on.join(", ")
                );
            }
            None => {}
        }
    }
}
