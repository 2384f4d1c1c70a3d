#![cfg(unix)]

mod common;

use std::fs;

use common::{
    SequenceBuilder, StepBuilder, TestResult, TestWorkspace, init_tracing, status_of, with_timeout,
};
use seqdag::artifacts::{self, STDOUT_FILE};
use seqdag::engine::Orchestrator;
use seqdag::errors::SeqError;
use seqdag::exec::RunStatus;
use seqdag::types::{FailPolicy, StepStatus};
use seqdag_test_utils::workspace::PERMISSIVE_POLICY;

/// Workspace whose steps run their prompt text as a shell script.
fn shell_workspace() -> (TestWorkspace, Orchestrator) {
    init_tracing();
    let ws = TestWorkspace::new();
    ws.write_policy(PERMISSIVE_POLICY);
    let orch = ws.orchestrator(TestWorkspace::shell_config());
    (ws, orch)
}

#[tokio::test]
async fn successful_step_is_done_with_artifacts() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());
    ws.write_prompt("a", "echo hello from a");

    let run = with_timeout(orch.run_step("a", false)).await?;

    assert_eq!(run.status, StepStatus::Done);
    assert_eq!(run.run_status, RunStatus::Success);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.persisted);
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Done);

    let dir = run.artifacts.expect("artifacts saved");
    assert_eq!(fs::read_to_string(dir.join(STDOUT_FILE))?, "hello from a\n");
    let record = artifacts::load_record(&dir)?;
    assert_eq!(record.step_id, "a");
    assert_eq!(record.run_id, run.run_id);
    Ok(())
}

#[tokio::test]
async fn non_zero_exit_marks_the_step_failed() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());
    ws.write_prompt("a", "echo oops >&2; exit 3");

    let run = with_timeout(orch.run_step("a", false)).await?;

    assert_eq!(run.status, StepStatus::Failed);
    assert_eq!(run.run_status, RunStatus::Failed);
    assert_eq!(run.exit_code, Some(3));
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn child_sees_step_variables() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(&SequenceBuilder::new("demo").step("env-check", &[]).build_valid());
    ws.write_prompt(
        "env-check",
        r#"printf '%s|%s|%s' "$SEQDAG_STEP_ID" "$SEQDAG_RUN_ID" "$SEQDAG_HOME""#,
    );

    let run = with_timeout(orch.run_step("env-check", false)).await?;
    let out = fs::read_to_string(run.artifacts.as_ref().unwrap().join(STDOUT_FILE))?;
    let expected = format!("env-check|{}|{}", run.run_id, ws.root().display());
    assert_eq!(out, expected);
    Ok(())
}

#[tokio::test]
async fn timeout_fails_the_step() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("slow").timeout_ms(200))
            .build_valid(),
    );
    ws.write_prompt("slow", "exec sleep 30");

    let err = with_timeout(orch.run_step("slow", false)).await.unwrap_err();

    match err {
        SeqError::ProcessTimeout { step, timeout_ms } => {
            assert_eq!(step, "slow");
            assert_eq!(timeout_ms, 200);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(status_of(&ws.load(), "slow"), StepStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn timeout_covers_background_children_and_keeps_output() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("bg").timeout_ms(500))
            .build_valid(),
    );
    ws.write_prompt("bg", "sleep 6 & echo hi");

    let started = std::time::Instant::now();
    let err = with_timeout(orch.run_step("bg", false)).await.unwrap_err();

    assert!(matches!(err, SeqError::ProcessTimeout { timeout_ms: 500, .. }));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert_eq!(status_of(&ws.load(), "bg"), StepStatus::Failed);

    let runs: Vec<_> = fs::read_dir(ws.workspace.runs_dir())?.collect::<Result<_, _>>()?;
    assert_eq!(runs.len(), 1);
    let dir = runs[0].path().join("bg");
    assert_eq!(fs::read_to_string(dir.join(STDOUT_FILE))?, "hi\n");
    let record = artifacts::load_record(&dir)?;
    assert!(record.timed_out);
    assert_eq!(record.status, RunStatus::Error);
    Ok(())
}

#[tokio::test]
async fn step_with_unmet_dependencies_is_not_run() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(
        &SequenceBuilder::new("demo")
            .step("a", &[])
            .step("b", &["a"])
            .build_valid(),
    );
    ws.write_prompt("b", "echo should not run");

    let err = orch.run_step("b", false).await.unwrap_err();
    assert!(matches!(err, SeqError::NotRunnable { ref id, .. } if id == "b"));
    assert_eq!(status_of(&ws.load(), "b"), StepStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn safe_mode_asks_for_confirmation() -> TestResult {
    init_tracing();
    let ws = TestWorkspace::new();
    ws.write_policy("mode = \"SAFE\"\nallowed_commands = []\n");
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());
    ws.write_prompt("a", "true");
    let orch = ws.orchestrator(TestWorkspace::shell_config());

    let err = orch.run_step("a", false).await.unwrap_err();
    assert!(matches!(err, SeqError::ConfirmationRequired(_)));
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Ready);

    let run = with_timeout(orch.run_step("a", true)).await?;
    assert_eq!(run.status, StepStatus::Done);
    Ok(())
}

#[tokio::test]
async fn default_policy_rejects_unlisted_programs() -> TestResult {
    init_tracing();
    let ws = TestWorkspace::new();
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());
    ws.write_prompt("a", "true");
    let orch = ws.orchestrator(TestWorkspace::shell_config());

    let err = orch.run_step("a", true).await.unwrap_err();
    assert!(matches!(err, SeqError::PolicyDenied(_)));
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn forbidden_prompt_text_is_denied() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());
    ws.write_prompt("a", "sudo reboot");

    let err = orch.run_step("a", true).await.unwrap_err();
    assert!(matches!(err, SeqError::PolicyDenied(_)));
    Ok(())
}

#[tokio::test]
async fn run_runnable_runs_the_ready_frontier() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(
        &SequenceBuilder::new("demo")
            .step("a", &[])
            .step("b", &[])
            .step("c", &["a", "b"])
            .build_valid(),
    );
    for id in ["a", "b", "c"] {
        ws.write_prompt(id, &format!("echo {id}"));
    }

    let outcomes = with_timeout(orch.run_runnable(false)).await?;
    let ids: Vec<_> = outcomes.iter().map(|o| o.step_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(outcomes.iter().all(|o| o.succeeded()));

    let seq = ws.load();
    assert_eq!(status_of(&seq, "c"), StepStatus::Ready);
    assert_eq!(orch.runnable()?, vec!["c"]);

    let outcomes = with_timeout(orch.run_runnable(false)).await?;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(status_of(&ws.load(), "c"), StepStatus::Done);

    assert!(with_timeout(orch.run_runnable(false)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn run_runnable_respects_max_concurrent() -> TestResult {
    init_tracing();
    let ws = TestWorkspace::new();
    ws.write_policy("mode = \"POWER\"\nallowed_commands = []\nmax_concurrent = 1\n");
    ws.save(
        &SequenceBuilder::new("demo")
            .step("a", &[])
            .step("b", &[])
            .build_valid(),
    );
    ws.write_prompt("a", "true");
    ws.write_prompt("b", "true");
    let orch = ws.orchestrator(TestWorkspace::shell_config());

    let err = orch.run_runnable(false).await.unwrap_err();
    assert!(matches!(err, SeqError::PolicyDenied(_)));

    let seq = ws.load();
    assert_eq!(status_of(&seq, "a"), StepStatus::Ready);
    assert_eq!(status_of(&seq, "b"), StepStatus::Ready);
    Ok(())
}

fn group_workspace(policy: FailPolicy, scripts: &[(&str, &str)]) -> (TestWorkspace, Orchestrator) {
    let (ws, orch) = shell_workspace();
    let mut builder = SequenceBuilder::new("demo");
    for (i, (id, script)) in scripts.iter().enumerate() {
        let mut step = StepBuilder::new(id).group("impl");
        if i == 0 {
            step = step.fail_policy(policy);
        }
        builder = builder.with_step(step);
        ws.write_prompt(id, script);
    }
    ws.save(&builder.build_valid());
    (ws, orch)
}

#[tokio::test]
async fn group_stop_all_halts_after_first_failure() -> TestResult {
    let (ws, orch) = group_workspace(
        FailPolicy::StopAll,
        &[("m1", "true"), ("m2", "exit 1"), ("m3", "true")],
    );

    let outcomes = with_timeout(orch.run_group("impl", false)).await?;
    let ids: Vec<_> = outcomes.iter().map(|o| o.step_id.as_str()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);

    let seq = ws.load();
    assert_eq!(status_of(&seq, "m1"), StepStatus::Done);
    assert_eq!(status_of(&seq, "m2"), StepStatus::Failed);
    assert_eq!(status_of(&seq, "m3"), StepStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn group_continue_runs_every_member() -> TestResult {
    let (ws, orch) = group_workspace(
        FailPolicy::Continue,
        &[("m1", "exit 1"), ("m2", "true"), ("m3", "true")],
    );

    let outcomes = with_timeout(orch.run_group("impl", false)).await?;
    assert_eq!(outcomes.len(), 3);

    let seq = ws.load();
    assert_eq!(status_of(&seq, "m1"), StepStatus::Failed);
    assert_eq!(status_of(&seq, "m2"), StepStatus::Done);
    assert_eq!(status_of(&seq, "m3"), StepStatus::Done);
    Ok(())
}

#[tokio::test]
async fn group_retry_reruns_a_failed_member_once() -> TestResult {
    let (ws, orch) = group_workspace(
        FailPolicy::Retry,
        &[
            ("m1", "if [ -f m1.marker ]; then exit 0; fi; touch m1.marker; exit 1"),
            ("m2", "true"),
        ],
    );

    let outcomes = with_timeout(orch.run_group("impl", false)).await?;
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.succeeded()));

    let seq = ws.load();
    assert_eq!(status_of(&seq, "m1"), StepStatus::Done);
    assert_eq!(status_of(&seq, "m2"), StepStatus::Done);
    assert!(ws.root().join("m1.marker").exists());
    Ok(())
}

#[tokio::test]
async fn unknown_group_is_not_found() -> TestResult {
    let (ws, orch) = shell_workspace();
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).build_valid());

    let err = orch.run_group("nope", false).await.unwrap_err();
    assert!(matches!(err, SeqError::NotFound(_)));
    Ok(())
}
