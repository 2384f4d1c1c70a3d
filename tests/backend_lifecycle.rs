mod common;

use std::sync::Arc;

use common::{
    BackendCall, FakeBackend, SequenceBuilder, StepBuilder, TestResult, TestWorkspace, status_of,
};
use seqdag::config::EngineConfig;
use seqdag::engine::{Orchestrator, RestartOutcome, StopOutcome};
use seqdag::errors::SeqError;
use seqdag::types::StepStatus;
use seqdag_test_utils::workspace::PERMISSIVE_POLICY;

fn setup(backend: &FakeBackend) -> (TestWorkspace, Orchestrator) {
    let ws = TestWorkspace::new();
    ws.write_policy(PERMISSIVE_POLICY);
    ws.save(
        &SequenceBuilder::new("demo")
            .step("a", &[])
            .step("b", &["a"])
            .build_valid(),
    );
    ws.write_prompt("a", "do a");
    ws.write_prompt("b", "do b");
    let orch = ws.orchestrator_with(EngineConfig::default(), Arc::new(backend.clone()));
    (ws, orch)
}

#[tokio::test]
async fn dispatch_sends_the_rendered_command_and_marks_running() -> TestResult {
    let backend = FakeBackend::reachable(&[2]);
    let (ws, orch) = setup(&backend);

    orch.dispatch_step("a", 2, false).await?;

    assert_eq!(
        backend.calls(),
        vec![BackendCall::Send {
            index: 2,
            argv: vec!["codex".into(), "exec".into(), "do a".into()],
        }]
    );
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Running);
    assert_eq!(orch.process_map().get("a")?, Some(2));
    Ok(())
}

#[tokio::test]
async fn dispatch_to_a_missing_process_changes_nothing() -> TestResult {
    let backend = FakeBackend::reachable(&[]);
    let (ws, orch) = setup(&backend);

    let err = orch.dispatch_step("a", 7, false).await.unwrap_err();

    assert!(matches!(err, SeqError::BackendUnavailable(_)));
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Ready);
    assert_eq!(orch.process_map().get("a")?, None);
    Ok(())
}

#[tokio::test]
async fn dispatch_refuses_a_blocked_step() -> TestResult {
    let backend = FakeBackend::reachable(&[1]);
    let (_ws, orch) = setup(&backend);

    let err = orch.dispatch_step("b", 1, false).await.unwrap_err();
    assert!(matches!(err, SeqError::NotRunnable { .. }));
    assert!(backend.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn stop_marks_failed_and_forgets_the_index() -> TestResult {
    let backend = FakeBackend::reachable(&[3]);
    let (ws, orch) = setup(&backend);
    orch.dispatch_step("a", 3, false).await?;

    let outcome = orch.stop_step("a", false).await?;

    assert_eq!(
        outcome,
        StopOutcome {
            index: Some(3),
            backend_stopped: true,
        }
    );
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Failed);
    assert_eq!(orch.process_map().get("a")?, None);
    assert!(backend.calls().contains(&BackendCall::Stop(3)));
    Ok(())
}

#[tokio::test]
async fn stop_still_fails_the_step_when_the_backend_is_down() -> TestResult {
    let ws = TestWorkspace::new();
    ws.write_policy(PERMISSIVE_POLICY);
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("a").status(StepStatus::Running))
            .build_valid(),
    );
    let orch = ws.orchestrator(EngineConfig::default());
    orch.process_map().set("a", 4)?;

    let outcome = orch.stop_step("a", false).await?;

    assert!(!outcome.backend_stopped);
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn restart_brings_a_failed_step_back_to_running() -> TestResult {
    let backend = FakeBackend::reachable(&[5]);
    let ws = TestWorkspace::new();
    ws.write_policy(PERMISSIVE_POLICY);
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("a").status(StepStatus::Failed))
            .build_valid(),
    );
    ws.write_prompt("a", "do a");
    let orch = ws.orchestrator_with(EngineConfig::default(), Arc::new(backend.clone()));
    orch.process_map().set("a", 5)?;

    let outcome = orch.restart_step("a", false).await?;

    assert_eq!(
        outcome,
        RestartOutcome {
            index: 5,
            backend_restarted: true,
        }
    );
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Running);
    assert_eq!(backend.calls(), vec![BackendCall::Restart(5)]);
    Ok(())
}

#[tokio::test]
async fn restart_without_a_recorded_process_is_not_found() -> TestResult {
    let backend = FakeBackend::reachable(&[]);
    let (_ws, orch) = setup(&backend);

    let err = orch.restart_step("a", false).await.unwrap_err();
    assert!(matches!(err, SeqError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn reconcile_fails_only_the_orphans() -> TestResult {
    let backend = FakeBackend::reachable(&[1]);
    let ws = TestWorkspace::new();
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("live").status(StepStatus::Running))
            .with_step(StepBuilder::new("gone").status(StepStatus::Running))
            .with_step(StepBuilder::new("unmapped").status(StepStatus::Running))
            .with_step(StepBuilder::new("idle"))
            .build_valid(),
    );
    let orch = ws.orchestrator_with(EngineConfig::default(), Arc::new(backend.clone()));
    orch.process_map().set("live", 1)?;
    orch.process_map().set("gone", 2)?;

    let report = orch.reconcile().await?;

    assert!(report.backing_available);
    assert_eq!(report.checked, 3);
    assert_eq!(report.alive, vec!["live"]);
    assert_eq!(report.orphaned, vec!["gone", "unmapped"]);
    assert_eq!(report.reconciled, vec!["gone", "unmapped"]);

    let seq = ws.load();
    assert_eq!(status_of(&seq, "live"), StepStatus::Running);
    assert_eq!(status_of(&seq, "gone"), StepStatus::Failed);
    assert_eq!(status_of(&seq, "unmapped"), StepStatus::Failed);
    assert_eq!(status_of(&seq, "idle"), StepStatus::Ready);

    assert_eq!(orch.process_map().get("live")?, Some(1));
    assert_eq!(orch.process_map().get("gone")?, None);

    let orphan_events = ws
        .audit
        .events()
        .into_iter()
        .filter(|e| e.action == "reconcile.orphaned")
        .count();
    assert_eq!(orphan_events, 2);
    Ok(())
}

#[tokio::test]
async fn reconcile_with_the_backend_down_fails_everything_running() -> TestResult {
    let backend = FakeBackend::unreachable();
    let ws = TestWorkspace::new();
    ws.save(
        &SequenceBuilder::new("demo")
            .with_step(StepBuilder::new("a").status(StepStatus::Running))
            .with_step(StepBuilder::new("b").status(StepStatus::Done))
            .build_valid(),
    );
    let orch = ws.orchestrator_with(EngineConfig::default(), Arc::new(backend.clone()));
    orch.process_map().set("a", 1)?;

    let report = orch.reconcile().await?;

    assert!(!report.backing_available);
    assert_eq!(report.reconciled, vec!["a"]);
    assert_eq!(status_of(&ws.load(), "a"), StepStatus::Failed);
    assert_eq!(status_of(&ws.load(), "b"), StepStatus::Done);
    assert!(backend.calls().is_empty());
    Ok(())
}
