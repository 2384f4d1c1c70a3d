#![cfg(unix)]
//! Runs in its own binary: it changes the process environment.

mod common;

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use common::{SequenceBuilder, TestResult, TestWorkspace, init_tracing, status_of, with_timeout};
use seqdag::types::StepStatus;
use seqdag_test_utils::workspace::PERMISSIVE_POLICY;

#[tokio::test]
async fn non_utf8_environment_does_not_strand_running_steps() -> TestResult {
    init_tracing();
    // SAFETY: the only test in this binary, set before any step is spawned.
    unsafe {
        std::env::set_var("SEQDAG_TEST_BYTES", OsStr::from_bytes(b"\xff\xfe"));
        std::env::set_var(OsStr::from_bytes(b"NOT_UTF8_\xff"), "x");
    }

    let ws = TestWorkspace::new();
    ws.write_policy(PERMISSIVE_POLICY);
    let orch = ws.orchestrator(TestWorkspace::shell_config());
    ws.save(&SequenceBuilder::new("demo").step("a", &[]).step("b", &[]).build_valid());
    ws.write_prompt("a", "test -n \"$SEQDAG_TEST_BYTES\"");
    ws.write_prompt("b", "echo b");

    let outcomes = with_timeout(orch.run_runnable(false)).await?;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.succeeded()));
    let seq = ws.load();
    assert_eq!(status_of(&seq, "a"), StepStatus::Done);
    assert_eq!(status_of(&seq, "b"), StepStatus::Done);
    Ok(())
}
