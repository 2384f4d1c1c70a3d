#![allow(dead_code)]

use seqdag::sequence::Sequence;
use seqdag::types::StepStatus;

pub use seqdag_test_utils::{
    BackendCall, FakeBackend, SequenceBuilder, StepBuilder, TestWorkspace, init_tracing,
    with_timeout,
};

pub type TestResult = anyhow::Result<()>;

pub fn status_of(seq: &Sequence, id: &str) -> StepStatus {
    seq.step(id)
        .unwrap_or_else(|| panic!("step '{id}' missing"))
        .status
}
