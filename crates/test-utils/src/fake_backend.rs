use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use seqdag::exec::backend::{BackendFuture, BackendUnavailable};
use seqdag::exec::ProcessBackend;

/// A call the engine made on the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Send { index: u32, argv: Vec<String> },
    Select(u32),
    Stop(u32),
    Restart(u32),
}

/// A fake process multiplexer that:
/// - answers `is_reachable` from a flag
/// - treats a fixed set of indices as live processes
/// - records every call.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the orchestrator.
#[derive(Debug, Clone)]
pub struct FakeBackend {
    reachable: bool,
    alive: Arc<Mutex<BTreeSet<u32>>>,
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl FakeBackend {
    pub fn reachable(alive: &[u32]) -> Self {
        Self {
            reachable: true,
            alive: Arc::new(Mutex::new(alive.iter().copied().collect())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            ..Self::reachable(&[])
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn kill(&self, index: u32) {
        self.alive.lock().unwrap().remove(&index);
    }

    fn answer(&self, call: BackendCall, index: u32) -> BackendFuture<'_> {
        self.calls.lock().unwrap().push(call);
        let ok = self.reachable && self.alive.lock().unwrap().contains(&index);
        Box::pin(async move {
            if ok {
                Ok(())
            } else {
                Err(BackendUnavailable(format!("no process at index {index}")))
            }
        })
    }
}

impl ProcessBackend for FakeBackend {
    fn is_reachable(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        let reachable = self.reachable;
        Box::pin(async move { reachable })
    }

    fn send_command<'a>(&'a self, index: u32, argv: &'a [String]) -> BackendFuture<'a> {
        self.answer(
            BackendCall::Send {
                index,
                argv: argv.to_vec(),
            },
            index,
        )
    }

    fn select_process(&self, index: u32) -> BackendFuture<'_> {
        self.answer(BackendCall::Select(index), index)
    }

    fn stop_process(&self, index: u32) -> BackendFuture<'_> {
        let fut = self.answer(BackendCall::Stop(index), index);
        self.kill(index);
        fut
    }

    fn restart_process(&self, index: u32) -> BackendFuture<'_> {
        self.answer(BackendCall::Restart(index), index)
    }
}
