// src/exec/backend.rs

//! Process-multiplexer backend abstraction.
//!
//! The engine never talks to a terminal multiplexer directly; it goes through
//! a `ProcessBackend` so the reconciler and the orchestrator can be exercised
//! with a fake in tests. Every call returns `Result<(), BackendUnavailable>`
//! and the caller decides whether to proceed optimistically.
//!
//! The process map (step id -> multiplexer index) lives next to the sequence
//! document and follows the same whole-file atomic rewrite discipline.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use thiserror::Error;
use tracing::debug;

use crate::errors::{Result, SeqError};
use crate::fs::{read_optional, write_atomic};

/// The backend could not carry out a request (not running, index gone, ...).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("process backend unavailable: {0}")]
pub struct BackendUnavailable(pub String);

impl From<BackendUnavailable> for SeqError {
    fn from(e: BackendUnavailable) -> Self {
        SeqError::BackendUnavailable(e.0)
    }
}

pub type BackendResult = std::result::Result<(), BackendUnavailable>;

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = BackendResult> + Send + 'a>>;

/// The five capabilities the engine needs from a process multiplexer.
pub trait ProcessBackend: Send + Sync {
    fn is_reachable(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>>;

    /// Type `argv` into the process at `index`.
    fn send_command<'a>(&'a self, index: u32, argv: &'a [String]) -> BackendFuture<'a>;

    /// No-op probe: succeeds iff `index` still addresses a live process.
    fn select_process(&self, index: u32) -> BackendFuture<'_>;

    fn stop_process(&self, index: u32) -> BackendFuture<'_>;

    fn restart_process(&self, index: u32) -> BackendFuture<'_>;
}

/// Backend for environments without a multiplexer. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableBackend;

impl UnreachableBackend {
    fn fail(&self) -> BackendFuture<'_> {
        Box::pin(async { Err(BackendUnavailable("no process backend configured".into())) })
    }
}

impl ProcessBackend for UnreachableBackend {
    fn is_reachable(&self) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(async { false })
    }

    fn send_command<'a>(&'a self, _index: u32, _argv: &'a [String]) -> BackendFuture<'a> {
        self.fail()
    }

    fn select_process(&self, _index: u32) -> BackendFuture<'_> {
        self.fail()
    }

    fn stop_process(&self, _index: u32) -> BackendFuture<'_> {
        self.fail()
    }

    fn restart_process(&self, _index: u32) -> BackendFuture<'_> {
        self.fail()
    }
}

/// Step id to process index, persisted as a flat TOML table.
#[derive(Debug, Clone)]
pub struct ProcessMapStore {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

impl ProcessMapStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file means an empty map.
    pub fn load(&self) -> Result<BTreeMap<String, u32>> {
        match read_optional(&self.path)? {
            Some(text) => Ok(toml::from_str(&text)?),
            None => Ok(BTreeMap::new()),
        }
    }

    pub fn get(&self, step_id: &str) -> Result<Option<u32>> {
        Ok(self.load()?.get(step_id).copied())
    }

    pub fn set(&self, step_id: &str, index: u32) -> Result<()> {
        let _guard = self.lock()?;
        let mut map = self.load()?;
        map.insert(step_id.to_string(), index);
        self.save(&map)?;
        debug!(step = %step_id, index, "recorded process index");
        Ok(())
    }

    /// Returns the removed index, if there was one.
    pub fn remove(&self, step_id: &str) -> Result<Option<u32>> {
        self.remove_many(&[step_id.to_string()])
            .map(|mut removed| removed.pop().map(|(_, idx)| idx))
    }

    /// Drop several mappings in one rewrite.
    pub fn remove_many(&self, step_ids: &[String]) -> Result<Vec<(String, u32)>> {
        let _guard = self.lock()?;
        let mut map = self.load()?;
        let removed: Vec<(String, u32)> = step_ids
            .iter()
            .filter_map(|id| map.remove(id).map(|idx| (id.clone(), idx)))
            .collect();
        if !removed.is_empty() {
            self.save(&map)?;
            debug!(count = removed.len(), "removed process indices");
        }
        Ok(removed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| SeqError::Other(anyhow!("process map lock poisoned")))
    }

    fn save(&self, map: &BTreeMap<String, u32>) -> Result<()> {
        let text = toml::to_string(map)?;
        write_atomic(&self.path, text.as_bytes())?;
        Ok(())
    }
}
