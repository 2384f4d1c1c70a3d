// src/workspace.rs

//! Workspace context.
//!
//! Everything the engine touches on disk hangs off one root directory. The
//! root is an explicit value handed to every entry point, so several
//! workspaces can live in one process.

use std::path::{Path, PathBuf};

use crate::audit::JsonlAuditSink;
use crate::config::{self, EngineConfig};
use crate::errors::Result;
use crate::exec::ProcessMapStore;
use crate::policy::PolicyEngine;
use crate::sequence::SequenceStore;

/// Environment variable naming the workspace root.
pub const HOME_ENV: &str = "SEQDAG_HOME";

/// State directory under the root.
pub const STATE_DIR: &str = ".seqdag";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `--root` if given, else `$SEQDAG_HOME`, else the current directory.
    pub fn discover(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(root) = explicit {
            return Ok(Self::new(root));
        }
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::new(home));
        }
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn sequence_path(&self) -> PathBuf {
        self.state_dir().join("sequence.toml")
    }

    pub fn policy_path(&self) -> PathBuf {
        self.state_dir().join("policy.toml")
    }

    pub fn process_map_path(&self) -> PathBuf {
        self.state_dir().join("processes.toml")
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir().join("config.toml")
    }

    pub fn audit_path(&self) -> PathBuf {
        self.state_dir().join("audit.jsonl")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.state_dir().join("runs")
    }

    pub fn sequence_store(&self) -> SequenceStore {
        SequenceStore::new(self.sequence_path())
    }

    pub fn process_map(&self) -> ProcessMapStore {
        ProcessMapStore::new(self.process_map_path())
    }

    pub fn audit_sink(&self) -> JsonlAuditSink {
        JsonlAuditSink::new(self.audit_path())
    }

    /// Policy as currently on disk, relative to the workspace root.
    pub fn load_policy(&self) -> Result<PolicyEngine> {
        PolicyEngine::load(self.policy_path(), self.root.clone())
    }

    pub fn load_config(&self) -> Result<EngineConfig> {
        config::load_and_validate(self.config_path())
    }
}
