use std::path::{Path, PathBuf};
use std::sync::Arc;

use seqdag::audit::MemoryAuditSink;
use seqdag::config::EngineConfig;
use seqdag::engine::Orchestrator;
use seqdag::exec::{CommandTemplate, ProcessBackend, UnreachableBackend};
use seqdag::sequence::Sequence;
use seqdag::types::Model;
use seqdag::workspace::Workspace;
use tempfile::TempDir;

/// POWER mode, any command, generous limits.
pub const PERMISSIVE_POLICY: &str = r#"
mode = "POWER"
allowed_commands = []
max_concurrent = 16
max_fanout = 16
"#;

/// A workspace in a temporary directory, deleted on drop.
pub struct TestWorkspace {
    dir: TempDir,
    pub workspace: Workspace,
    pub audit: Arc<MemoryAuditSink>,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp workspace");
        let workspace = Workspace::new(dir.path());
        Self {
            dir,
            workspace,
            audit: Arc::new(MemoryAuditSink::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }

    pub fn write_policy(&self, toml: &str) {
        self.write_file(".seqdag/policy.toml", toml);
    }

    /// Prompt file for a step built by `StepBuilder::new(id)`.
    pub fn write_prompt(&self, id: &str, contents: &str) {
        self.write_file(&format!("prompts/{id}.md"), contents);
    }

    pub fn save(&self, seq: &Sequence) {
        self.workspace
            .sequence_store()
            .write(seq)
            .expect("write sequence");
    }

    pub fn load(&self) -> Sequence {
        self.workspace
            .sequence_store()
            .read_strict()
            .expect("read sequence")
    }

    /// Config where every model runs the prompt text as a `sh -c` script.
    pub fn shell_config() -> EngineConfig {
        let sh = CommandTemplate::new("sh", &["-c", "{prompt}"]);
        EngineConfig::default()
            .with_template(Model::ClaudeCode, sh.clone())
            .with_template(Model::Codex, sh.clone())
            .with_template(Model::Gemini, sh)
    }

    pub fn orchestrator(&self, config: EngineConfig) -> Orchestrator {
        self.orchestrator_with(config, Arc::new(UnreachableBackend))
    }

    pub fn orchestrator_with(
        &self,
        config: EngineConfig,
        backend: Arc<dyn ProcessBackend>,
    ) -> Orchestrator {
        Orchestrator::new(self.workspace.clone(), config, backend, self.audit.clone())
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
