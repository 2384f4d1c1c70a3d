// src/policy/engine.rs

//! Policy evaluation.
//!
//! Checks run in a fixed order and the first denial wins:
//!
//! 1. command allowlist
//! 2. forbidden patterns (deny even when allowlisted)
//! 3. working-directory roots
//! 4. fan-out limit
//! 5. concurrency limit
//!
//! An allowed action may still need confirmation: when its type is listed in
//! `require_confirmation`, or when the mode is SAFE and the action executes
//! something.

use std::path::{Component, Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::errors::{Result, SeqError};
use crate::policy::config::PolicyConfig;
use crate::types::{ActionType, PolicyMode};

/// An action proposed for evaluation.
#[derive(Debug, Clone)]
pub struct PolicyAction {
    pub action_type: ActionType,
    /// Full command line, program first.
    pub command: Option<String>,
    /// Working directory, absolute or relative to the workspace root.
    pub cwd: Option<PathBuf>,
    /// Number of parallel executions requested.
    pub fanout: Option<u32>,
    /// Executions already active when this one would start.
    pub concurrency: Option<u32>,
}

impl PolicyAction {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            command: None,
            cwd: None,
            fanout: None,
            concurrency: None,
        }
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn fanout(mut self, fanout: u32) -> Self {
        self.fanout = Some(fanout);
        self
    }

    pub fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = Some(concurrency);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub confirmation_required: bool,
}

impl PolicyDecision {
    fn deny(reason: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            confirmation_required: false,
        }
    }
}

/// A loaded policy with its patterns compiled.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
    forbidden: Vec<Regex>,
    base_dir: PathBuf,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, base_dir: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;

        let forbidden = config
            .forbidden_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| SeqError::validation("forbidden_patterns", e.to_string()))?;

        Ok(Self {
            config,
            forbidden,
            base_dir: base_dir.into(),
        })
    }

    /// Load the policy file fresh; changes apply on the next call.
    pub fn load(path: impl AsRef<Path>, base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::new(PolicyConfig::load(path)?, base_dir)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn evaluate(&self, action: &PolicyAction) -> PolicyDecision {
        if let Some(reason) = self.denial(action) {
            info!(
                action = %action.action_type,
                command = ?action.command,
                reason = %reason,
                "policy denied action"
            );
            return PolicyDecision::deny(reason);
        }

        let confirmation_required = self
            .config
            .require_confirmation
            .contains(&action.action_type)
            || (self.config.mode == PolicyMode::Safe && action.action_type.is_execution());

        debug!(
            action = %action.action_type,
            confirmation_required,
            "policy allowed action"
        );

        PolicyDecision {
            allowed: true,
            reason: None,
            confirmation_required,
        }
    }

    /// Evaluate and turn a denial, or a missing confirmation, into an error.
    pub fn enforce(&self, action: &PolicyAction, confirmed: bool) -> Result<PolicyDecision> {
        let decision = self.evaluate(action);
        if !decision.allowed {
            return Err(SeqError::PolicyDenied(
                decision.reason.unwrap_or_else(|| "denied".to_string()),
            ));
        }
        if decision.confirmation_required && !confirmed {
            return Err(SeqError::ConfirmationRequired(action.action_type.to_string()));
        }
        Ok(decision)
    }

    fn denial(&self, action: &PolicyAction) -> Option<String> {
        if let Some(command) = &action.command {
            if let Some(reason) = self.check_allowlist(command) {
                return Some(reason);
            }
            if let Some(pattern) = self.forbidden.iter().find(|re| re.is_match(command)) {
                return Some(format!(
                    "command matches forbidden pattern '{}'",
                    pattern.as_str()
                ));
            }
        }

        if let Some(cwd) = &action.cwd {
            if !self.cwd_allowed(cwd) {
                return Some(format!(
                    "working directory {:?} is outside the allowed paths",
                    cwd
                ));
            }
        }

        if let Some(fanout) = action.fanout {
            if fanout > self.config.max_fanout {
                return Some(format!(
                    "fan-out {fanout} exceeds maximum {}",
                    self.config.max_fanout
                ));
            }
        }

        if let Some(active) = action.concurrency {
            if active >= self.config.max_concurrent {
                return Some(format!(
                    "{active} executions already active (maximum {})",
                    self.config.max_concurrent
                ));
            }
        }

        None
    }

    fn check_allowlist(&self, command: &str) -> Option<String> {
        if self.config.allowed_commands.is_empty() {
            return None;
        }
        let Some(program) = command.split_whitespace().next() else {
            return Some("empty command".to_string());
        };

        let allowed = self
            .config
            .allowed_commands
            .iter()
            .any(|entry| program == entry || Path::new(program).ends_with(entry));

        if allowed {
            None
        } else {
            Some(format!("command '{program}' is not in the allowlist"))
        }
    }

    fn cwd_allowed(&self, cwd: &Path) -> bool {
        if self.config.allowed_paths.is_empty() {
            return true;
        }

        let target = resolve(&self.base_dir.join(cwd));
        self.config.allowed_paths.iter().any(|pattern| {
            let root = pattern.trim_end_matches("**").trim_end_matches('/');
            let root = if root.is_empty() { "." } else { root };
            target.starts_with(resolve(&self.base_dir.join(root)))
        })
    }
}

/// Lexically normalise, then canonicalise the longest existing ancestor and
/// re-append the rest, so symlinks resolve the same way whether or not the
/// leaf exists yet.
fn resolve(path: &Path) -> PathBuf {
    let mut normal = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }

    let mut missing = Vec::new();
    let mut existing = normal.as_path();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(cfg: PolicyConfig) -> PolicyEngine {
        PolicyEngine::new(cfg, "/work/project").unwrap()
    }

    fn run(cmd: &str) -> PolicyAction {
        PolicyAction::new(ActionType::RunStep).command(cmd)
    }

    #[test]
    fn allowlist_matches_name_or_path_suffix() {
        let e = engine(PolicyConfig::default());
        assert!(e.evaluate(&run("claude -p hi")).allowed);
        assert!(e.evaluate(&run("/usr/local/bin/codex exec x")).allowed);
        assert!(!e.evaluate(&run("xclaude -p hi")).allowed);
        assert!(!e.evaluate(&run("python script.py")).allowed);
    }

    #[test]
    fn forbidden_pattern_beats_allowlist() {
        let cfg = PolicyConfig {
            allowed_commands: vec!["sudo".into()],
            ..PolicyConfig::default()
        };
        let d = engine(cfg).evaluate(&run("sudo ls"));
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("forbidden"));

        let cfg = PolicyConfig {
            allowed_commands: vec!["claude".into()],
            ..PolicyConfig::default()
        };
        let d = engine(cfg).evaluate(&run("claude -p 'then SUDO reboot'"));
        assert!(!d.allowed);
        assert!(d.reason.unwrap().contains("forbidden"));
    }

    #[test]
    fn working_directory_roots() {
        let cfg = PolicyConfig {
            allowed_paths: vec!["./src/**".into(), "/tmp/scratch".into()],
            ..PolicyConfig::default()
        };
        let e = engine(cfg);
        let at = |cwd: &str| e.evaluate(&PolicyAction::new(ActionType::RunStep).cwd(cwd));

        assert!(at("src").allowed);
        assert!(at("src/deep/er").allowed);
        assert!(at("/tmp/scratch/x").allowed);
        assert!(!at(".").allowed);
        assert!(!at("src/../docs").allowed);
        assert!(!at("/etc").allowed);
    }

    #[test]
    fn default_paths_cover_base_dir_only() {
        let e = engine(PolicyConfig::default());
        let at = |cwd: &str| e.evaluate(&PolicyAction::new(ActionType::RunStep).cwd(cwd));
        assert!(at(".").allowed);
        assert!(at("a/b").allowed);
        assert!(!at("../other").allowed);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_base_matches_missing_and_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(real.join("src")).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let cfg = PolicyConfig {
            allowed_paths: vec!["./src/**".into()],
            ..PolicyConfig::default()
        };
        let e = PolicyEngine::new(cfg, link.clone()).unwrap();
        let at = |cwd: &str| e.evaluate(&run("claude -p x").cwd(cwd)).allowed;

        assert!(at("src"));
        assert!(at("src/not/created/yet"));
        assert!(!at("docs/not/created"));

        assert_eq!(
            resolve(&link.join("src/new/leaf")),
            std::fs::canonicalize(&real).unwrap().join("src/new/leaf")
        );
    }

    #[test]
    fn fanout_and_concurrency_limits() {
        let cfg = PolicyConfig {
            max_fanout: 3,
            max_concurrent: 2,
            ..PolicyConfig::default()
        };
        let e = engine(cfg);
        let a = || PolicyAction::new(ActionType::RunAll);

        assert!(e.evaluate(&a().fanout(3)).allowed);
        assert!(!e.evaluate(&a().fanout(4)).allowed);
        assert!(e.evaluate(&a().concurrency(1)).allowed);
        assert!(!e.evaluate(&a().concurrency(2)).allowed);
    }

    #[test]
    fn confirmation_by_mode() {
        let safe = engine(PolicyConfig::default());
        assert!(safe.evaluate(&run("claude")).confirmation_required);
        assert!(
            !safe
                .evaluate(&PolicyAction::new(ActionType::ApproveGate))
                .confirmation_required
        );

        let power = engine(PolicyConfig {
            mode: PolicyMode::Power,
            require_confirmation: vec![ActionType::ApproveGate],
            ..PolicyConfig::default()
        });
        assert!(!power.evaluate(&run("claude")).confirmation_required);
        assert!(
            power
                .evaluate(&PolicyAction::new(ActionType::ApproveGate))
                .confirmation_required
        );
    }

    #[test]
    fn enforce_maps_to_errors() {
        let safe = engine(PolicyConfig::default());
        assert!(matches!(
            safe.enforce(&run("claude"), false),
            Err(SeqError::ConfirmationRequired(_))
        ));
        assert!(safe.enforce(&run("claude"), true).is_ok());
        assert!(matches!(
            safe.enforce(&run("sudo claude"), true),
            Err(SeqError::PolicyDenied(_))
        ));
    }
}
