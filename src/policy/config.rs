// src/policy/config.rs

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{FieldViolation, Result, SeqError};
use crate::fs::read_optional;
use crate::types::{ActionType, PolicyMode};

/// Execution policy, read from `.seqdag/policy.toml`.
///
/// ```toml
/// mode = "POWER"
/// allowed_commands = ["claude", "codex"]
/// forbidden_patterns = ["\\bsudo\\b"]
/// allowed_paths = ["./**"]
/// max_fanout = 8
/// max_concurrent = 4
/// require_confirmation = ["run-all"]
/// ```
///
/// Every key is optional; a missing file means the SAFE defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    #[serde(default)]
    pub mode: PolicyMode,

    /// First command token must match one of these (empty = any command).
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    /// Case-insensitive regular expressions matched against the full command.
    #[serde(default = "default_forbidden_patterns")]
    pub forbidden_patterns: Vec<String>,

    /// Working-directory roots, relative to the workspace root
    /// (`./**` = anywhere under it). Empty = unrestricted.
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,

    #[serde(default = "default_max_fanout")]
    pub max_fanout: u32,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    /// Action types that always need confirmation, whatever the mode.
    #[serde(default)]
    pub require_confirmation: Vec<ActionType>,
}

fn default_allowed_commands() -> Vec<String> {
    ["claude", "codex", "gemini"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_forbidden_patterns() -> Vec<String> {
    [
        r"\brm\s+-[a-z]*r[a-z]*\s+/(\s|$)",
        r"\bsudo\b",
        r"\bmkfs(\.\w+)?\b",
        r"\bdd\s+if=",
        r"\b(curl|wget)\b[^|]*\|\s*(ba|z)?sh\b",
        r"chmod\s+-R\s+777\s+/",
        r":\(\)\s*\{",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_paths() -> Vec<String> {
    vec!["./**".to_string()]
}

fn default_max_fanout() -> u32 {
    8
}

fn default_max_concurrent() -> u32 {
    4
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            allowed_commands: default_allowed_commands(),
            forbidden_patterns: default_forbidden_patterns(),
            allowed_paths: default_allowed_paths(),
            max_fanout: default_max_fanout(),
            max_concurrent: default_max_concurrent(),
            require_confirmation: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match read_optional(path)? {
            Some(contents) => toml::from_str::<PolicyConfig>(&contents)?,
            None => {
                debug!(?path, "no policy file; using SAFE defaults");
                PolicyConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();

        if self.max_fanout == 0 {
            violations.push(FieldViolation::new("max_fanout", "must be >= 1"));
        }
        if self.max_concurrent == 0 {
            violations.push(FieldViolation::new("max_concurrent", "must be >= 1"));
        }
        for (i, pattern) in self.forbidden_patterns.iter().enumerate() {
            if let Err(e) = regex::Regex::new(pattern) {
                violations.push(FieldViolation::new(
                    format!("forbidden_patterns[{i}]"),
                    e.to_string(),
                ));
            }
        }
        for (i, entry) in self.allowed_commands.iter().enumerate() {
            if entry.trim().is_empty() {
                violations.push(FieldViolation::new(
                    format!("allowed_commands[{i}]"),
                    "must not be empty",
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(SeqError::Validation(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_safe_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PolicyConfig::load(dir.path().join("policy.toml")).unwrap();
        assert_eq!(cfg, PolicyConfig::default());
        assert_eq!(cfg.mode, PolicyMode::Safe);
        assert!(!cfg.forbidden_patterns.is_empty());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        std::fs::write(
            &path,
            "mode = \"POWER\"\nmax_concurrent = 2\nrequire_confirmation = [\"run-all\"]\n",
        )
        .unwrap();

        let cfg = PolicyConfig::load(&path).unwrap();
        assert_eq!(cfg.mode, PolicyMode::Power);
        assert_eq!(cfg.max_concurrent, 2);
        assert_eq!(cfg.max_fanout, 8);
        assert_eq!(cfg.require_confirmation, vec![ActionType::RunAll]);
    }

    #[test]
    fn bad_regex_is_a_validation_error() {
        let cfg = PolicyConfig {
            forbidden_patterns: vec!["(unclosed".into()],
            ..PolicyConfig::default()
        };
        match cfg.validate() {
            Err(SeqError::Validation(v)) => assert_eq!(v[0].field, "forbidden_patterns[0]"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
