// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::exec::CommandTemplate;
use crate::types::Model;

pub const DEFAULT_TIMEOUT_MS: u64 = 30 * 60 * 1000;
pub const DEFAULT_KILL_GRACE_MS: u64 = 5_000;
pub const DEFAULT_ACTOR: &str = "cli";

/// Engine settings exactly as written in `config.toml`.
///
/// ```toml
/// default_timeout_ms = 600000
/// actor = "ci"
///
/// [models.codex]
/// program = "/opt/codex/bin/codex"
/// args = ["exec", "--file", "{prompt_file}"]
/// ```
///
/// Every key is optional. Model names are kept as strings here and checked
/// when converting into [`EngineConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Recorded as the actor of every audit event.
    #[serde(default = "default_actor")]
    pub actor: String,

    #[serde(default)]
    pub models: BTreeMap<String, CommandTemplate>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_kill_grace_ms() -> u64 {
    DEFAULT_KILL_GRACE_MS
}

fn default_actor() -> String {
    DEFAULT_ACTOR.to_string()
}

impl Default for RawEngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            actor: default_actor(),
            models: BTreeMap::new(),
        }
    }
}

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    pub kill_grace_ms: u64,
    pub actor: String,
    models: BTreeMap<Model, CommandTemplate>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new_unchecked(
            DEFAULT_TIMEOUT_MS,
            DEFAULT_KILL_GRACE_MS,
            DEFAULT_ACTOR.to_string(),
            BTreeMap::new(),
        )
    }
}

impl EngineConfig {
    pub(crate) fn new_unchecked(
        default_timeout_ms: u64,
        kill_grace_ms: u64,
        actor: String,
        models: BTreeMap<Model, CommandTemplate>,
    ) -> Self {
        Self {
            default_timeout_ms,
            kill_grace_ms,
            actor,
            models,
        }
    }

    /// Command template for `model`: the configured override, else the
    /// built-in one.
    pub fn template_for(&self, model: Model) -> CommandTemplate {
        self.models
            .get(&model)
            .cloned()
            .unwrap_or_else(|| CommandTemplate::default_for(model))
    }

    /// Replace the template for one model.
    pub fn with_template(mut self, model: Model, template: CommandTemplate) -> Self {
        self.models.insert(model, template);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}
