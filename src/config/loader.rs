// src/config/loader.rs

use std::path::Path;

use tracing::debug;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::Result;
use crate::fs::read_optional;

/// Parse `config.toml` without semantic checks. A missing file yields the
/// defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawEngineConfig> {
    let path = path.as_ref();
    match read_optional(path)? {
        Some(contents) => Ok(toml::from_str(&contents)?),
        None => {
            debug!(path = ?path, "no engine config; using defaults");
            Ok(RawEngineConfig::default())
        }
    }
}

/// Load and validate the engine settings.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<EngineConfig> {
    EngineConfig::try_from(load_from_path(path)?)
}
