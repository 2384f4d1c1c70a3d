// src/config/validate.rs

use std::collections::BTreeMap;

use crate::config::model::{EngineConfig, RawEngineConfig};
use crate::errors::{FieldViolation, SeqError};
use crate::types::Model;

impl TryFrom<RawEngineConfig> for EngineConfig {
    type Error = SeqError;

    fn try_from(raw: RawEngineConfig) -> std::result::Result<Self, Self::Error> {
        let mut violations = Vec::new();

        if raw.default_timeout_ms == 0 {
            violations.push(FieldViolation::new("default_timeout_ms", "must be > 0"));
        }
        if raw.actor.trim().is_empty() {
            violations.push(FieldViolation::new("actor", "must not be empty"));
        }

        let mut models = BTreeMap::new();
        for (name, template) in raw.models {
            let field = format!("models.{name}");
            match name.parse::<Model>() {
                Ok(model) => {
                    if template.program.trim().is_empty() {
                        violations.push(FieldViolation::new(
                            format!("{field}.program"),
                            "must not be empty",
                        ));
                    }
                    models.insert(model, template);
                }
                Err(_) => violations.push(FieldViolation::new(
                    field,
                    "unknown model (expected claude-code, codex or gemini)",
                )),
            }
        }

        if !violations.is_empty() {
            return Err(SeqError::Validation(violations));
        }

        Ok(EngineConfig::new_unchecked(
            raw.default_timeout_ms,
            raw.kill_grace_ms,
            raw.actor,
            models,
        ))
    }
}
