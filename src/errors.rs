// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Every failure surfaced by the engine maps onto one [`ErrorKind`], which is
//! what callers switch on. [`SeqError::to_payload`] renders the structured
//! error payload handed to untrusted callers.

use serde::Serialize;
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    CircularDependency,
    PolicyDenied,
    ProcessTimeout,
    Internal,
}

#[derive(Error, Debug)]
pub enum SeqError {
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<FieldViolation>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("'{id}' cannot be removed; depended on by {dependents:?}")]
    HasDependents { id: String, dependents: Vec<String> },

    #[error("step '{id}' is not runnable (status {status})")]
    NotRunnable { id: String, status: String },

    #[error("sequence document changed on disk during update: {0}")]
    ConcurrentModification(String),

    #[error("circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    #[error("confirmation required for {0}")]
    ConfirmationRequired(String),

    #[error("process backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("step '{step}' timed out after {timeout_ms} ms")]
    ProcessTimeout { step: String, timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialisation error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_violations(v: &[FieldViolation]) -> String {
    v.iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl SeqError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SeqError::Validation(vec![FieldViolation::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SeqError::Validation(_) => ErrorKind::Validation,
            SeqError::NotFound(_) => ErrorKind::NotFound,
            SeqError::Conflict(_)
            | SeqError::HasDependents { .. }
            | SeqError::NotRunnable { .. }
            | SeqError::ConcurrentModification(_) => ErrorKind::Conflict,
            SeqError::CircularDependency(_) => ErrorKind::CircularDependency,
            SeqError::PolicyDenied(_) | SeqError::ConfirmationRequired(_) => {
                ErrorKind::PolicyDenied
            }
            SeqError::ProcessTimeout { .. } => ErrorKind::ProcessTimeout,
            SeqError::BackendUnavailable(_)
            | SeqError::Io(_)
            | SeqError::TomlDe(_)
            | SeqError::TomlSer(_)
            | SeqError::Json(_)
            | SeqError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Structured payload for callers.
    ///
    /// Internal errors carry filesystem paths and library detail; unless
    /// `expose_internal` is set they are reduced to a generic message.
    pub fn to_payload(&self, expose_internal: bool) -> ErrorPayload {
        let kind = self.kind();
        let message = if kind == ErrorKind::Internal && !expose_internal {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        ErrorPayload {
            kind,
            message,
            violations: match self {
                SeqError::Validation(v) => Some(v.clone()),
                _ => None,
            },
            cycle: match self {
                SeqError::CircularDependency(c) => Some(c.clone()),
                _ => None,
            },
        }
    }
}

/// Serialisable error handed back to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<FieldViolation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<Vec<String>>,
}

pub type Result<T> = std::result::Result<T, SeqError>;
