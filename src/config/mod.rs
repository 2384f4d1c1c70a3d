// src/config/mod.rs

//! Engine settings (`.seqdag/config.toml`).
//!
//! - `model.rs`: raw TOML shape and the validated [`EngineConfig`].
//! - `loader.rs`: read from disk, falling back to defaults.
//! - `validate.rs`: raw -> validated conversion.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{EngineConfig, RawEngineConfig};
