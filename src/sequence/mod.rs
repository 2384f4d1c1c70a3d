// src/sequence/mod.rs

//! The sequence document: data model, validation, mutations and storage.

pub mod model;
pub mod mutate;
pub mod store;
pub mod validate;

pub use model::{Gate, NodeRef, SEQUENCE_VERSION, Sequence, Step};
pub use mutate::StepPatch;
pub use store::SequenceStore;
