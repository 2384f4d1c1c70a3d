// src/sequence/store.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tracing::{debug, warn};

use crate::errors::{FieldViolation, Result, SeqError};
use crate::fs::{read_optional, write_atomic};
use crate::sequence::model::Sequence;

/// Loads and persists one sequence document.
///
/// Mutations go through [`SequenceStore::update`], which holds the store's
/// writer lock for the whole read-modify-write and refuses to rename over a
/// document that changed on disk since it was read. Clones share the lock.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    path: PathBuf,
    writer: Arc<Mutex<()>>,
}

/// Raw document contents plus their digest.
struct Snapshot {
    contents: Option<String>,
    digest: Option<blake3::Hash>,
}

impl SequenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let contents = read_optional(&self.path)?;
        let digest = contents.as_ref().map(|c| blake3::hash(c.as_bytes()));
        Ok(Snapshot { contents, digest })
    }

    /// Tolerant read.
    ///
    /// - missing document: default empty sequence
    /// - unparseable TOML: error
    /// - parseable but invalid against the schema: default empty sequence,
    ///   with every violation logged at WARN
    pub fn read(&self) -> Result<Sequence> {
        let Some(contents) = self.snapshot()?.contents else {
            return Ok(Sequence::default());
        };

        match parse_strict(&contents) {
            Ok(seq) => Ok(seq),
            Err(SeqError::Validation(violations)) => {
                warn!(
                    path = ?self.path,
                    ?violations,
                    "sequence document is invalid; falling back to an empty sequence"
                );
                Ok(Sequence::default())
            }
            Err(SeqError::CircularDependency(cycle)) => {
                warn!(
                    path = ?self.path,
                    ?cycle,
                    "sequence document contains a cycle; falling back to an empty sequence"
                );
                Ok(Sequence::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Strict read: schema and cycle violations are errors.
    pub fn read_strict(&self) -> Result<Sequence> {
        match self.snapshot()?.contents {
            Some(contents) => parse_strict(&contents),
            None => Ok(Sequence::default()),
        }
    }

    /// Validate and atomically write `seq`.
    pub fn write(&self, seq: &Sequence) -> Result<()> {
        let _guard = self.lock()?;
        self.write_unlocked(seq, None)
    }

    /// Read-modify-write under the writer lock.
    ///
    /// `f` mutates a freshly read sequence; its result is validated and
    /// written only if `f` succeeds. Nothing is written when `f` fails.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Sequence) -> Result<T>,
    {
        let _guard = self.lock()?;

        let snapshot = self.snapshot()?;
        let mut seq = match &snapshot.contents {
            Some(contents) => parse_strict(contents)?,
            None => Sequence::default(),
        };

        let out = f(&mut seq)?;
        self.write_unlocked(&seq, Some(&snapshot))?;
        Ok(out)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|_| SeqError::Other(anyhow!("sequence writer lock poisoned")))
    }

    fn write_unlocked(&self, seq: &Sequence, base: Option<&Snapshot>) -> Result<()> {
        seq.validate()?;
        let rendered = toml::to_string_pretty(seq)?;

        if let Some(base) = base {
            let current = self.snapshot()?.digest;
            if current != base.digest {
                return Err(SeqError::ConcurrentModification(format!("{:?}", self.path)));
            }
        }

        write_atomic(&self.path, rendered.as_bytes())?;
        debug!(
            path = ?self.path,
            steps = seq.steps.len(),
            gates = seq.gates.len(),
            "sequence written"
        );
        Ok(())
    }
}

/// Parse a document: syntax errors are hard failures, shape and schema
/// problems come back as `Validation`, cycles as `CircularDependency`.
fn parse_strict(contents: &str) -> Result<Sequence> {
    let table: toml::Table = toml::from_str(contents)?;
    let seq: Sequence = toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| {
            SeqError::Validation(vec![FieldViolation::new("document", e.message())])
        })?;
    seq.validate()?;
    Ok(seq)
}
