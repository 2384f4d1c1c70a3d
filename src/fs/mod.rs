// src/fs/mod.rs

//! Crash-safe file writes.
//!
//! Content goes to a temporary file next to the target, is flushed to disk
//! and is then renamed over the target. The rename is the only mutation of
//! the target, so readers see either the old or the new document, never a
//! torn one. If anything fails before the rename the temporary file is
//! removed and the target is untouched.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Atomically replace `path` with `contents`, creating parent directories.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating dir {:?}", dir))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".seqdag-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {:?}", dir))?;

    tmp.write_all(contents)
        .with_context(|| format!("writing temp file for {:?}", path))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {:?}", path))?;

    // On failure the returned NamedTempFile is dropped, which deletes it.
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("renaming temp file over {:?}", path))?;

    Ok(())
}

/// Read a file, mapping "does not exist" to `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading file {:?}", path)),
    }
}
