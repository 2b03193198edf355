//! JSON persistence utilities
//!
//! Durable stores in this workspace keep their whole state in a single JSON
//! document. Readers must never observe a half-written document, so saves go
//! through a temp file in the destination directory that is synced and then
//! renamed over the target.

use serde::{de::DeserializeOwned, Serialize};
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// JSON store errors
#[derive(Debug, Error)]
pub enum JsonStoreError {
    /// Reading or writing the file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Contents are not valid JSON for the target type
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// No file at `path`
    #[error("File not found: {path}")]
    NotFound {
        /// Requested location
        path: String,
    },

    /// The temp file could not be renamed over the target
    #[error("Could not persist {path}: {source}")]
    Persist {
        /// Target location
        path: String,
        /// Rename failure
        #[source]
        source: std::io::Error,
    },
}

/// Result type for JSON store operations
pub type JsonStoreResult<T> = Result<T, JsonStoreError>;

/// Load JSON from a file path
pub fn load_json<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(JsonStoreError::NotFound {
            path: path.display().to_string(),
        });
    }
    let bytes = std::fs::read(path)?;
    let value = serde_json::from_slice(&bytes)?;
    Ok(value)
}

/// Load JSON from file, returning default if file doesn't exist
pub fn load_json_or_default<T, P>(path: P) -> JsonStoreResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    match load_json(path) {
        Ok(value) => Ok(value),
        Err(JsonStoreError::NotFound { .. }) => Ok(T::default()),
        Err(e) => Err(e),
    }
}

/// Save value as JSON atomically.
///
/// The document is written to a temp file next to `path`, flushed to disk and
/// renamed into place. Either the previous document or the new one is visible
/// afterwards, never a prefix of the new one.
pub fn save_json_atomic<T, P>(path: P, value: &T) -> JsonStoreResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)?;

    let content = serde_json::to_vec(value)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
    temp.write_all(&content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| JsonStoreError::Persist {
        path: path.display().to_string(),
        source: e.error,
    })?;

    debug!(path = %path.display(), bytes = content.len(), "saved json document");
    Ok(())
}
