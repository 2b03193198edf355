//! Undo log configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::blob::BlobOptions;
use crate::error::UndoRedoError;

/// Configuration for undo managers and their log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    /// Longest accepted action description, in characters
    pub max_description_len: usize,
    /// Largest accepted encoded snapshot blob, in bytes
    pub max_blob_bytes: usize,
    /// Zlib-compress snapshot blobs
    pub compress_snapshots: bool,
    /// JSON file holding the durable log; in-memory when unset
    pub log_path: Option<PathBuf>,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_description_len: 100,
            max_blob_bytes: 5 * 1024 * 1024,
            compress_snapshots: true,
            log_path: None,
        }
    }
}

impl UndoConfig {
    /// Load from a JSON file, using defaults when the file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, UndoRedoError> {
        let config: UndoConfig = rewind_common::load_json_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no log can work with
    pub fn validate(&self) -> Result<(), UndoRedoError> {
        if self.max_description_len == 0 {
            return Err(UndoRedoError::validation_error(
                "max_description_len must be at least 1",
            ));
        }
        if self.max_blob_bytes == 0 {
            return Err(UndoRedoError::validation_error("max_blob_bytes must be at least 1"));
        }
        Ok(())
    }

    pub(crate) fn blob_options(&self) -> BlobOptions {
        BlobOptions {
            compress: self.compress_snapshots,
            max_bytes: self.max_blob_bytes,
        }
    }
}
