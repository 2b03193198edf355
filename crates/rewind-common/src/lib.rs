//! Shared utilities for rewind crates
//!
//! - [`json_store`]: crash-safe JSON files (write to a sibling temp file, fsync, rename)
//! - [`di`]: distributed service registration collected through `inventory`

#![warn(missing_docs)]

pub mod di;
pub mod json_store;

pub use json_store::{load_json, load_json_or_default, save_json_atomic, JsonStoreError, JsonStoreResult};
