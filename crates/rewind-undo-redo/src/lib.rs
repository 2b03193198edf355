//! Undo/redo over persisted entities
//!
//! Mutations made inside [`UndoManager::change`] are grouped into one
//! [`Action`]. Each mutation becomes a [`Record`] holding a snapshot of the
//! entity and its undoable associations, numbered with a per-entity revision.
//! Actions form a linear history with a single cursor, stored in a
//! transactional [`UndoLog`].
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rewind_undo_redo::*;
//!
//! let store = Arc::new(InMemoryEntityStore::new(schema));
//! let manager = UndoManager::new(store.clone(), Arc::new(UndoLog::in_memory()), UndoConfig::default())?;
//! store.set_observer(manager.recorder());
//!
//! manager.change("create joe", || {
//!     store.create(&mut Entity::new("Person").with("name", "joe"))?;
//!     Ok(())
//! })?;
//! manager.undo()?;
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod blob;
pub mod config;
pub mod di;
pub mod entity;
pub mod error;
pub mod log;
pub mod manager;
pub mod record;
pub mod recorder;
pub mod registry;
pub mod revision;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export public API
pub use action::Action;
pub use blob::{BlobOptions, BLOB_VERSION};
pub use config::UndoConfig;
pub use entity::{Entity, EntityId, Related};
pub use error::{FieldError, StoreError, UndoRedoError};
pub use log::{ActionRow, JsonFileBackend, LogBackend, LogTables, ManagerRow, MemoryBackend, UndoLog};
pub use manager::{StepOutcome, UndoManager};
pub use record::{Operation, Record};
pub use recorder::Recorder;
pub use registry::CurrentManagerObserver;
pub use revision::TruncateOptions;
pub use schema::{AssociationDescriptor, AttributeKind, Cardinality, EntityType, InclusionSpec, Schema};
pub use snapshot::{split_by_association, Snapshot, SnapshotCodec, ID_KEY};
pub use store::{EntityStore, InMemoryEntityStore, MutationObserver};
