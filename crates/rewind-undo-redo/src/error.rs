//! Error types for the undo/redo system

use thiserror::Error;

use crate::entity::EntityId;

/// Errors raised by an [`EntityStore`](crate::store::EntityStore) adapter
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// No row with this type and id
    #[error("{entity_type} #{id} not found")]
    NotFound {
        /// Type that was looked up
        entity_type: String,
        /// Missing id
        id: EntityId,
    },

    /// A create collided with an existing row
    #[error("{entity_type} #{id} already exists")]
    Duplicate {
        /// Type of the colliding row
        entity_type: String,
        /// Id already taken
        id: EntityId,
    },

    /// The type is not registered in the schema
    #[error("unknown entity type: {0}")]
    UnknownType(String),

    /// Anything else the backing store reports
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a NotFound error
    pub fn not_found(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id,
        }
    }

    /// Create a Backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Errors that can occur in the undo/redo system
#[derive(Debug, Error)]
pub enum UndoRedoError {
    /// A prior revision needed to invert an update does not exist
    #[error("Revision {revision} of {entity_type} #{entity_id} not found")]
    RevisionNotFound {
        /// Type of the entity
        entity_type: String,
        /// Id of the entity
        entity_id: EntityId,
        /// Revision that was looked up
        revision: u64,
    },

    /// Undo manager not present in the log
    #[error("Undo manager not found: {0}")]
    ManagerNotFound(u64),

    /// The (type, id, revision) uniqueness constraint was violated
    #[error("Revision {revision} of {entity_type} #{entity_id} already recorded")]
    DuplicateRevision {
        /// Type of the entity
        entity_type: String,
        /// Id of the entity
        entity_id: EntityId,
        /// Revision already taken
        revision: u64,
    },

    /// Underlying entity store failed; aborts the current step
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Snapshot blob is corrupt, oversized or uses an unknown encoding
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// `change` was entered while another change scope was open
    #[error("A change scope is already open; nested changes are not supported")]
    NestedChange,

    /// The process-wide registry holds no manager
    #[error("No current undo manager; call registry::init first")]
    NoCurrentManager,

    /// Durable log file could not be read or written
    #[error("Log storage error: {0}")]
    LogStorage(#[from] rewind_common::JsonStoreError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl UndoRedoError {
    /// Create a new RevisionNotFound error with context
    pub fn revision_not_found(entity_type: impl Into<String>, entity_id: EntityId, revision: u64) -> Self {
        Self::RevisionNotFound {
            entity_type: entity_type.into(),
            entity_id,
            revision,
        }
    }

    /// Create a new Serialization error with context
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a new ValidationError with context
    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Whether this error is one of the not-found family
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RevisionNotFound { .. }
                | Self::ManagerNotFound(_)
                | Self::Persistence(StoreError::NotFound { .. })
        )
    }
}

impl From<serde_json::Error> for UndoRedoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Non-fatal failure to restore one attribute or association.
///
/// Collected on the restored [`Entity`](crate::entity::Entity) instead of
/// aborting the restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Type of the entity the error is attached to
    pub entity_type: String,
    /// Id of that entity, when known
    pub entity_id: Option<EntityId>,
    /// Attribute or association name
    pub field: String,
    /// What went wrong
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.entity_id {
            Some(id) => write!(f, "{} #{}: {} {}", self.entity_type, id, self.field, self.message),
            None => write!(f, "{}: {} {}", self.entity_type, self.field, self.message),
        }
    }
}
