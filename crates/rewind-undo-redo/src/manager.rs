//! Undo manager: the action list and its cursor
//!
//! Actions and the cursor live in the [`UndoLog`]; the manager reads them
//! back on every call, so any number of handles opened on the same manager
//! id agree on the history.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::action::Action;
use crate::config::UndoConfig;
use crate::entity::{Entity, EntityId};
use crate::error::{FieldError, UndoRedoError};
use crate::log::{ActionRow, LogTables, UndoLog};
use crate::record::Record;
use crate::recorder::Recorder;
use crate::revision::TruncateOptions;
use crate::store::{EntityStore, MutationObserver};

/// Result of one undo or redo step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Description of the action that ran
    pub description: String,
    /// Non-fatal problems met while restoring snapshots
    pub field_errors: Vec<FieldError>,
}

/// Linear undo/redo history over an entity store
pub struct UndoManager {
    id: u64,
    store: Arc<dyn EntityStore>,
    log: Arc<UndoLog>,
    config: UndoConfig,
    recorder: Arc<Recorder>,
}

fn cursor_of(tables: &LogTables, manager_id: u64) -> Result<Option<usize>, UndoRedoError> {
    let row = tables
        .manager(manager_id)
        .ok_or(UndoRedoError::ManagerNotFound(manager_id))?;
    Ok(usize::try_from(row.current_action_index).ok())
}

impl UndoManager {
    /// Create a manager with an empty history
    pub fn new(store: Arc<dyn EntityStore>, log: Arc<UndoLog>, config: UndoConfig) -> Result<Self, UndoRedoError> {
        config.validate()?;
        let row = log.write(|tables| Ok(tables.insert_manager()))?;
        info!(manager_id = row.id, "undo manager created");
        Ok(Self::with_id(row.id, store, log, config))
    }

    /// Reopen a manager stored in `log`
    pub fn open(
        id: u64,
        store: Arc<dyn EntityStore>,
        log: Arc<UndoLog>,
        config: UndoConfig,
    ) -> Result<Self, UndoRedoError> {
        config.validate()?;
        let cursor = log.read(|tables| cursor_of(tables, id))?;
        debug!(manager_id = id, ?cursor, "undo manager reopened");
        Ok(Self::with_id(id, store, log, config))
    }

    fn with_id(id: u64, store: Arc<dyn EntityStore>, log: Arc<UndoLog>, config: UndoConfig) -> Self {
        Self {
            id,
            store,
            log,
            config,
            recorder: Arc::new(Recorder::new()),
        }
    }

    /// Delete this manager with all of its actions and records
    pub fn destroy(self) -> Result<(), UndoRedoError> {
        self.log.write(|tables| tables.delete_manager(self.id))?;
        info!(manager_id = self.id, "undo manager destroyed");
        Ok(())
    }

    /// Row id of this manager in the log
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Log holding this manager's history
    pub fn log(&self) -> &Arc<UndoLog> {
        &self.log
    }

    /// Store that undo and redo write to
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Observer to register with the store so its mutations reach this manager
    pub fn recorder(&self) -> Arc<Recorder> {
        Arc::clone(&self.recorder)
    }

    /// Record every mutation `block` makes as one new action.
    ///
    /// Actions after the cursor are discarded first. If `block` fails, or
    /// a mutation could not be snapshotted, nothing is appended and the
    /// error is returned. Store writes the block already made are not
    /// reverted here.
    pub fn change<F>(&self, description: impl Into<String>, block: F) -> Result<Action, UndoRedoError>
    where
        F: FnOnce() -> Result<(), UndoRedoError>,
    {
        self.change_with_error(description, block)
    }

    /// [`change`](Self::change) for blocks that fail with the host's own
    /// error type. The block's error comes back unchanged; log and
    /// validation failures are converted with `E::from`.
    pub fn change_with_error<F, E>(&self, description: impl Into<String>, block: F) -> Result<Action, E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<UndoRedoError>,
    {
        let description = description.into();
        let length = description.chars().count();
        if length > self.config.max_description_len {
            return Err(E::from(UndoRedoError::validation_error(format!(
                "description is {length} characters, at most {} allowed",
                self.config.max_description_len
            ))));
        }

        let guard = self.recorder.open()?;
        block().inspect_err(|_| {
            warn!(manager_id = self.id, %description, "change block failed; nothing recorded");
        })?;
        let pending = guard.finish()?;

        let options = self.config.blob_options();
        let action = self.log.write(|tables| {
            let next = cursor_of(tables, self.id)?.map_or(0, |cursor| cursor + 1);
            let pruned: Vec<u64> = tables
                .actions_of(self.id)
                .into_iter()
                .filter(|row| row.ordinal >= next)
                .map(|row| row.id)
                .collect();
            if !pruned.is_empty() {
                debug!(manager_id = self.id, pruned = pruned.len(), "discarding redo branch");
            }
            for action_id in pruned {
                tables.delete_action(action_id);
            }

            let action = Action::record_mutations(tables, self.id, description, next, &pending, options)?;
            tables.set_cursor(self.id, next as i64)?;
            Ok(action)
        })?;

        info!(
            manager_id = self.id,
            action_id = action.id,
            description = %action.description,
            records = action.records.len(),
            "change recorded"
        );
        Ok(action)
    }

    /// Undo the action at the cursor; `None` when there is nothing to undo
    pub fn undo(&self) -> Result<Option<StepOutcome>, UndoRedoError> {
        self.reject_while_recording()?;
        let Some((cursor, action)) = self.log.read(|tables| -> Result<_, UndoRedoError> {
            let Some(cursor) = cursor_of(tables, self.id)? else {
                return Ok(None);
            };
            Ok(self.action_at(tables, cursor).map(|action| (cursor, action)))
        })?
        else {
            debug!(manager_id = self.id, "nothing to undo");
            return Ok(None);
        };

        let field_errors = action.undo(self.store.as_ref(), &self.log)?;
        self.log
            .write(|tables| tables.set_cursor(self.id, cursor as i64 - 1))?;
        info!(manager_id = self.id, action_id = action.id, description = %action.description, "undone");
        Ok(Some(outcome(action, field_errors)))
    }

    /// Redo the action after the cursor; `None` when there is nothing to redo
    pub fn redo(&self) -> Result<Option<StepOutcome>, UndoRedoError> {
        self.reject_while_recording()?;
        let Some((next, action)) = self.log.read(|tables| -> Result<_, UndoRedoError> {
            let next = cursor_of(tables, self.id)?.map_or(0, |cursor| cursor + 1);
            Ok(self.action_at(tables, next).map(|action| (next, action)))
        })?
        else {
            debug!(manager_id = self.id, "nothing to redo");
            return Ok(None);
        };

        let field_errors = action.redo(self.store.as_ref())?;
        self.log.write(|tables| tables.set_cursor(self.id, next as i64))?;
        info!(manager_id = self.id, action_id = action.id, description = %action.description, "redone");
        Ok(Some(outcome(action, field_errors)))
    }

    /// Description of the action [`undo`](Self::undo) would revert
    pub fn undo_description(&self) -> Option<String> {
        self.log.read(|tables| {
            let cursor = cursor_of(tables, self.id).ok()??;
            self.row_at(tables, cursor).map(|row| row.description.clone())
        })
    }

    /// Description of the action [`redo`](Self::redo) would apply
    pub fn redo_description(&self) -> Option<String> {
        self.log.read(|tables| {
            let next = cursor_of(tables, self.id).ok()?.map_or(0, |cursor| cursor + 1);
            self.row_at(tables, next).map(|row| row.description.clone())
        })
    }

    /// Whether an action sits at the cursor
    pub fn can_undo(&self) -> bool {
        self.undo_description().is_some()
    }

    /// Whether an action follows the cursor
    pub fn can_redo(&self) -> bool {
        self.redo_description().is_some()
    }

    /// Index of the last undoable action
    pub fn cursor(&self) -> Result<Option<usize>, UndoRedoError> {
        self.log.read(|tables| cursor_of(tables, self.id))
    }

    /// Every action with its records, oldest first
    pub fn actions(&self) -> Vec<Action> {
        self.log.read(|tables| {
            tables
                .actions_of(self.id)
                .into_iter()
                .map(|row| Action::load(tables, row))
                .collect()
        })
    }

    /// Report a create from a store that does not call an observer itself.
    /// Ignored outside [`change`](Self::change).
    pub fn notify_create(&self, entity: &Entity) {
        self.recorder.on_create(entity, self.store.as_ref());
    }

    /// Report an update; see [`notify_create`](Self::notify_create)
    pub fn notify_update(&self, entity: &Entity) {
        self.recorder.on_update(entity, self.store.as_ref());
    }

    /// Report a destroy; see [`notify_create`](Self::notify_create)
    pub fn notify_destroy(&self, entity: &Entity) {
        self.recorder.on_destroy(entity, self.store.as_ref());
    }

    /// See [`UndoLog::find_revision`]
    pub fn find_revision(&self, entity_type: &str, entity_id: EntityId, revision: u64) -> Result<Record, UndoRedoError> {
        self.log.find_revision(entity_type, entity_id, revision)
    }

    /// See [`UndoLog::truncate_revisions`]
    pub fn truncate_revisions(
        &self,
        entity_type: &str,
        entity_id: EntityId,
        options: TruncateOptions,
    ) -> Result<usize, UndoRedoError> {
        self.log.truncate_revisions(entity_type, entity_id, options)
    }

    fn row_at<'t>(&self, tables: &'t LogTables, ordinal: usize) -> Option<&'t ActionRow> {
        tables.actions_of(self.id).into_iter().find(|row| row.ordinal == ordinal)
    }

    fn action_at(&self, tables: &LogTables, ordinal: usize) -> Option<Action> {
        self.row_at(tables, ordinal).map(|row| Action::load(tables, row))
    }

    fn reject_while_recording(&self) -> Result<(), UndoRedoError> {
        if self.recorder.is_recording() {
            return Err(UndoRedoError::NestedChange);
        }
        Ok(())
    }
}

fn outcome(action: Action, field_errors: Vec<FieldError>) -> StepOutcome {
    StepOutcome {
        description: action.description,
        field_errors,
    }
}

impl std::fmt::Debug for UndoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoManager")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
