//! Process-wide current undo manager
//!
//! Hosts that want a single shared history call [`init`] once at startup and
//! wire [`CurrentManagerObserver`] into their store. Tests swap managers with
//! [`set`] and [`clear`]. The free functions act on whichever manager is
//! current when they are called.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::action::Action;
use crate::entity::Entity;
use crate::error::UndoRedoError;
use crate::manager::{StepOutcome, UndoManager};
use crate::store::{EntityStore, MutationObserver};

static CURRENT: Lazy<RwLock<Option<Arc<UndoManager>>>> = Lazy::new(|| RwLock::new(None));

/// Install the first current manager; fails if one is already installed
pub fn init(manager: Arc<UndoManager>) -> Result<(), UndoRedoError> {
    let mut current = CURRENT.write();
    if let Some(existing) = current.as_ref() {
        return Err(UndoRedoError::validation_error(format!(
            "undo manager {} is already current",
            existing.id()
        )));
    }
    debug!(manager_id = manager.id(), "current undo manager initialised");
    *current = Some(manager);
    Ok(())
}

/// Replace the current manager, returning the previous one
pub fn set(manager: Arc<UndoManager>) -> Option<Arc<UndoManager>> {
    debug!(manager_id = manager.id(), "current undo manager set");
    CURRENT.write().replace(manager)
}

/// Remove the current manager, returning it
pub fn clear() -> Option<Arc<UndoManager>> {
    CURRENT.write().take()
}

/// The installed manager
pub fn current() -> Result<Arc<UndoManager>, UndoRedoError> {
    CURRENT.read().clone().ok_or(UndoRedoError::NoCurrentManager)
}

/// [`UndoManager::change`] on the current manager
pub fn change<F>(description: impl Into<String>, block: F) -> Result<Action, UndoRedoError>
where
    F: FnOnce() -> Result<(), UndoRedoError>,
{
    current()?.change(description, block)
}

/// [`UndoManager::change_with_error`] on the current manager
pub fn change_with_error<F, E>(description: impl Into<String>, block: F) -> Result<Action, E>
where
    F: FnOnce() -> Result<(), E>,
    E: From<UndoRedoError>,
{
    current()?.change_with_error(description, block)
}

/// [`UndoManager::undo`] on the current manager
pub fn undo() -> Result<Option<StepOutcome>, UndoRedoError> {
    current()?.undo()
}

/// [`UndoManager::redo`] on the current manager
pub fn redo() -> Result<Option<StepOutcome>, UndoRedoError> {
    current()?.redo()
}

/// What [`undo`] would revert
pub fn undo_description() -> Result<Option<String>, UndoRedoError> {
    Ok(current()?.undo_description())
}

/// What [`redo`] would apply
pub fn redo_description() -> Result<Option<String>, UndoRedoError> {
    Ok(current()?.redo_description())
}

/// Forwards store notifications to the current manager, if any
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentManagerObserver;

impl MutationObserver for CurrentManagerObserver {
    fn on_create(&self, entity: &Entity, store: &dyn EntityStore) {
        if let Ok(manager) = current() {
            manager.recorder().on_create(entity, store);
        }
    }

    fn on_update(&self, entity: &Entity, store: &dyn EntityStore) {
        if let Ok(manager) = current() {
            manager.recorder().on_update(entity, store);
        }
    }

    fn on_destroy(&self, entity: &Entity, store: &dyn EntityStore) {
        if let Ok(manager) = current() {
            manager.recorder().on_destroy(entity, store);
        }
    }
}
