//! Mutation recording for an open change scope
//!
//! The [`Recorder`] is the observer a store notifies. While a scope is open
//! every notification is snapshotted on the spot, so update and destroy
//! records see the entity as it was handed over, before the store applies
//! the write. Outside a scope notifications are ignored.

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::entity::Entity;
use crate::error::UndoRedoError;
use crate::record::{Operation, PendingMutation};
use crate::snapshot::SnapshotCodec;
use crate::store::{EntityStore, MutationObserver};

#[derive(Default)]
struct Scope {
    mutations: Vec<PendingMutation>,
    failure: Option<UndoRedoError>,
}

/// Single-slot mutation buffer
#[derive(Default)]
pub struct Recorder {
    scope: Mutex<Option<Scope>>,
}

/// An open recording scope; dropping it without [`finish`](Self::finish)
/// discards whatever was buffered.
pub(crate) struct RecordingGuard<'a> {
    recorder: &'a Recorder,
    finished: bool,
}

impl RecordingGuard<'_> {
    /// Close the scope and hand back the buffered mutations in order
    pub(crate) fn finish(mut self) -> Result<Vec<PendingMutation>, UndoRedoError> {
        self.finished = true;
        let scope = self.recorder.scope.lock().take().unwrap_or_default();
        match scope.failure {
            Some(failure) => Err(failure),
            None => Ok(scope.mutations),
        }
    }
}

impl Drop for RecordingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(scope) = self.recorder.scope.lock().take() {
                debug!(discarded = scope.mutations.len(), "recording scope discarded");
            }
        }
    }
}

impl Recorder {
    /// A recorder with no open scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope. Fails with `NestedChange` if one is already open.
    pub(crate) fn open(&self) -> Result<RecordingGuard<'_>, UndoRedoError> {
        let mut scope = self.scope.lock();
        if scope.is_some() {
            return Err(UndoRedoError::NestedChange);
        }
        *scope = Some(Scope::default());
        Ok(RecordingGuard {
            recorder: self,
            finished: false,
        })
    }

    /// Whether a change scope is open
    pub fn is_recording(&self) -> bool {
        self.scope.lock().is_some()
    }

    /// Mutations buffered so far in the open scope
    pub fn pending_count(&self) -> usize {
        self.scope.lock().as_ref().map_or(0, |s| s.mutations.len())
    }

    fn capture(&self, operation: Operation, entity: &Entity, store: &dyn EntityStore) {
        if !self.is_recording() {
            trace!(%operation, entity_type = entity.entity_type(), "not recording");
            return;
        }
        let captured = snapshot_of(operation, entity, store);

        let mut slot = self.scope.lock();
        let Some(scope) = slot.as_mut() else {
            return;
        };
        match captured {
            Ok(mutation) => {
                debug!(
                    %operation,
                    entity_type = %mutation.entity_type,
                    entity_id = mutation.entity_id,
                    "mutation recorded"
                );
                scope.mutations.push(mutation);
            }
            Err(error) => {
                if scope.failure.is_none() {
                    scope.failure = Some(error);
                }
            }
        }
    }
}

fn snapshot_of(operation: Operation, entity: &Entity, store: &dyn EntityStore) -> Result<PendingMutation, UndoRedoError> {
    let entity_id = entity.id().ok_or_else(|| {
        UndoRedoError::validation_error(format!(
            "{} {} reported without an id",
            operation,
            entity.entity_type()
        ))
    })?;
    let spec = store.schema().inclusion_spec(entity.entity_type());
    let snapshot = SnapshotCodec::new(store).serialize(entity, &spec)?;
    Ok(PendingMutation {
        operation,
        entity_type: entity.entity_type().to_string(),
        entity_id,
        snapshot,
        captured_at: Utc::now(),
    })
}

impl MutationObserver for Recorder {
    fn on_create(&self, entity: &Entity, store: &dyn EntityStore) {
        self.capture(Operation::Create, entity, store);
    }

    fn on_update(&self, entity: &Entity, store: &dyn EntityStore) {
        self.capture(Operation::Update, entity, store);
    }

    fn on_destroy(&self, entity: &Entity, store: &dyn EntityStore) {
        self.capture(Operation::Destroy, entity, store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeKind, EntityType, Schema};
    use crate::store::InMemoryEntityStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<Recorder>, InMemoryEntityStore) {
        let recorder = Arc::new(Recorder::new());
        let store = InMemoryEntityStore::new(
            Schema::new().register(EntityType::new("Person").attribute("name", AttributeKind::Text)),
        );
        store.set_observer(recorder.clone());
        (recorder, store)
    }

    #[test]
    fn test_notifications_outside_scope_are_ignored() {
        let (recorder, store) = setup();
        store.create(&mut Entity::new("Person").with("name", "joe")).unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.pending_count(), 0);
    }

    #[test]
    fn test_scope_buffers_in_order() {
        let (recorder, store) = setup();
        let guard = recorder.open().unwrap();
        let mut person = Entity::new("Person").with("name", "joe");
        store.create(&mut person).unwrap();
        person.set("name", "aimee");
        store.update(&mut person).unwrap();
        store.delete("Person", 1).unwrap();
        assert_eq!(recorder.pending_count(), 3);

        let mutations = guard.finish().unwrap();
        let operations: Vec<Operation> = mutations.iter().map(|m| m.operation).collect();
        assert_eq!(operations, vec![Operation::Create, Operation::Update, Operation::Destroy]);
        assert_eq!(mutations[1].snapshot["name"], json!("aimee"));
        assert_eq!(mutations[2].snapshot["name"], json!("aimee"));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_nested_open_rejected() {
        let (recorder, _store) = setup();
        let _guard = recorder.open().unwrap();
        assert!(matches!(recorder.open(), Err(UndoRedoError::NestedChange)));
    }

    #[test]
    fn test_dropped_guard_discards() {
        let (recorder, store) = setup();
        {
            let _guard = recorder.open().unwrap();
            store.create(&mut Entity::new("Person")).unwrap();
        }
        assert!(!recorder.is_recording());
        assert!(recorder.open().unwrap().finish().unwrap().is_empty());
    }

    #[test]
    fn test_missing_id_fails_the_scope() {
        let (recorder, store) = setup();
        let guard = recorder.open().unwrap();
        recorder.on_update(&Entity::new("Person"), &store);
        assert!(matches!(guard.finish(), Err(UndoRedoError::ValidationError(_))));
    }
}
