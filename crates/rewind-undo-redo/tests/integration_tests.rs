//! Integration tests for rewind-undo-redo
//!
//! Exercise managers against the in-memory store with associations, the
//! file-backed log and configuration limits.

use std::sync::Arc;

use rewind_undo_redo::{
    AttributeKind, Entity, EntityStore, EntityType, InMemoryEntityStore, InclusionSpec, Operation, Related,
    Schema, TruncateOptions, UndoConfig, UndoLog, UndoManager, UndoRedoError,
};
use serde_json::json;
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new()
        .register(
            EntityType::new("Person")
                .attribute("name", AttributeKind::Text)
                .attribute("nickname", AttributeKind::Text)
                .has_many("pets", "Pet")
                .has_one("friend", "Person")
                .has_and_belongs_to_many("groups", "Group")
                .undoable_associations(
                    InclusionSpec::none()
                        .include("pets")
                        .include("groups")
                        .include_nested("friend", InclusionSpec::none().include("friend")),
                ),
        )
        .register(EntityType::new("Pet").attribute("name", AttributeKind::Text))
        .register(EntityType::new("Group").attribute("title", AttributeKind::Text))
}

fn setup_with(schema: Schema, log: Arc<UndoLog>, config: UndoConfig) -> (Arc<InMemoryEntityStore>, UndoManager) {
    let store = Arc::new(InMemoryEntityStore::new(schema));
    let manager = UndoManager::new(store.clone(), log, config).unwrap();
    store.set_observer(manager.recorder());
    (store, manager)
}

fn setup() -> (Arc<InMemoryEntityStore>, UndoManager) {
    setup_with(schema(), Arc::new(UndoLog::in_memory()), UndoConfig::default())
}

fn joe_with_rex(store: &InMemoryEntityStore) {
    let mut joe = Entity::new("Person")
        .with("name", "joe")
        .with_relation("pets", Related::Many(vec![Entity::new("Pet").with("name", "rex")]))
        .with_relation("groups", Related::Ids(vec![3, 5]));
    store.create(&mut joe).unwrap();
}

#[test]
fn test_undo_destroy_restores_associations() {
    let (store, manager) = setup();
    joe_with_rex(&store);

    manager
        .change("delete joe", || {
            store.delete("Person", 1)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(store.count("Person"), 0);

    let outcome = manager.undo().unwrap().unwrap();
    assert!(outcome.field_errors.is_empty());
    let joe = store.find("Person", 1).unwrap().unwrap();
    assert_eq!(joe.get("name"), Some(&json!("joe")));
    assert_eq!(store.links("Person", 1, "pets"), vec![1]);
    assert_eq!(store.links("Person", 1, "groups"), vec![3, 5]);
    assert_eq!(store.count("Pet"), 1);
}

#[test]
fn test_undo_unwinds_latest_mutation_first() {
    let (store, manager) = setup();
    joe_with_rex(&store);

    manager
        .change("delete joe and rex", || {
            store.delete("Person", 1)?;
            store.delete("Pet", 1)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(store.count("Pet"), 0);

    manager.undo().unwrap();
    // rex comes back before joe, so joe's pet link resolves to the existing row
    assert_eq!(store.count("Pet"), 1);
    assert_eq!(store.links("Person", 1, "pets"), vec![1]);

    manager.redo().unwrap();
    assert_eq!(store.count("Person"), 0);
    assert_eq!(store.count("Pet"), 0);
}

#[test]
fn test_cyclic_friends_snapshot_terminates() {
    let (store, manager) = setup();
    let mut a = Entity::new("Person").with("name", "a");
    store.create(&mut a).unwrap();
    let mut b = Entity::new("Person")
        .with("name", "b")
        .with_relation("friend", Related::Ids(vec![1]));
    store.create(&mut b).unwrap();

    let action = manager
        .change("befriend", || {
            let mut a = store.find("Person", 1)?.ok_or_else(|| UndoRedoError::validation_error("a missing"))?;
            a.set_relation("friend", Related::Ids(vec![2]));
            store.update(&mut a)?;
            Ok(())
        })
        .unwrap();

    let snapshot = action.records[0].snapshot().unwrap();
    assert_eq!(
        snapshot["friend"],
        json!({"id": 2, "name": "b", "friend": {"id": 1, "name": "a"}})
    );
}

#[test]
fn test_file_log_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("undo_log.json");
    let config = UndoConfig {
        log_path: Some(path.clone()),
        ..UndoConfig::default()
    };

    let log = Arc::new(UndoLog::from_config(&config).unwrap());
    let (store, manager) = setup_with(schema(), log, config.clone());
    manager
        .change("create joe", || {
            store.create(&mut Entity::new("Person").with("name", "joe"))?;
            Ok(())
        })
        .unwrap();
    let manager_id = manager.id();
    drop(manager);

    let reopened_log = Arc::new(UndoLog::open(&path).unwrap());
    let reopened = UndoManager::open(manager_id, store.clone(), reopened_log, config).unwrap();
    assert_eq!(reopened.undo_description().as_deref(), Some("create joe"));
    assert_eq!(reopened.actions()[0].records[0].operation, Operation::Create);

    reopened.undo().unwrap();
    assert_eq!(store.count("Person"), 0);
}

#[test]
fn test_schema_drift_is_reported_not_fatal() {
    let log = Arc::new(UndoLog::in_memory());
    let (old_store, manager) = setup_with(schema(), log.clone(), UndoConfig::default());
    manager
        .change("create", || {
            old_store.create(&mut Entity::new("Person").with("name", "joe").with("nickname", "jo"))?;
            Ok(())
        })
        .unwrap();
    manager
        .change("delete", || {
            old_store.delete("Person", 1)?;
            Ok(())
        })
        .unwrap();

    // nickname was dropped from Person since the snapshot was taken
    let drifted = Schema::new()
        .register(
            EntityType::new("Person")
                .attribute("name", AttributeKind::Text)
                .has_many("pets", "Pet")
                .has_one("friend", "Person")
                .has_and_belongs_to_many("groups", "Group"),
        )
        .register(EntityType::new("Pet").attribute("name", AttributeKind::Text))
        .register(EntityType::new("Group").attribute("title", AttributeKind::Text));
    let new_store = Arc::new(InMemoryEntityStore::new(drifted));
    let manager = UndoManager::open(manager.id(), new_store.clone(), log, UndoConfig::default()).unwrap();

    let outcome = manager.undo().unwrap().unwrap();
    assert_eq!(outcome.description, "delete");
    let fields: Vec<&str> = outcome.field_errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["nickname"]);
    let joe = new_store.find("Person", 1).unwrap().unwrap();
    assert_eq!(joe.get("name"), Some(&json!("joe")));
    assert_eq!(joe.get("nickname"), None);
}

#[test]
fn test_update_undo_needs_prior_revision() {
    let (store, manager) = setup();
    manager
        .change("create", || {
            store.create(&mut Entity::new("Person").with("name", "joe"))?;
            Ok(())
        })
        .unwrap();
    manager
        .change("rename", || {
            let mut joe = Entity::new("Person").with_id(1).with("name", "aimee");
            joe.mark_existing();
            store.update(&mut joe)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(manager.truncate_revisions("Person", 1, TruncateOptions::keep(1)).unwrap(), 1);
    let error = manager.undo().unwrap_err();
    assert!(matches!(error, UndoRedoError::RevisionNotFound { revision: 1, .. }));
    assert_eq!(manager.cursor().unwrap(), Some(1));
}

#[test]
fn test_uncompressed_blobs() {
    let config = UndoConfig {
        compress_snapshots: false,
        ..UndoConfig::default()
    };
    let (store, manager) = setup_with(schema(), Arc::new(UndoLog::in_memory()), config);
    let action = manager
        .change("create", || {
            store.create(&mut Entity::new("Person").with("name", "joe"))?;
            Ok(())
        })
        .unwrap();
    assert_eq!(action.records[0].data.first(), Some(&b'{'));
    manager.undo().unwrap();
    manager.redo().unwrap();
    assert_eq!(store.count("Person"), 1);
}

#[test]
fn test_oversized_snapshot_rejects_change() {
    let config = UndoConfig {
        max_blob_bytes: 16,
        compress_snapshots: false,
        ..UndoConfig::default()
    };
    let (store, manager) = setup_with(schema(), Arc::new(UndoLog::in_memory()), config);
    let result = manager.change("create", || {
        store.create(&mut Entity::new("Person").with("name", "a rather long name"))?;
        Ok(())
    });
    assert!(matches!(result, Err(UndoRedoError::Serialization(_))));
    assert!(manager.actions().is_empty());
    assert_eq!(manager.log().read(|t| t.record_count()), 0);
}
