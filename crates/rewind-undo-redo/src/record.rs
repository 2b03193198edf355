//! Per-mutation reversible records
//!
//! A [`Record`] captures one create, update or destroy: which entity, the
//! revision it produced and a snapshot blob taken when the mutation was
//! reported. Undo and redo dispatch on the operation; restoring a snapshot
//! rebuilds the entity and its included associations, collecting
//! per-field problems instead of failing.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::blob::{self, BlobOptions};
use crate::entity::{Entity, EntityId, Related};
use crate::error::{FieldError, StoreError, UndoRedoError};
use crate::log::{LogTables, UndoLog};
use crate::schema::{AssociationDescriptor, Cardinality, EntityType};
use crate::snapshot::{split_by_association, Snapshot, ID_KEY};
use crate::store::EntityStore;

/// Kind of mutation, stored as 0 / 1 / 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Operation {
    /// Entity was inserted
    Create,
    /// Entity was overwritten
    Update,
    /// Entity was removed
    Destroy,
}

impl From<Operation> for u8 {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Create => 0,
            Operation::Update => 1,
            Operation::Destroy => 2,
        }
    }
}

impl TryFrom<u8> for Operation {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Operation::Create),
            1 => Ok(Operation::Update),
            2 => Ok(Operation::Destroy),
            other => Err(format!("unknown operation code {other}")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "Create"),
            Operation::Update => write!(f, "Update"),
            Operation::Destroy => write!(f, "Destroy"),
        }
    }
}

/// A mutation reported inside an open change scope, not yet in the log
#[derive(Debug, Clone)]
pub(crate) struct PendingMutation {
    pub operation: Operation,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub snapshot: Snapshot,
    pub captured_at: DateTime<Utc>,
}

/// Row of `undo_records`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Log-assigned id
    pub id: u64,
    /// Owning action
    pub undo_action_id: u64,
    /// What the mutation did
    pub operation: Operation,
    /// Type of the mutated entity
    #[serde(rename = "undoable_type")]
    pub entity_type: String,
    /// Id of the mutated entity
    #[serde(rename = "undoable_id")]
    pub entity_id: EntityId,
    /// 1, 2, 3, ... per (entity_type, entity_id)
    pub revision: u64,
    /// Encoded snapshot, see [`crate::blob`]
    #[serde(with = "crate::blob::base64_bytes")]
    pub data: Vec<u8>,
    /// When the mutation was reported
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Encode `pending` into a record of `action_id` with the next free
    /// revision for its entity. The id is assigned on insert.
    pub(crate) fn build(
        tables: &LogTables,
        action_id: u64,
        pending: &PendingMutation,
        options: BlobOptions,
    ) -> Result<Self, UndoRedoError> {
        let revision = tables
            .max_revision(&pending.entity_type, pending.entity_id)
            .unwrap_or(0)
            + 1;
        Ok(Record {
            id: 0,
            undo_action_id: action_id,
            operation: pending.operation,
            entity_type: pending.entity_type.clone(),
            entity_id: pending.entity_id,
            revision,
            data: blob::encode(&pending.snapshot, options)?,
            created_at: pending.captured_at,
        })
    }

    /// Decoded snapshot
    pub fn snapshot(&self) -> Result<Snapshot, UndoRedoError> {
        blob::decode(&self.data)
    }

    /// Invert this mutation
    pub fn undo(&self, store: &dyn EntityStore, log: &UndoLog) -> Result<Vec<FieldError>, UndoRedoError> {
        debug!(record = %self, "undo record");
        match self.operation {
            Operation::Create => self.un_create(store),
            Operation::Update => self.undo_update(store, log),
            Operation::Destroy => self.un_destroy(store),
        }
    }

    /// Apply this mutation again
    pub fn redo(&self, store: &dyn EntityStore) -> Result<Vec<FieldError>, UndoRedoError> {
        debug!(record = %self, "redo record");
        match self.operation {
            Operation::Create => self.un_destroy(store),
            Operation::Update => self.redo_update(store),
            Operation::Destroy => self.un_create(store),
        }
    }

    fn un_create(&self, store: &dyn EntityStore) -> Result<Vec<FieldError>, UndoRedoError> {
        store.delete(&self.entity_type, self.entity_id)?;
        Ok(Vec::new())
    }

    /// Bring the captured row back. A row already written under the same id,
    /// as a nested member of an earlier record in the same action, is
    /// overwritten instead.
    fn un_destroy(&self, store: &dyn EntityStore) -> Result<Vec<FieldError>, UndoRedoError> {
        let exists = store.exists(&self.entity_type, self.entity_id)?;
        let mut entity = self.restore(store, exists)?;
        store.save(&mut entity)?;
        Ok(report(entity))
    }

    fn undo_update(&self, store: &dyn EntityStore, log: &UndoLog) -> Result<Vec<FieldError>, UndoRedoError> {
        let previous_revision = self.revision.saturating_sub(1);
        let previous = log.find_revision(&self.entity_type, self.entity_id, previous_revision)?;
        let mut entity = previous.restore(store, true)?;
        store.save(&mut entity)?;
        Ok(report(entity))
    }

    fn redo_update(&self, store: &dyn EntityStore) -> Result<Vec<FieldError>, UndoRedoError> {
        let mut entity = self.restore(store, true)?;
        store.save(&mut entity)?;
        Ok(report(entity))
    }

    /// Rebuild the entity captured by this record.
    ///
    /// Attributes and associations that no longer fit the current schema
    /// are reported on the returned entity's errors. With `update_existing`
    /// a later save updates the stored row instead of inserting.
    pub fn restore(&self, store: &dyn EntityStore, update_existing: bool) -> Result<Entity, UndoRedoError> {
        let schema = store.schema();
        let declared = schema
            .entity_type(&self.entity_type)
            .ok_or_else(|| StoreError::UnknownType(self.entity_type.clone()))?;
        let (scalars, associations) = split_by_association(schema, &self.entity_type, self.snapshot()?);

        let mut entity = Entity::new(self.entity_type.clone()).with_id(self.entity_id);
        assign_scalars(&mut entity, declared, scalars);
        for (name, value) in associations {
            restore_association(store, &mut entity, &name, value);
        }
        if update_existing {
            entity.mark_existing();
        }
        Ok(entity)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} #{} r{} (action {})",
            self.id, self.operation, self.entity_type, self.entity_id, self.revision, self.undo_action_id
        )
    }
}

fn report(entity: Entity) -> Vec<FieldError> {
    let errors = entity.all_errors();
    for error in &errors {
        warn!(%error, "restored with field error");
    }
    errors
}

/// Assign scalar entries one by one; returns whether any failed
fn assign_scalars(entity: &mut Entity, declared: &EntityType, scalars: Snapshot) -> bool {
    let mut failed = false;
    for (name, value) in scalars {
        if name == ID_KEY {
            continue;
        }
        if let Err(error) = entity.assign(declared, &name, value) {
            entity.push_error(error);
            failed = true;
        }
    }
    failed
}

/// Restore one association entry onto `parent`. Failures are recorded on
/// `parent` under `name` and never abort sibling work.
fn restore_association(store: &dyn EntityStore, parent: &mut Entity, name: &str, value: Value) {
    let association = store
        .schema()
        .entity_type(parent.entity_type())
        .and_then(|t| t.association_named(name))
        .cloned();
    let outcome = match association {
        Some(association) => try_restore_association(store, parent, &association, value),
        None => Err("association is no longer declared".to_string()),
    };
    if let Err(message) = outcome {
        parent.add_error(name, format!("could not be restored from the revision: {message}"));
    }
}

fn try_restore_association(
    store: &dyn EntityStore,
    parent: &mut Entity,
    association: &AssociationDescriptor,
    value: Value,
) -> Result<(), String> {
    let name = association.name.as_str();
    match (association.cardinality, value) {
        (Cardinality::ToMany, Value::Array(items)) => {
            parent.set_relation(name, Related::Many(Vec::new()));
            for item in items {
                restore_association(store, parent, name, item);
            }
            Ok(())
        }
        (Cardinality::ToMany | Cardinality::ToOne, Value::Object(attributes)) => {
            let (member, failed) = build_member(store, &association.target, attributes)?;
            if association.cardinality == Cardinality::ToMany {
                match parent.relation_mut(name) {
                    Some(Related::Many(members)) => members.push(member),
                    _ => parent.set_relation(name, Related::Many(vec![member])),
                }
            } else {
                parent.set_relation(name, Related::One(Some(Box::new(member))));
            }
            if failed && !parent.has_error_on(name) {
                parent.add_error(name, "could not be restored from the revision");
            }
            Ok(())
        }
        (Cardinality::ToOne, Value::Null) => {
            parent.set_relation(name, Related::One(None));
            Ok(())
        }
        (Cardinality::ManyToMany, Value::Array(items)) => {
            let ids = items
                .iter()
                .map(|item| item.as_i64().ok_or_else(|| format!("{item} is not an id")))
                .collect::<Result<Vec<_>, _>>()?;
            parent.set_relation(name, Related::Ids(ids));
            Ok(())
        }
        (_, other) => Err(format!("unexpected value {other}")),
    }
}

/// Build an associated entity from its nested snapshot. Returns the entity
/// and whether any of its scalar attributes failed to restore.
fn build_member(store: &dyn EntityStore, target: &str, attributes: Snapshot) -> Result<(Entity, bool), String> {
    let schema = store.schema();
    let declared = schema
        .entity_type(target)
        .ok_or_else(|| format!("unknown entity type {target}"))?;

    let mut member = Entity::new(target);
    match attributes.get(ID_KEY) {
        Some(Value::Null) | None => {}
        Some(id) => {
            let id = id.as_i64().ok_or_else(|| format!("{id} is not an id"))?;
            member.set_id(id);
            if store.exists(target, id).map_err(|e| e.to_string())? {
                member.mark_existing();
            }
        }
    }

    let (scalars, associations) = split_by_association(schema, target, attributes);
    let failed = assign_scalars(&mut member, declared, scalars);
    for (name, value) in associations {
        restore_association(store, &mut member, &name, value);
    }
    Ok((member, failed))
}
