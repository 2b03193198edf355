//! Entity store adapter boundary
//!
//! The undo log never owns entity data. It reads and writes through an
//! [`EntityStore`] and learns about mutations through a [`MutationObserver`]
//! the store invokes *before* applying each create, update or destroy.
//!
//! [`InMemoryEntityStore`] is the reference adapter used by tests and small
//! hosts. Whether a failed change block rolls back the mutations it already
//! applied is the adapter's business; the log only guarantees that no
//! partial action is committed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use crate::entity::{Entity, EntityId, Related};
use crate::error::StoreError;
use crate::schema::{AssociationDescriptor, Cardinality, Schema};

/// Receives mutation notifications from a store
pub trait MutationObserver: Send + Sync {
    /// `entity` is about to be inserted; it and its new members already have ids
    fn on_create(&self, entity: &Entity, store: &dyn EntityStore);
    /// `entity` carries the values about to be written
    fn on_update(&self, entity: &Entity, store: &dyn EntityStore);
    /// `entity` is the stored state about to be removed
    fn on_destroy(&self, entity: &Entity, store: &dyn EntityStore);
}

/// Synchronous CRUD plus association metadata for registered entity types
pub trait EntityStore: Send + Sync {
    /// Static type table
    fn schema(&self) -> &Schema;

    /// Load one entity with its scalar attributes; associations are not loaded
    fn find(&self, entity_type: &str, id: EntityId) -> Result<Option<Entity>, StoreError>;

    /// Whether a row exists
    fn exists(&self, entity_type: &str, id: EntityId) -> Result<bool, StoreError> {
        Ok(self.find(entity_type, id)?.is_some())
    }

    /// Insert `entity`, assigning an id when it has none and keeping it otherwise
    fn create(&self, entity: &mut Entity) -> Result<(), StoreError>;

    /// Overwrite the stored row of `entity`
    fn update(&self, entity: &mut Entity) -> Result<(), StoreError>;

    /// Remove one row
    fn delete(&self, entity_type: &str, id: EntityId) -> Result<(), StoreError>;

    /// Load the members of `association` for a stored entity
    fn load_association(
        &self,
        entity: &Entity,
        association: &AssociationDescriptor,
    ) -> Result<Related, StoreError>;

    /// Insert new entities, update existing ones
    fn save(&self, entity: &mut Entity) -> Result<(), StoreError> {
        if entity.is_new_record() {
            self.create(entity)
        } else {
            self.update(entity)
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Row {
    attributes: BTreeMap<String, Value>,
    links: BTreeMap<String, Vec<EntityId>>,
}

/// Thread-safe in-memory [`EntityStore`]
///
/// Associations are stored as id lists on the owning row. Relations loaded
/// on a saved entity replace the stored links; relations not loaded keep
/// them. Deleting a row does not cascade.
pub struct InMemoryEntityStore {
    schema: Schema,
    tables: RwLock<BTreeMap<String, BTreeMap<EntityId, Row>>>,
    next_ids: Mutex<BTreeMap<String, EntityId>>,
    observer: RwLock<Option<Arc<dyn MutationObserver>>>,
}

impl InMemoryEntityStore {
    /// Create an empty store for `schema`
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            tables: RwLock::new(BTreeMap::new()),
            next_ids: Mutex::new(BTreeMap::new()),
            observer: RwLock::new(None),
        }
    }

    /// Route mutation notifications to `observer`
    pub fn set_observer(&self, observer: Arc<dyn MutationObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Stop notifying
    pub fn clear_observer(&self) {
        *self.observer.write() = None;
    }

    /// Number of stored rows of `entity_type`
    pub fn count(&self, entity_type: &str) -> usize {
        self.tables.read().get(entity_type).map(BTreeMap::len).unwrap_or(0)
    }

    /// Stored link ids of an association (test inspection)
    pub fn links(&self, entity_type: &str, id: EntityId, association: &str) -> Vec<EntityId> {
        self.tables
            .read()
            .get(entity_type)
            .and_then(|table| table.get(&id))
            .and_then(|row| row.links.get(association).cloned())
            .unwrap_or_default()
    }

    fn observer(&self) -> Option<Arc<dyn MutationObserver>> {
        self.observer.read().clone()
    }

    fn ensure_registered(&self, entity_type: &str) -> Result<(), StoreError> {
        if self.schema.entity_type(entity_type).is_none() {
            return Err(StoreError::UnknownType(entity_type.to_string()));
        }
        Ok(())
    }

    fn allocate_id(&self, entity_type: &str) -> EntityId {
        let mut next_ids = self.next_ids.lock();
        let next = next_ids.entry(entity_type.to_string()).or_insert(0);
        *next += 1;
        *next
    }

    fn reserve_id(&self, entity_type: &str, id: EntityId) {
        let mut next_ids = self.next_ids.lock();
        let next = next_ids.entry(entity_type.to_string()).or_insert(0);
        if *next < id {
            *next = id;
        }
    }

    /// Give every new member of the loaded relations an id, depth first, so
    /// the observer sees the ids the rows will be stored under
    fn assign_member_ids(&self, entity: &mut Entity) {
        for related in entity.relations_mut() {
            let members: Vec<&mut Entity> = match related {
                Related::One(Some(member)) => vec![member.as_mut()],
                Related::Many(members) => members.iter_mut().collect(),
                Related::One(None) | Related::Ids(_) => continue,
            };
            for member in members {
                if member.is_new_record() && member.id().is_none() {
                    let id = self.allocate_id(member.entity_type());
                    member.set_id(id);
                }
                self.assign_member_ids(member);
            }
        }
    }

    /// Save loaded relations and return the links to store for them
    fn save_relations(&self, entity: &mut Entity) -> Result<BTreeMap<String, Vec<EntityId>>, StoreError> {
        let names: Vec<String> = entity.relations().keys().cloned().collect();
        let mut links = BTreeMap::new();
        for name in names {
            let ids = match entity.relation_mut(&name) {
                Some(Related::One(Some(member))) => {
                    self.save(member)?;
                    member.id().into_iter().collect()
                }
                Some(Related::One(None)) => Vec::new(),
                Some(Related::Many(members)) => {
                    let mut ids = Vec::with_capacity(members.len());
                    for member in members.iter_mut() {
                        self.save(member)?;
                        ids.extend(member.id());
                    }
                    ids
                }
                Some(Related::Ids(ids)) => ids.clone(),
                None => continue,
            };
            links.insert(name, ids);
        }
        Ok(links)
    }
}

impl EntityStore for InMemoryEntityStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn find(&self, entity_type: &str, id: EntityId) -> Result<Option<Entity>, StoreError> {
        self.ensure_registered(entity_type)?;
        let tables = self.tables.read();
        let Some(row) = tables.get(entity_type).and_then(|table| table.get(&id)) else {
            return Ok(None);
        };
        let mut entity = Entity::new(entity_type).with_id(id);
        for (name, value) in &row.attributes {
            entity.set(name.clone(), value.clone());
        }
        entity.mark_existing();
        Ok(Some(entity))
    }

    fn create(&self, entity: &mut Entity) -> Result<(), StoreError> {
        self.ensure_registered(entity.entity_type())?;
        let id = match entity.id() {
            Some(id) => {
                if self.exists(entity.entity_type(), id)? {
                    return Err(StoreError::Duplicate {
                        entity_type: entity.entity_type().to_string(),
                        id,
                    });
                }
                self.reserve_id(entity.entity_type(), id);
                id
            }
            None => {
                let id = self.allocate_id(entity.entity_type());
                entity.set_id(id);
                id
            }
        };
        self.assign_member_ids(entity);

        if let Some(observer) = self.observer() {
            observer.on_create(entity, self);
        }

        let links = self.save_relations(entity)?;
        let row = Row {
            attributes: entity.attributes().clone(),
            links,
        };
        self.tables
            .write()
            .entry(entity.entity_type().to_string())
            .or_default()
            .insert(id, row);
        entity.mark_existing();
        trace!(entity_type = entity.entity_type(), id, "created");
        Ok(())
    }

    fn update(&self, entity: &mut Entity) -> Result<(), StoreError> {
        self.ensure_registered(entity.entity_type())?;
        let id = entity
            .id()
            .ok_or_else(|| StoreError::backend(format!("cannot update unsaved {}", entity.entity_type())))?;
        if !self.exists(entity.entity_type(), id)? {
            return Err(StoreError::not_found(entity.entity_type(), id));
        }
        self.assign_member_ids(entity);

        if let Some(observer) = self.observer() {
            observer.on_update(entity, self);
        }

        let links = self.save_relations(entity)?;
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(entity.entity_type())
            .and_then(|table| table.get_mut(&id))
            .ok_or_else(|| StoreError::not_found(entity.entity_type(), id))?;
        row.attributes = entity.attributes().clone();
        row.links.extend(links);
        trace!(entity_type = entity.entity_type(), id, "updated");
        Ok(())
    }

    fn delete(&self, entity_type: &str, id: EntityId) -> Result<(), StoreError> {
        let entity = self
            .find(entity_type, id)?
            .ok_or_else(|| StoreError::not_found(entity_type, id))?;

        if let Some(observer) = self.observer() {
            observer.on_destroy(&entity, self);
        }

        self.tables
            .write()
            .get_mut(entity_type)
            .and_then(|table| table.remove(&id));
        trace!(entity_type, id, "deleted");
        Ok(())
    }

    fn load_association(
        &self,
        entity: &Entity,
        association: &AssociationDescriptor,
    ) -> Result<Related, StoreError> {
        let ids = match entity.id() {
            Some(id) => self.links(entity.entity_type(), id, &association.name),
            None => Vec::new(),
        };
        let related = match association.cardinality {
            Cardinality::ToOne => {
                let member = match ids.first() {
                    Some(&member_id) => self.find(&association.target, member_id)?,
                    None => None,
                };
                Related::One(member.map(Box::new))
            }
            Cardinality::ToMany => {
                let mut members = Vec::with_capacity(ids.len());
                for member_id in ids {
                    if let Some(member) = self.find(&association.target, member_id)? {
                        members.push(member);
                    }
                }
                Related::Many(members)
            }
            Cardinality::ManyToMany => Related::Ids(ids),
        };
        Ok(related)
    }
}
