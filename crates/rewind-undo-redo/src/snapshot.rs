//! Recursive snapshot codec
//!
//! A snapshot is a self-describing JSON object: scalar attributes by name,
//! the entity's `id`, and for each included association either a nested
//! snapshot (to-one, `null` when absent), a list of nested snapshots
//! (to-many) or a list of target ids (many-to-many).

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::entity::{Entity, EntityId, Related};
use crate::error::StoreError;
use crate::schema::{AssociationDescriptor, Cardinality, InclusionSpec, Schema};
use crate::store::EntityStore;

/// Serialized attribute/association tree
pub type Snapshot = Map<String, Value>;

/// Key under which every snapshot stores its entity id
pub const ID_KEY: &str = "id";

/// Serializes entities together with their included associations
pub struct SnapshotCodec<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> SnapshotCodec<'a> {
    /// Codec reading associations through `store`
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }

    /// Snapshot `entity` and the associations selected by `spec`.
    ///
    /// Associations loaded on the entity are used as they are; the rest are
    /// read from the store. An entity reached a second time in the same pass
    /// contributes its scalar attributes only.
    pub fn serialize(&self, entity: &Entity, spec: &InclusionSpec) -> Result<Snapshot, StoreError> {
        let mut visited = HashSet::new();
        self.serialize_visited(entity, spec, &mut visited)
    }

    fn serialize_visited(
        &self,
        entity: &Entity,
        spec: &InclusionSpec,
        visited: &mut HashSet<(String, EntityId)>,
    ) -> Result<Snapshot, StoreError> {
        let mut attrs: Snapshot = entity
            .attributes()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        attrs.insert(ID_KEY.to_string(), entity.id().map(Value::from).unwrap_or(Value::Null));

        if let Some(id) = entity.id() {
            if !visited.insert((entity.entity_type().to_string(), id)) {
                return Ok(attrs);
            }
        }

        for association in self.store.schema().associations(entity.entity_type()) {
            let Some(nested) = spec.get(&association.name) else {
                continue;
            };
            let loaded;
            let related = match entity.relation(&association.name) {
                Some(related) => related,
                None => {
                    loaded = self.store.load_association(entity, association)?;
                    &loaded
                }
            };
            let value = self.serialize_association(association, related, nested, visited)?;
            attrs.insert(association.name.clone(), value);
        }

        Ok(attrs)
    }

    fn serialize_association(
        &self,
        association: &AssociationDescriptor,
        related: &Related,
        nested: &InclusionSpec,
        visited: &mut HashSet<(String, EntityId)>,
    ) -> Result<Value, StoreError> {
        match association.cardinality {
            Cardinality::ToMany => {
                let members = self.members(association, related)?;
                let mut list = Vec::with_capacity(members.len());
                for member in &members {
                    list.push(Value::Object(self.serialize_visited(member, nested, visited)?));
                }
                Ok(Value::Array(list))
            }
            Cardinality::ToOne => match self.members(association, related)?.first() {
                Some(member) => Ok(Value::Object(self.serialize_visited(member, nested, visited)?)),
                None => Ok(Value::Null),
            },
            Cardinality::ManyToMany => {
                let ids: Vec<Value> = match related {
                    Related::Ids(ids) => ids.iter().copied().map(Value::from).collect(),
                    Related::Many(members) => members.iter().filter_map(Entity::id).map(Value::from).collect(),
                    Related::One(member) => member.iter().filter_map(|m| m.id()).map(Value::from).collect(),
                };
                Ok(Value::Array(ids))
            }
        }
    }

    /// Member entities of a loaded relation, whatever shape it was loaded in
    fn members(&self, association: &AssociationDescriptor, related: &Related) -> Result<Vec<Entity>, StoreError> {
        match related {
            Related::One(member) => Ok(member.iter().map(|m| (**m).clone()).collect()),
            Related::Many(members) => Ok(members.clone()),
            Related::Ids(ids) => {
                let mut members = Vec::with_capacity(ids.len());
                for &id in ids {
                    if let Some(member) = self.store.find(&association.target, id)? {
                        members.push(member);
                    }
                }
                Ok(members)
            }
        }
    }
}

/// Partition snapshot keys into scalar attributes and association entries
/// using the associations currently declared for `entity_type`.
pub fn split_by_association(schema: &Schema, entity_type: &str, snapshot: Snapshot) -> (Snapshot, Snapshot) {
    let associations = schema.associations(entity_type);
    let mut scalars = Snapshot::new();
    let mut related = Snapshot::new();
    for (key, value) in snapshot {
        if associations.iter().any(|a| a.name == key) {
            related.insert(key, value);
        } else {
            scalars.insert(key, value);
        }
    }
    (scalars, related)
}
