//! In-memory entity model exchanged with the store adapter

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::FieldError;
use crate::schema::EntityType;

/// Identifier of a persisted entity
pub type EntityId = i64;

/// In-memory state of one association on an [`Entity`]
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    /// To-one member, or none
    One(Option<Box<Entity>>),
    /// To-many members in order
    Many(Vec<Entity>),
    /// Many-to-many target ids
    Ids(Vec<EntityId>),
}

/// A live entity: scalar attributes plus any loaded associations.
///
/// `new_record` decides whether [`EntityStore::save`](crate::store::EntityStore::save)
/// inserts or updates. Restores collect non-fatal problems in `errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    entity_type: String,
    id: Option<EntityId>,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<String, Related>,
    new_record: bool,
    errors: Vec<FieldError>,
}

impl Entity {
    /// A new, unsaved entity of `entity_type`
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: None,
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
            new_record: true,
            errors: Vec::new(),
        }
    }

    /// Builder: set the id
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Builder: set an attribute without schema checks
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Builder: set an association
    pub fn with_relation(mut self, name: impl Into<String>, related: Related) -> Self {
        self.relations.insert(name.into(), related);
        self
    }

    /// Registered type name
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Store id; `None` until the store assigns one
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    /// Fix the id the next save stores this entity under
    pub fn set_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    /// Attribute value, if set
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Set an attribute without schema checks
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// All scalar attributes by name
    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Schema-checked assignment used when restoring snapshots.
    ///
    /// Fails when the attribute is no longer declared or the value does not
    /// fit the declared kind.
    pub fn assign(&mut self, declared: &EntityType, name: &str, value: Value) -> Result<(), FieldError> {
        let accepted = declared
            .attributes
            .get(name)
            .map(|kind| kind.accepts(&value))
            .unwrap_or(false);
        if !accepted {
            return Err(self.field_error(name, format!("could not be restored to {value}")));
        }
        self.attributes.insert(name.to_string(), value);
        Ok(())
    }

    /// Loaded state of an association
    pub fn relation(&self, name: &str) -> Option<&Related> {
        self.relations.get(name)
    }

    /// Mutable loaded state of an association
    pub fn relation_mut(&mut self, name: &str) -> Option<&mut Related> {
        self.relations.get_mut(name)
    }

    /// Load or replace an association; the next save writes its links
    pub fn set_relation(&mut self, name: impl Into<String>, related: Related) {
        self.relations.insert(name.into(), related);
    }

    /// Every loaded association by name
    pub fn relations(&self) -> &BTreeMap<String, Related> {
        &self.relations
    }

    pub(crate) fn relations_mut(&mut self) -> impl Iterator<Item = &mut Related> {
        self.relations.values_mut()
    }

    /// Whether a save inserts this entity
    pub fn is_new_record(&self) -> bool {
        self.new_record
    }

    /// Make the next save an update of an existing row
    pub fn mark_existing(&mut self) {
        self.new_record = false;
    }

    /// Errors accumulated while restoring this entity
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether any error is recorded on `field`
    pub fn has_error_on(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Record a restore problem on `field`
    pub fn add_error(&mut self, field: &str, message: impl Into<String>) {
        let error = self.field_error(field, message);
        self.errors.push(error);
    }

    pub(crate) fn push_error(&mut self, error: FieldError) {
        self.errors.push(error);
    }

    /// This entity's errors plus those of every loaded associated entity
    pub fn all_errors(&self) -> Vec<FieldError> {
        let mut all = self.errors.clone();
        for related in self.relations.values() {
            match related {
                Related::One(Some(member)) => all.extend(member.all_errors()),
                Related::Many(members) => {
                    for member in members {
                        all.extend(member.all_errors());
                    }
                }
                Related::One(None) | Related::Ids(_) => {}
            }
        }
        all
    }

    fn field_error(&self, field: &str, message: impl Into<String>) -> FieldError {
        FieldError {
            entity_type: self.entity_type.clone(),
            entity_id: self.id,
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeKind;
    use serde_json::json;

    fn person_type() -> EntityType {
        EntityType::new("Person")
            .attribute("name", AttributeKind::Text)
            .attribute("count", AttributeKind::Integer)
    }

    #[test]
    fn test_new_entity_is_new_record() {
        let entity = Entity::new("Person").with("name", "joe");
        assert!(entity.is_new_record());
        assert_eq!(entity.id(), None);
        assert_eq!(entity.get("name"), Some(&json!("joe")));
    }

    #[test]
    fn test_assign_checks_declared_kind() {
        let declared = person_type();
        let mut entity = Entity::new("Person").with_id(1);

        assert!(entity.assign(&declared, "count", json!(4)).is_ok());
        let err = entity.assign(&declared, "count", json!("four")).unwrap_err();
        assert_eq!(err.field, "count");
        assert_eq!(err.entity_id, Some(1));
        assert_eq!(entity.get("count"), Some(&json!(4)));
    }

    #[test]
    fn test_assign_rejects_undeclared_attribute() {
        let declared = person_type();
        let mut entity = Entity::new("Person");
        let err = entity.assign(&declared, "nickname", json!("jo")).unwrap_err();
        assert!(err.message.contains("could not be restored"));
        assert!(entity.get("nickname").is_none());
    }

    #[test]
    fn test_all_errors_includes_members() {
        let mut pet = Entity::new("Pet").with_id(5);
        pet.add_error("species", "could not be restored to 3");
        let mut person = Entity::new("Person").with_relation("pets", Related::Many(vec![pet]));
        person.add_error("pets", "could not be restored from the revision");

        let all = person.all_errors();
        assert_eq!(all.len(), 2);
        assert!(person.has_error_on("pets"));
        assert!(!person.has_error_on("species"));
    }
}
