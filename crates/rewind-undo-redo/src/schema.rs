//! Static per-type schema table
//!
//! Hosts describe each undoable entity type once at startup: its scalar
//! attributes, its associations and which associations are captured in
//! snapshots. Nothing is discovered at runtime.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared kind of a scalar attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeKind {
    /// Signed 64-bit integer
    Integer,
    /// Any JSON number
    Float,
    /// UTF-8 string
    Text,
    /// true / false
    Boolean,
    /// RFC 3339 timestamp string
    Timestamp,
    /// Arbitrary JSON value
    Json,
}

impl AttributeKind {
    /// Whether `value` can be stored in an attribute of this kind.
    ///
    /// `null` is accepted for every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            AttributeKind::Integer => value.is_i64(),
            AttributeKind::Float => value.is_number(),
            AttributeKind::Text => value.is_string(),
            AttributeKind::Boolean => value.is_boolean(),
            AttributeKind::Timestamp => value
                .as_str()
                .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
                .unwrap_or(false),
            AttributeKind::Json => true,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeKind::Integer => "integer",
            AttributeKind::Float => "float",
            AttributeKind::Text => "text",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Timestamp => "timestamp",
            AttributeKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// Shape of an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// At most one associated entity
    ToOne,
    /// Any number of owned associated entities
    ToMany,
    /// Any number of shared associated entities, referenced by id only
    ManyToMany,
}

/// One association of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDescriptor {
    /// Association name, also the snapshot key
    pub name: String,
    /// Shape of the association
    pub cardinality: Cardinality,
    /// Entity type on the other side
    pub target: String,
}

/// Nested selection of associations to capture in a snapshot.
///
/// Each entry includes the named association; its value says which of the
/// *target's* associations are captured in turn. An empty nested spec
/// includes the association without descending further.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionSpec(BTreeMap<String, InclusionSpec>);

impl InclusionSpec {
    /// Spec that includes nothing
    pub fn none() -> Self {
        Self::default()
    }

    /// Include `name` without descending into its associations
    pub fn include(self, name: impl Into<String>) -> Self {
        self.include_nested(name, InclusionSpec::none())
    }

    /// Include `name` and, through `nested`, some of its associations
    pub fn include_nested(mut self, name: impl Into<String>, nested: InclusionSpec) -> Self {
        self.0.insert(name.into(), nested);
        self
    }

    /// Nested spec for `name`, if it is included
    pub fn get(&self, name: &str) -> Option<&InclusionSpec> {
        self.0.get(name)
    }

    /// Whether nothing is included
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Declaration of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Type name, stored as `undoable_type`
    pub name: String,
    /// Scalar attributes by name
    pub attributes: BTreeMap<String, AttributeKind>,
    /// Associations in declaration order
    pub associations: Vec<AssociationDescriptor>,
    /// Associations captured in this type's snapshots
    pub undoable: InclusionSpec,
}

impl EntityType {
    /// Start declaring a type
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            associations: Vec::new(),
            undoable: InclusionSpec::none(),
        }
    }

    /// Declare a scalar attribute
    pub fn attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    /// Declare a to-one association
    pub fn has_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(name, Cardinality::ToOne, target)
    }

    /// Declare a to-many association
    pub fn has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(name, Cardinality::ToMany, target)
    }

    /// Declare a many-to-many association
    pub fn has_and_belongs_to_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(name, Cardinality::ManyToMany, target)
    }

    fn association(mut self, name: impl Into<String>, cardinality: Cardinality, target: impl Into<String>) -> Self {
        let name = name.into();
        self.associations.retain(|a| a.name != name);
        self.associations.push(AssociationDescriptor {
            name,
            cardinality,
            target: target.into(),
        });
        self
    }

    /// Choose which associations are captured in snapshots
    pub fn undoable_associations(mut self, spec: InclusionSpec) -> Self {
        self.undoable = spec;
        self
    }

    /// Look up an association by name
    pub fn association_named(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.associations.iter().find(|a| a.name == name)
    }
}

/// All registered entity types
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    types: BTreeMap<String, EntityType>,
}

impl Schema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a type
    pub fn register(mut self, entity_type: EntityType) -> Self {
        self.types.insert(entity_type.name.clone(), entity_type);
        self
    }

    /// Look up a type by name
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.types.get(name)
    }

    /// Associations of a type; empty for unknown types
    pub fn associations(&self, name: &str) -> &[AssociationDescriptor] {
        self.types
            .get(name)
            .map(|t| t.associations.as_slice())
            .unwrap_or(&[])
    }

    /// Undoable association spec of a type; empty for unknown types
    pub fn inclusion_spec(&self, name: &str) -> InclusionSpec {
        self.types
            .get(name)
            .map(|t| t.undoable.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_kind_accepts() {
        assert!(AttributeKind::Integer.accepts(&json!(4)));
        assert!(!AttributeKind::Integer.accepts(&json!(4.5)));
        assert!(!AttributeKind::Integer.accepts(&json!("4")));
        assert!(AttributeKind::Float.accepts(&json!(4)));
        assert!(AttributeKind::Text.accepts(&json!("joe")));
        assert!(AttributeKind::Boolean.accepts(&json!(false)));
        assert!(AttributeKind::Timestamp.accepts(&json!("2024-01-02T03:04:05Z")));
        assert!(!AttributeKind::Timestamp.accepts(&json!("yesterday")));
        assert!(AttributeKind::Json.accepts(&json!({"a": [1, 2]})));
    }

    #[test]
    fn test_null_accepted_for_every_kind() {
        for kind in [
            AttributeKind::Integer,
            AttributeKind::Float,
            AttributeKind::Text,
            AttributeKind::Boolean,
            AttributeKind::Timestamp,
            AttributeKind::Json,
        ] {
            assert!(kind.accepts(&Value::Null), "{kind} should accept null");
        }
    }

    #[test]
    fn test_schema_lookup() {
        let schema = Schema::new().register(
            EntityType::new("Person")
                .attribute("name", AttributeKind::Text)
                .has_many("pets", "Pet")
                .has_one("address", "Address")
                .has_and_belongs_to_many("groups", "Group")
                .undoable_associations(InclusionSpec::none().include("pets")),
        );

        let person = schema.entity_type("Person").unwrap();
        assert_eq!(person.associations.len(), 3);
        assert_eq!(
            person.association_named("groups").unwrap().cardinality,
            Cardinality::ManyToMany
        );
        assert!(schema.inclusion_spec("Person").get("pets").is_some());
        assert!(schema.inclusion_spec("Person").get("address").is_none());
        assert!(schema.associations("Missing").is_empty());
    }

    #[test]
    fn test_redeclared_association_replaces_previous() {
        let person = EntityType::new("Person")
            .has_one("pet", "Pet")
            .has_many("pet", "Pet");
        assert_eq!(person.associations.len(), 1);
        assert_eq!(person.associations[0].cardinality, Cardinality::ToMany);
    }
}
