//! Entity schemas.
//!
//! A [`Schema`] is supplied once, when the stack is configured. It declares
//! every entity type, its typed fields and its relationships. Each
//! relationship names its inverse on the target entity; the store uses the
//! pair to keep both sides consistent inside a single commit.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// UTF-8 text.
    Text,
    /// Opaque binary blob.
    Blob,
    /// UTC timestamp.
    Timestamp,
    /// Boolean flag.
    Bool,
}

impl FieldType {
    /// Whether values of this type have a meaningful ordering.
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        matches!(self, Self::Text | Self::Timestamp | Self::Bool)
    }
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: FieldType,
    /// Whether a non-null value must always be present.
    pub required: bool,
}

/// How many records a relationship may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// At most one target.
    ToOne,
    /// Any number of targets.
    ToMany,
}

/// What happens to related records when a record is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeleteRule {
    /// Remove the deleted record from the related records' inverse.
    #[default]
    Nullify,
    /// Delete the related records as well.
    Cascade,
}

/// A declared relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    /// Relationship name on the owning entity.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Cardinality on the owning side.
    pub cardinality: Cardinality,
    /// Name of the inverse relationship on the target entity.
    pub inverse: String,
    /// Delete rule applied when the owner is deleted.
    pub delete_rule: DeleteRule,
}

impl RelationshipDef {
    /// A to-one relationship.
    pub fn to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::ToOne,
            inverse: inverse.into(),
            delete_rule: DeleteRule::Nullify,
        }
    }

    /// A to-many relationship.
    pub fn to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self {
            cardinality: Cardinality::ToMany,
            ..Self::to_one(name, target, inverse)
        }
    }

    /// Sets the delete rule.
    #[must_use]
    pub fn delete_rule(mut self, rule: DeleteRule) -> Self {
        self.delete_rule = rule;
        self
    }
}

/// Declaration of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    fields: Vec<FieldDef>,
    relationships: Vec<RelationshipDef>,
}

impl EntitySchema {
    /// Starts a declaration for the entity `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Declares an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            required: false,
        });
        self
    }

    /// Declares a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            required: true,
        });
        self
    }

    /// Declares a relationship.
    #[must_use]
    pub fn relationship(mut self, def: RelationshipDef) -> Self {
        self.relationships.push(def);
        self
    }

    /// Entity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Declared relationships, in declaration order.
    #[must_use]
    pub fn relationships(&self) -> &[RelationshipDef] {
        &self.relationships
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship_def(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub(crate) fn require_field(&self, name: &str) -> CoreResult<&FieldDef> {
        self.field_def(name).ok_or_else(|| {
            CoreError::schema_violation(&self.name, format!("unknown field `{name}`"))
        })
    }

    pub(crate) fn require_relationship(&self, name: &str) -> CoreResult<&RelationshipDef> {
        self.relationship_def(name).ok_or_else(|| {
            CoreError::schema_violation(&self.name, format!("unknown relationship `{name}`"))
        })
    }
}

/// A validated set of entity declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    entities: BTreeMap<String, EntitySchema>,
}

impl Schema {
    /// Starts building a schema.
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Looks up an entity declaration.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the entity is not declared.
    pub fn entity(&self, name: &str) -> CoreResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| CoreError::schema_violation(name, "entity is not declared"))
    }

    /// Names of every declared entity, sorted.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Resolves the inverse side of `entity.relationship`.
    pub(crate) fn inverse_of(
        &self,
        entity: &str,
        relationship: &str,
    ) -> CoreResult<(&RelationshipDef, &RelationshipDef)> {
        let forward = self.entity(entity)?.require_relationship(relationship)?;
        let inverse = self
            .entity(&forward.target)?
            .require_relationship(&forward.inverse)?;
        Ok((forward, inverse))
    }
}

/// Collects entity declarations and validates them as a whole.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntitySchema>,
}

impl SchemaBuilder {
    /// Adds an entity declaration.
    #[must_use]
    pub fn entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    /// Validates and freezes the schema.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` when an entity, field or relationship name
    /// is declared twice, when a relationship targets an undeclared entity,
    /// or when an inverse is missing or does not point back.
    pub fn build(self) -> CoreResult<Schema> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            let mut names: Vec<&str> = entity
                .fields
                .iter()
                .map(|f| f.name.as_str())
                .chain(entity.relationships.iter().map(|r| r.name.as_str()))
                .collect();
            names.sort_unstable();
            if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
                return Err(CoreError::schema_violation(
                    &entity.name,
                    format!("`{}` is declared twice", dup[0]),
                ));
            }
            if entities.contains_key(&entity.name) {
                return Err(CoreError::schema_violation(
                    &entity.name,
                    "entity is declared twice",
                ));
            }
            entities.insert(entity.name.clone(), entity);
        }

        for entity in entities.values() {
            for rel in &entity.relationships {
                let target = entities.get(&rel.target).ok_or_else(|| {
                    CoreError::schema_violation(
                        &entity.name,
                        format!("relationship `{}` targets undeclared `{}`", rel.name, rel.target),
                    )
                })?;
                let inverse = target.relationship_def(&rel.inverse).ok_or_else(|| {
                    CoreError::schema_violation(
                        &entity.name,
                        format!(
                            "relationship `{}` names missing inverse `{}.{}`",
                            rel.name, rel.target, rel.inverse
                        ),
                    )
                })?;
                if inverse.target != entity.name || inverse.inverse != rel.name {
                    return Err(CoreError::schema_violation(
                        &entity.name,
                        format!(
                            "inverse `{}.{}` does not point back to `{}`",
                            rel.target, rel.inverse, rel.name
                        ),
                    ));
                }
            }
        }

        Ok(Schema { entities })
    }
}
