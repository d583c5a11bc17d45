//! Records and their typed mapping.

mod id;
mod typed;
mod value;

pub use id::RecordId;
pub use typed::EntityRecord;
pub use value::FieldValue;

use crate::error::{CoreError, CoreResult};
use crate::schema::EntitySchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One stored entity instance.
///
/// A record carries every field its entity declares (absent values are
/// [`FieldValue::Null`]) and every relationship (absent links are empty
/// sets). Records handed out by the store and by contexts are copies;
/// changing one has no effect until it is staged through a
/// [`crate::Context`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    entity: String,
    fields: BTreeMap<String, FieldValue>,
    relations: BTreeMap<String, BTreeSet<RecordId>>,
}

impl Record {
    /// Creates a record with every declared field null and every
    /// relationship empty.
    pub(crate) fn blank(id: RecordId, schema: &EntitySchema) -> Self {
        Self {
            id,
            entity: schema.name().to_string(),
            fields: schema
                .fields()
                .iter()
                .map(|f| (f.name.clone(), FieldValue::Null))
                .collect(),
            relations: schema
                .relationships()
                .iter()
                .map(|r| (r.name.clone(), BTreeSet::new()))
                .collect(),
        }
    }

    /// Identity.
    #[must_use]
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Entity name.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Value of `name`, or `Null` when the field is absent.
    #[must_use]
    pub fn value(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&FieldValue::Null)
    }

    /// All field values.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// All relationships.
    #[must_use]
    pub fn relations(&self) -> &BTreeMap<String, BTreeSet<RecordId>> {
        &self.relations
    }

    /// Text field.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the field holds another type.
    pub fn text(&self, name: &str) -> CoreResult<Option<&str>> {
        match self.value(name) {
            FieldValue::Null => Ok(None),
            FieldValue::Text(s) => Ok(Some(s)),
            other => Err(self.mismatch(name, "text", other)),
        }
    }

    /// Blob field.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the field holds another type.
    pub fn blob(&self, name: &str) -> CoreResult<Option<&[u8]>> {
        match self.value(name) {
            FieldValue::Null => Ok(None),
            FieldValue::Blob(b) => Ok(Some(b)),
            other => Err(self.mismatch(name, "blob", other)),
        }
    }

    /// Timestamp field.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the field holds another type.
    pub fn timestamp(&self, name: &str) -> CoreResult<Option<DateTime<Utc>>> {
        match self.value(name) {
            FieldValue::Null => Ok(None),
            FieldValue::Timestamp(t) => Ok(Some(*t)),
            other => Err(self.mismatch(name, "timestamp", other)),
        }
    }

    /// Boolean field.
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` if the field holds another type.
    pub fn bool(&self, name: &str) -> CoreResult<Option<bool>> {
        match self.value(name) {
            FieldValue::Null => Ok(None),
            FieldValue::Bool(b) => Ok(Some(*b)),
            other => Err(self.mismatch(name, "bool", other)),
        }
    }

    /// Targets of a relationship; empty when the relationship is unset.
    #[must_use]
    pub fn related(&self, relation: &str) -> BTreeSet<RecordId> {
        self.relations.get(relation).cloned().unwrap_or_default()
    }

    /// Single target of a to-one relationship.
    #[must_use]
    pub fn related_one(&self, relation: &str) -> Option<RecordId> {
        self.relations
            .get(relation)
            .and_then(|targets| targets.iter().next().copied())
    }

    /// Whether `relation` currently points at `target`.
    #[must_use]
    pub fn is_related(&self, relation: &str, target: RecordId) -> bool {
        self.relations
            .get(relation)
            .is_some_and(|targets| targets.contains(&target))
    }

    pub(crate) fn set_value(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub(crate) fn add_link(&mut self, relation: &str, target: RecordId) -> bool {
        self.relations
            .entry(relation.to_string())
            .or_default()
            .insert(target)
    }

    pub(crate) fn remove_link(&mut self, relation: &str, target: RecordId) -> bool {
        self.relations
            .get_mut(relation)
            .is_some_and(|targets| targets.remove(&target))
    }

    fn mismatch(&self, name: &str, wanted: &str, found: &FieldValue) -> CoreError {
        CoreError::schema_violation(
            &self.entity,
            format!("field `{name}` is not {wanted} (found {found:?})"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, RelationshipDef};

    fn library_schema() -> EntitySchema {
        EntitySchema::new("Library")
            .optional("name", FieldType::Text)
            .optional("image", FieldType::Blob)
            .relationship(RelationshipDef::to_many("musics", "Music", "library"))
    }

    #[test]
    fn blank_record_declares_everything() {
        let record = Record::blank(RecordId::new(), &library_schema());
        assert_eq!(record.entity(), "Library");
        assert_eq!(record.fields().len(), 2);
        assert!(record.value("name").is_null());
        assert!(record.related("musics").is_empty());
        assert_eq!(record.related_one("musics"), None);
    }

    #[test]
    fn typed_accessors_check_types() {
        let mut record = Record::blank(RecordId::new(), &library_schema());
        record.set_value("name", FieldValue::from("Favorites"));
        assert_eq!(record.text("name").unwrap(), Some("Favorites"));
        assert_eq!(record.blob("image").unwrap(), None);
        assert!(record.blob("name").is_err());
    }

    #[test]
    fn links_are_sets() {
        let mut record = Record::blank(RecordId::new(), &library_schema());
        let music = RecordId::new();
        assert!(record.add_link("musics", music));
        assert!(!record.add_link("musics", music));
        assert!(record.is_related("musics", music));
        assert!(record.remove_link("musics", music));
        assert!(!record.remove_link("musics", music));
    }
}
