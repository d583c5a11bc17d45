//! Mapping between records and domain types.

use crate::error::CoreResult;
use crate::record::{FieldValue, Record, RecordId};
use std::collections::BTreeMap;

/// A domain type stored as records of one entity.
///
/// Implementors provide:
/// - `ENTITY`: the entity name declared in the schema
/// - `id()`: the record identity the value was read from or will be written to
/// - `from_record()`: builds the value from a stored record
/// - `to_fields()`: the field values to write (relationships are staged
///   separately, through links)
///
/// # Example
///
/// ```rust
/// use cdlab_core::{CoreResult, EntityRecord, FieldValue, Record, RecordId};
/// use std::collections::BTreeMap;
///
/// struct Note {
///     id: RecordId,
///     title: String,
/// }
///
/// impl EntityRecord for Note {
///     const ENTITY: &'static str = "Note";
///
///     fn id(&self) -> RecordId {
///         self.id
///     }
///
///     fn from_record(record: &Record) -> CoreResult<Self> {
///         Ok(Self {
///             id: record.id(),
///             title: record.text("title")?.unwrap_or_default().to_string(),
///         })
///     }
///
///     fn to_fields(&self) -> BTreeMap<String, FieldValue> {
///         BTreeMap::from([("title".to_string(), FieldValue::from(self.title.as_str()))])
///     }
/// }
/// ```
pub trait EntityRecord: Sized {
    /// Entity name in the schema.
    const ENTITY: &'static str;

    /// Identity of the backing record.
    fn id(&self) -> RecordId;

    /// Builds the value from a record of [`Self::ENTITY`].
    ///
    /// # Errors
    ///
    /// Returns `SchemaViolation` when a field holds an unexpected type.
    fn from_record(record: &Record) -> CoreResult<Self>;

    /// Field values to persist.
    fn to_fields(&self) -> BTreeMap<String, FieldValue>;
}
