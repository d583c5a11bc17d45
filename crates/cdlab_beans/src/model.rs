//! Domain model: the `Library` and `Music` entities and the `Access`
//! setting.

use cdlab_core::{
    CoreError, CoreResult, EntityRecord, EntitySchema, FieldType, FieldValue, Record, RecordId,
    RelationshipDef, Schema,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Entity name of [`Library`].
pub const LIBRARY: &str = "Library";
/// Entity name of [`Music`].
pub const MUSIC: &str = "Music";

/// Field and relationship names.
pub mod names {
    /// `Library.name` and `Music.name`.
    pub const NAME: &str = "name";
    /// `Library.background_image`.
    pub const BACKGROUND_IMAGE: &str = "background_image";
    /// `Library.created_at`.
    pub const CREATED_AT: &str = "created_at";
    /// `Library.musics`, inverse of `Music.library`.
    pub const MUSICS: &str = "musics";
    /// `Music.file`.
    pub const FILE: &str = "file";
    /// `Music.library`, inverse of `Library.musics`.
    pub const LIBRARY: &str = "library";
}

/// Schema declaring `Library` and `Music`.
///
/// A library owns any number of musics; a music belongs to at most one
/// library. Deleting a library leaves its musics in place, unlinked.
pub fn domain_schema() -> CoreResult<Schema> {
    Schema::builder()
        .entity(
            EntitySchema::new(LIBRARY)
                .optional(names::NAME, FieldType::Text)
                .optional(names::BACKGROUND_IMAGE, FieldType::Blob)
                .required(names::CREATED_AT, FieldType::Timestamp)
                .relationship(RelationshipDef::to_many(names::MUSICS, MUSIC, names::LIBRARY)),
        )
        .entity(
            EntitySchema::new(MUSIC)
                .optional(names::NAME, FieldType::Text)
                .optional(names::FILE, FieldType::Blob)
                .relationship(RelationshipDef::to_one(names::LIBRARY, LIBRARY, names::MUSICS)),
        )
        .build()
}

/// A named collection of musics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    /// Record identity.
    pub id: RecordId,
    /// Display name.
    pub name: Option<String>,
    /// Encoded background image.
    pub background_image: Option<Vec<u8>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Musics in the library.
    pub musics: BTreeSet<RecordId>,
}

impl Library {
    /// A library that has not been stored yet, stamped with the current time.
    #[must_use]
    pub fn draft(name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            name: Some(name.into()),
            background_image: None,
            created_at: Utc::now(),
            musics: BTreeSet::new(),
        }
    }
}

impl EntityRecord for Library {
    const ENTITY: &'static str = LIBRARY;

    fn id(&self) -> RecordId {
        self.id
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        let created_at = record.timestamp(names::CREATED_AT)?.ok_or_else(|| {
            CoreError::schema_violation(LIBRARY, format!("{} has no creation time", record.id()))
        })?;
        Ok(Self {
            id: record.id(),
            name: record.text(names::NAME)?.map(str::to_string),
            background_image: record.blob(names::BACKGROUND_IMAGE)?.map(<[u8]>::to_vec),
            created_at,
            musics: record.related(names::MUSICS),
        })
    }

    fn to_fields(&self) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([
            (names::NAME.to_string(), FieldValue::from(self.name.clone())),
            (
                names::BACKGROUND_IMAGE.to_string(),
                FieldValue::from(self.background_image.clone()),
            ),
            (names::CREATED_AT.to_string(), FieldValue::from(self.created_at)),
        ])
    }
}

/// A single track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Music {
    /// Record identity.
    pub id: RecordId,
    /// Display name.
    pub name: Option<String>,
    /// Encoded audio.
    pub file: Option<Vec<u8>>,
    /// Owning library.
    pub library: Option<RecordId>,
}

impl Music {
    /// A music that has not been stored yet.
    #[must_use]
    pub fn draft(name: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            name: Some(name.into()),
            file: None,
            library: None,
        }
    }
}

impl EntityRecord for Music {
    const ENTITY: &'static str = MUSIC;

    fn id(&self) -> RecordId {
        self.id
    }

    fn from_record(record: &Record) -> CoreResult<Self> {
        Ok(Self {
            id: record.id(),
            name: record.text(names::NAME)?.map(str::to_string),
            file: record.blob(names::FILE)?.map(<[u8]>::to_vec),
            library: record.related_one(names::LIBRARY),
        })
    }

    fn to_fields(&self) -> BTreeMap<String, FieldValue> {
        BTreeMap::from([
            (names::NAME.to_string(), FieldValue::from(self.name.clone())),
            (names::FILE.to_string(), FieldValue::from(self.file.clone())),
        ])
    }
}

/// Credentials for the remote music server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    /// Server base URL.
    pub server_url: Option<String>,
    /// Secret key presented to the server.
    pub secret_key: Option<String>,
}

impl Access {
    /// Credentials for `server_url` authenticated with `secret_key`.
    pub fn new(server_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            server_url: Some(server_url.into()),
            secret_key: Some(secret_key.into()),
        }
    }

    /// No credentials.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            server_url: None,
            secret_key: None,
        }
    }

    /// Whether both the URL and the key are present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.server_url.is_some() && self.secret_key.is_some()
    }
}
