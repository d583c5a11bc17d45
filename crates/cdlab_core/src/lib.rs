//! # CDLab Core
//!
//! An embedded object store with typed entities, unit-of-work contexts and
//! predicate queries.
//!
//! This crate provides:
//! - A declarative [`Schema`] of entities, typed fields and bidirectional
//!   relationships
//! - The [`EntityStore`], which owns every [`Record`] and keeps inverse
//!   relationships consistent
//! - [`Context`], a single-owner staging scope with read-your-writes and
//!   all-or-nothing commits
//! - [`Predicate`] and [`Query`] for filtering and ordering records
//! - A write-ahead log and snapshot for durable stores
//! - [`Setting`], a small key-value accessor over an injectable backend
//! - [`Stack`], the explicit configure/setup/destroy lifecycle
//!
//! ```rust
//! use cdlab_core::{EntitySchema, FieldType, FieldValue, Predicate, Query, Schema, Stack, StoreMode};
//!
//! let schema = Schema::builder()
//!     .entity(EntitySchema::new("Note").required("title", FieldType::Text))
//!     .build()
//!     .unwrap();
//! let stack = Stack::configure(schema);
//! stack.setup(StoreMode::Ephemeral).unwrap();
//!
//! let mut ctx = stack.background_context().unwrap();
//! ctx.insert("Note", [("title", FieldValue::from("hello"))]).unwrap();
//! ctx.commit().unwrap();
//!
//! let notes = stack.filter(&Query::new("Note").filter(Predicate::eq("title", "hello"))).unwrap();
//! assert_eq!(notes.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dir;
mod error;
mod query;
mod record;
mod schema;
mod settings;
mod stack;
mod store;
mod types;
mod wal;

pub use config::{Config, StoreMode};
pub use context::{Context, ContextKind, ContextState};
pub use error::{CoreError, CoreResult};
pub use query::{CaseSensitivity, CompareOp, Direction, Predicate, Query, SortKey};
pub use record::{EntityRecord, FieldValue, Record, RecordId};
pub use schema::{
    Cardinality, DeleteRule, EntitySchema, FieldDef, FieldType, RelationshipDef, Schema,
    SchemaBuilder,
};
pub use settings::{FileSettings, InMemorySettings, Setting, SettingsBackend};
pub use stack::Stack;
pub use store::{EntityStore, Fields, Links, Mutation, Scan};
pub use types::SequenceNumber;
