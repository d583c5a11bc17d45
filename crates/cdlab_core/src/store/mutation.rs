//! Staged mutations.

use crate::record::{FieldValue, RecordId};
use std::collections::{BTreeMap, BTreeSet};

/// Field name to value map used by inserts and updates.
pub type Fields = BTreeMap<String, FieldValue>;

/// Relationship name to targets map used by inserts.
pub type Links = BTreeMap<String, BTreeSet<RecordId>>;

/// One change to the object graph.
///
/// Mutations carry intent, not resulting state: an `Update` names only the
/// properties it changes and a `Link` names a single edge. A context replays
/// its mutations against the latest store state at commit, so properties it
/// never touched keep whatever another context committed in the meantime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a record.
    Insert {
        /// Identity assigned at staging time.
        id: RecordId,
        /// Entity name.
        entity: String,
        /// Initial field values; undeclared fields are rejected.
        fields: Fields,
        /// Initial relationships; inverses are set as well.
        links: Links,
    },
    /// Change some fields of an existing record.
    Update {
        /// Record to change.
        id: RecordId,
        /// Fields to overwrite.
        changes: Fields,
    },
    /// Add an edge and its inverse.
    Link {
        /// Owning record.
        id: RecordId,
        /// Relationship on the owner.
        relation: String,
        /// Target record.
        target: RecordId,
    },
    /// Remove an edge and its inverse.
    Unlink {
        /// Owning record.
        id: RecordId,
        /// Relationship on the owner.
        relation: String,
        /// Target record.
        target: RecordId,
    },
    /// Remove a record and detach it from everything it references.
    Delete {
        /// Record to remove.
        id: RecordId,
    },
}

impl Mutation {
    /// The record the mutation is addressed to.
    #[must_use]
    pub fn subject(&self) -> RecordId {
        match self {
            Self::Insert { id, .. }
            | Self::Update { id, .. }
            | Self::Link { id, .. }
            | Self::Unlink { id, .. }
            | Self::Delete { id } => *id,
        }
    }
}
