//! Error types for the object store.

use crate::record::RecordId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the store, contexts, queries and settings.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] cdlab_storage::StorageError),

    /// I/O error on the durable medium.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// An operation broke the schema: missing required field, unknown
    /// field, wrong value type or a relationship to the wrong entity.
    #[error("schema violation on {entity}: {message}")]
    SchemaViolation {
        /// Entity the operation targeted.
        entity: String,
        /// What was violated.
        message: String,
    },

    /// The referenced record does not exist.
    #[error("record not found: {id}")]
    NotFound {
        /// Identity that was looked up.
        id: RecordId,
    },

    /// A commit could not be applied against the latest store state.
    /// Nothing from the commit was applied.
    #[error("commit conflict: {reason}")]
    Conflict {
        /// Why the staged changes no longer apply.
        reason: String,
    },

    /// A predicate or sort key does not fit the entity it was run against.
    #[error("invalid predicate: {message}")]
    InvalidPredicate {
        /// What is wrong with the predicate.
        message: String,
    },

    /// Operation not permitted in the current lifecycle state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why the operation is not allowed.
        message: String,
    },

    /// The store was closed or destroyed.
    #[error("store is closed")]
    StoreClosed,

    /// Another process holds the store directory.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The write-ahead log is unreadable.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A WAL frame failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
}

impl CoreError {
    /// Creates a schema violation error.
    pub fn schema_violation(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(id: RecordId) -> Self {
        Self::NotFound { id }
    }

    /// Creates a commit conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Creates an invalid predicate error.
    pub fn invalid_predicate(message: impl Into<String>) -> Self {
        Self::InvalidPredicate {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Whether this error describes a broken reference or schema rule, as
    /// opposed to an I/O or lifecycle failure.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::SchemaViolation { .. } | Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_errors_are_classified() {
        assert!(CoreError::schema_violation("Library", "missing name").is_integrity());
        assert!(CoreError::not_found(RecordId::new()).is_integrity());
        assert!(!CoreError::StoreClosed.is_integrity());
        assert!(!CoreError::conflict("gone").is_integrity());
    }

    #[test]
    fn display_names_the_entity() {
        let err = CoreError::schema_violation("Music", "unknown field `genre`");
        assert_eq!(
            err.to_string(),
            "schema violation on Music: unknown field `genre`"
        );
    }
}
