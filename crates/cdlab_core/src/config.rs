//! Store configuration.

use std::path::{Path, PathBuf};

/// Where a store keeps its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMode {
    /// Records live in memory and are gone when the store is dropped.
    Ephemeral,
    /// Records are logged under the given directory and survive restarts.
    Durable(PathBuf),
}

impl StoreMode {
    /// Durable mode rooted at `path`.
    pub fn durable(path: impl AsRef<Path>) -> Self {
        Self::Durable(path.as_ref().to_path_buf())
    }

    /// Whether this mode survives a process restart.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        matches!(self, Self::Durable(_))
    }
}

/// Configuration applied when a store is set up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a durable store directory is created when missing.
    pub create_if_missing: bool,

    /// Whether the WAL is flushed on every commit.
    pub sync_on_commit: bool,

    /// WAL size in bytes after which a commit triggers a checkpoint
    /// (0 = never).
    pub checkpoint_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            checkpoint_threshold: 4 * 1024 * 1024, // 4 MB
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a missing store directory is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether the WAL is flushed on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic checkpoint threshold in bytes.
    #[must_use]
    pub const fn checkpoint_threshold(mut self, bytes: u64) -> Self {
        self.checkpoint_threshold = bytes;
        self
    }
}
