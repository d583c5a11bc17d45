//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Backends are opaque: the store owns every byte layout decision and the
/// backend only promises that `read_at` returns what `append` wrote at the
/// same offset. Implementations must be `Send + Sync` because a store is
/// shared across every context that commits into it.
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::ReadPastEnd`] when the range is not
    /// fully inside the medium.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails when the medium rejects the write.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the medium.
    ///
    /// # Errors
    ///
    /// Fails when the medium rejects the flush.
    fn flush(&mut self) -> StorageResult<()>;

    /// Forces data and metadata onto stable storage.
    ///
    /// # Errors
    ///
    /// Fails when the medium rejects the sync.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes, which is also the next append offset.
    ///
    /// # Errors
    ///
    /// Fails when the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Drops everything past `new_size`.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::InvalidTruncate`] when `new_size`
    /// is larger than the current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole medium.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StorageBackend::size`] and
    /// [`StorageBackend::read_at`].
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).unwrap_or(usize::MAX);
        self.read_at(0, len)
    }

    /// Whether nothing has been appended yet.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`StorageBackend::size`].
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }
}
