//! WAL append and replay.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use cdlab_storage::StorageBackend;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Appends frames to, and replays frames from, a storage backend.
pub(crate) struct WalManager {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_write: bool,
    /// Set when a failed frame could not be cut off the tail.
    damaged: AtomicBool,
}

impl WalManager {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_write,
            damaged: AtomicBool::new(false),
        }
    }

    /// Appends one frame and returns its offset.
    ///
    /// # Errors
    ///
    /// Fails if the payload exceeds 4 GiB or the backend write fails. A
    /// failed append cuts the log back to where it started, so the next
    /// frame lands directly after the last good one. If that cut fails too,
    /// every later append is refused until the store is reopened.
    pub(crate) fn append(&self, record: &WalRecord) -> CoreResult<u64> {
        if self.damaged.load(Ordering::Acquire) {
            return Err(CoreError::wal_corruption(
                "log tail holds a failed frame; reopen the store to recover",
            ));
        }
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("WAL payload exceeds 4 GiB"))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&WAL_MAGIC);
        frame.extend_from_slice(&WAL_VERSION.to_le_bytes());
        frame.push(record.record_type().as_byte());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = compute_crc32(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let mut backend = self.backend.lock();
        let start = backend.size()?;
        let written = backend.append(&frame).and_then(|offset| {
            if self.sync_on_write {
                backend.sync()?;
            } else {
                backend.flush()?;
            }
            Ok(offset)
        });

        match written {
            Ok(offset) => Ok(offset),
            Err(err) => {
                if let Err(cut) = backend.truncate(start) {
                    self.damaged.store(true, Ordering::Release);
                    warn!(offset = start, error = %cut, "could not cut failed WAL frame");
                }
                Err(err.into())
            }
        }
    }

    /// Current log size in bytes.
    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.lock().size()?)
    }

    /// Drops every frame. Called once a snapshot covers them.
    pub(crate) fn clear(&self) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(0)?;
        backend.sync()?;
        Ok(())
    }

    /// Reads every complete frame with its offset.
    #[cfg(test)]
    pub(crate) fn read_all(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        let bytes = self.backend.lock().read_all()?;
        decode_frames(&bytes).map(|(records, _)| records)
    }

    /// Reads every complete frame and cuts a torn tail off the log, so
    /// frames appended afterwards stay reachable.
    ///
    /// # Errors
    ///
    /// `WalCorruption` or `ChecksumMismatch` per the recovery policy.
    pub(crate) fn recover(&self) -> CoreResult<Vec<(u64, WalRecord)>> {
        let mut backend = self.backend.lock();
        let bytes = backend.read_all()?;
        let (records, end) = decode_frames(&bytes)?;
        if end < bytes.len() as u64 {
            warn!(valid = end, size = bytes.len(), "discarding torn WAL tail");
            backend.truncate(end)?;
            backend.sync()?;
        }
        Ok(records)
    }
}

/// Decodes frames up to the first torn one; returns them with the offset
/// where valid data ends.
fn decode_frames(bytes: &[u8]) -> CoreResult<(Vec<(u64, WalRecord)>, u64)> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while bytes.len() - pos >= HEADER_SIZE {
        let header = &bytes[pos..pos + HEADER_SIZE];
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!("invalid magic at offset {pos}")));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {pos}"
            )));
        }
        let record_type = WalRecordType::from_byte(header[6]).ok_or_else(|| {
            CoreError::wal_corruption(format!("unknown frame type {} at offset {pos}", header[6]))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if bytes.len() - pos < total {
            // Torn write at the tail.
            break;
        }

        let payload_end = pos + HEADER_SIZE + payload_len;
        let stored = u32::from_le_bytes([
            bytes[payload_end],
            bytes[payload_end + 1],
            bytes[payload_end + 2],
            bytes[payload_end + 3],
        ]);
        let computed = compute_crc32(&bytes[pos..payload_end]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let record = WalRecord::decode_payload(record_type, &bytes[pos + HEADER_SIZE..payload_end])?;
        records.push((pos as u64, record));
        pos += total;
    }

    Ok((records, pos as u64))
}
