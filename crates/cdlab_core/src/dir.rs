//! Store directory management.
//!
//! A durable store owns one directory:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK        # Advisory lock, one process at a time
//! ├─ wal.log     # Write-ahead log
//! └─ SNAPSHOT    # Every record as of the last checkpoint
//! ```

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::types::SequenceNumber;
use crate::wal::compute_crc32;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const SNAPSHOT_FILE: &str = "SNAPSHOT";
const SNAPSHOT_TEMP: &str = "SNAPSHOT.tmp";

const SNAPSHOT_MAGIC: [u8; 4] = *b"CSNP";
const SNAPSHOT_VERSION: u16 = 1;

/// Every record as of a commit sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    /// Last commit the snapshot includes.
    pub sequence: SequenceNumber,
    /// All live records.
    pub records: Vec<Record>,
}

/// An exclusively locked store directory.
#[derive(Debug)]
pub(crate) struct StoreDir {
    path: PathBuf,
    lock: File,
}

impl StoreDir {
    /// Opens the directory and takes the advisory lock.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` when the directory is missing and may not be
    /// created, `StoreLocked` when another process holds it.
    pub(crate) fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_operation(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            lock,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Reads the last snapshot, `None` for a store never checkpointed.
    ///
    /// # Errors
    ///
    /// `WalCorruption` or `ChecksumMismatch` when the file is damaged.
    pub(crate) fn load_snapshot(&self) -> CoreResult<Option<Snapshot>> {
        let data = match fs::read(self.snapshot_path()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.is_empty() {
            return Ok(None);
        }
        decode_snapshot(&data).map(Some)
    }

    /// Writes a snapshot atomically: temp file, fsync, rename, directory
    /// fsync.
    pub(crate) fn save_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let temp_path = self.path.join(SNAPSHOT_TEMP);
        let data = encode_snapshot(snapshot)?;

        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.snapshot_path())?;
        self.sync_directory()
    }

    /// Removes every store file and the directory itself when it ends up
    /// empty. Releases the lock.
    pub(crate) fn destroy(self) -> CoreResult<()> {
        for name in [WAL_FILE, SNAPSHOT_FILE, SNAPSHOT_TEMP] {
            remove_if_present(&self.path.join(name))?;
        }
        let Self { path, lock } = self;
        fs2::FileExt::unlock(&lock)?;
        drop(lock);
        remove_if_present(&path.join(LOCK_FILE))?;
        // Leave directories holding foreign files alone.
        let _ = fs::remove_dir(&path);
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> CoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// magic (4) + version (2) + crc32 (4) + CBOR body
fn encode_snapshot(snapshot: &Snapshot) -> CoreResult<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(snapshot, &mut body)
        .map_err(|e| CoreError::codec(format!("snapshot: {e}")))?;

    let mut data = Vec::with_capacity(10 + body.len());
    data.extend_from_slice(&SNAPSHOT_MAGIC);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&compute_crc32(&body).to_le_bytes());
    data.extend_from_slice(&body);
    Ok(data)
}

fn decode_snapshot(data: &[u8]) -> CoreResult<Snapshot> {
    if data.len() < 10 || data[0..4] != SNAPSHOT_MAGIC {
        return Err(CoreError::wal_corruption("snapshot header is damaged"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > SNAPSHOT_VERSION {
        return Err(CoreError::wal_corruption(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let stored = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
    let body = &data[10..];
    let computed = compute_crc32(body);
    if stored != computed {
        return Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }
    ciborium::from_reader(body).map_err(|e| CoreError::wal_corruption(format!("snapshot: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldValue, RecordId};
    use crate::schema::{EntitySchema, FieldType};
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let schema = EntitySchema::new("Note").optional("title", FieldType::Text);
        let mut record = Record::blank(RecordId::new(), &schema);
        record.set_value("title", FieldValue::from("kept"));
        Snapshot {
            sequence: SequenceNumber::new(3),
            records: vec![record],
        }
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let dir = StoreDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.path(), path);
    }

    #[test]
    fn open_missing_without_create_fails() {
        let temp = tempdir().unwrap();
        let err = StoreDir::open(&temp.path().join("absent"), false).unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[test]
    fn second_open_is_locked() {
        let temp = tempdir().unwrap();
        let _first = StoreDir::open(temp.path(), true).unwrap();
        let err = StoreDir::open(temp.path(), true).unwrap_err();
        assert!(matches!(err, CoreError::StoreLocked));
    }

    #[test]
    fn snapshot_save_and_load() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        assert!(dir.load_snapshot().unwrap().is_none());

        let snapshot = sample();
        dir.save_snapshot(&snapshot).unwrap();
        assert_eq!(dir.load_snapshot().unwrap(), Some(snapshot));
        assert!(!temp.path().join(SNAPSHOT_TEMP).exists());
    }

    #[test]
    fn damaged_snapshot_is_rejected() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), true).unwrap();
        dir.save_snapshot(&sample()).unwrap();

        let path = temp.path().join(SNAPSHOT_FILE);
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&path, data).unwrap();

        assert!(matches!(
            dir.load_snapshot().unwrap_err(),
            CoreError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn destroy_removes_files_and_releases_lock() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let dir = StoreDir::open(&path, true).unwrap();
        fs::write(dir.wal_path(), b"frames").unwrap();
        dir.save_snapshot(&sample()).unwrap();

        dir.destroy().unwrap();
        assert!(!path.exists());

        let reopened = StoreDir::open(&path, true).unwrap();
        assert!(reopened.load_snapshot().unwrap().is_none());
    }
}
