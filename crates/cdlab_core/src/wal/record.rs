//! WAL frame contents.

use crate::error::{CoreError, CoreResult};
use crate::record::{Record, RecordId};
use crate::types::SequenceNumber;
use serde::{Deserialize, Serialize};

/// Magic bytes opening every frame.
pub(crate) const WAL_MAGIC: [u8; 4] = *b"CWAL";

/// Current frame format version.
pub(crate) const WAL_VERSION: u16 = 1;

/// Type of a WAL frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum WalRecordType {
    /// A committed batch of record writes.
    Commit = 1,
}

impl WalRecordType {
    pub(crate) fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Commit),
            _ => None,
        }
    }

    pub(crate) const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Net effect of a commit on one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum WalWrite {
    /// The record's new version.
    Put(Record),
    /// The record no longer exists.
    Delete {
        /// Removed identity.
        id: RecordId,
    },
}

/// One logged operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WalRecord {
    /// A commit and everything it wrote.
    Commit {
        /// Sequence assigned to the commit.
        sequence: SequenceNumber,
        /// Post-images in application order.
        writes: Vec<WalWrite>,
    },
}

#[derive(Serialize, Deserialize)]
struct CommitPayload {
    sequence: SequenceNumber,
    writes: Vec<WalWrite>,
}

impl WalRecord {
    pub(crate) fn record_type(&self) -> WalRecordType {
        match self {
            Self::Commit { .. } => WalRecordType::Commit,
        }
    }

    pub(crate) fn sequence(&self) -> SequenceNumber {
        match self {
            Self::Commit { sequence, .. } => *sequence,
        }
    }

    /// Serializes the payload, without the frame envelope.
    pub(crate) fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Commit { sequence, writes } => {
                let payload = CommitPayload {
                    sequence: *sequence,
                    writes: writes.clone(),
                };
                ciborium::into_writer(&payload, &mut buf)
                    .map_err(|e| CoreError::codec(format!("WAL payload: {e}")))?;
            }
        }
        Ok(buf)
    }

    /// Deserializes a payload of the given type.
    pub(crate) fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        match record_type {
            WalRecordType::Commit => {
                let CommitPayload { sequence, writes } = ciborium::from_reader(payload)
                    .map_err(|e| CoreError::wal_corruption(format!("undecodable commit: {e}")))?;
                Ok(Self::Commit { sequence, writes })
            }
        }
    }
}

/// Computes the IEEE CRC32 of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 == 0 {
                    crc >> 1
                } else {
                    (crc >> 1) ^ 0xEDB8_8320
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let crc = data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    });
    !crc
}
