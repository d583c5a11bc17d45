//! Write-ahead log for durable stores.
//!
//! Every commit that changes the store appends exactly one frame holding
//! the post-image of each record it touched. A frame is written before the
//! commit is acknowledged; on open the log is replayed over the last
//! snapshot.
//!
//! ## Frame Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! The payload is CBOR. The checksum covers header and payload.
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the tail is a crash mid-write and
//!   marks the clean end of the log; the partial frame is ignored.
//! - A checksum mismatch, bad magic, unknown frame type or newer version is
//!   corruption and fails the open.

mod record;
mod writer;

pub(crate) use record::{compute_crc32, WalRecord, WalWrite};
pub(crate) use writer::WalManager;

#[cfg(test)]
pub(crate) use writer::faulty;
