//! # CDLab Storage
//!
//! Byte-store backends underneath the CDLab object store.
//!
//! A backend knows nothing about records, schemas or log frames. It holds an
//! append-only sequence of bytes that the core crate interprets. Two
//! backends ship with the crate:
//!
//! - [`InMemoryBackend`] backs ephemeral stores and tests; its bytes vanish
//!   with the process.
//! - [`FileBackend`] backs durable stores; its bytes survive a restart.
//!
//! ```rust
//! use cdlab_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
