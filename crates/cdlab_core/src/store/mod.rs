//! The entity store.
//!
//! The store exclusively owns the canonical version of every record. Each
//! batch of mutations is applied under a single commit lock: validated
//! against the current state, logged as one WAL frame in durable mode, then
//! published. A batch that fails anywhere leaves no trace.

pub(crate) mod graph;
mod mutation;
mod scan;
#[allow(clippy::module_inception)]
mod store;
mod tables;

pub use mutation::{Fields, Links, Mutation};
pub use scan::Scan;
pub use store::EntityStore;
