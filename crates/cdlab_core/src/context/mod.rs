//! Unit-of-work contexts.
//!
//! A [`Context`] stages mutations privately and applies them to the store
//! in one atomic commit. Reads through a context see its own staged
//! changes layered over the latest committed state; other contexts see
//! nothing until the commit lands.
//!
//! ## Merge policy
//!
//! Staged mutations record intent (which properties change, which edges are
//! added) rather than whole records. At commit they are replayed in order
//! against the store as it is at that moment, so properties this context
//! changed win over concurrently committed values while properties it never
//! touched keep the store's latest values. If the replay no longer applies
//! (a record it updates or links was deleted meanwhile), the whole commit is
//! rejected with `Conflict` and the store is unchanged.

#[allow(clippy::module_inception)]
mod context;
mod state;

pub use context::Context;
pub use state::{ContextKind, ContextState};
