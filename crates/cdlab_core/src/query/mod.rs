//! Query engine.
//!
//! A [`Query`] names an entity, a [`Predicate`] over its fields and
//! relationships, an optional ordering and an optional limit. Queries are
//! validated against the schema before any record is looked at, so a typo
//! in a field name fails fast with `InvalidPredicate` instead of silently
//! matching nothing.
//!
//! Without sort keys, results come back in store scan order, which is
//! stable for an unchanged store.

mod predicate;
#[allow(clippy::module_inception)]
mod query;

pub use predicate::{CaseSensitivity, CompareOp, Predicate};
pub use query::{Direction, Query, SortKey};
