//! Query construction and execution.

use crate::error::{CoreError, CoreResult};
use crate::query::Predicate;
use crate::record::{Record, RecordId};
use crate::schema::Schema;
use std::cmp::Ordering;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Smallest first; null values lead.
    #[default]
    Ascending,
    /// Largest first; null values trail.
    Descending,
}

/// One ordering criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    /// Field to sort by.
    pub field: String,
    /// Direction.
    pub direction: Direction,
}

/// A filter, ordering and limit over one entity.
///
/// # Example
///
/// ```rust
/// use cdlab_core::{Direction, Predicate, Query};
///
/// let recent = Query::new("Library")
///     .filter(Predicate::contains("name", "Fav"))
///     .order_by("created_at", Direction::Descending)
///     .limit(10);
/// assert_eq!(recent.entity(), "Library");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    entity: String,
    predicate: Predicate,
    order: Vec<SortKey>,
    limit: Option<usize>,
}

impl Query {
    /// Matches every record of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::True,
            order: Vec::new(),
            limit: None,
        }
    }

    /// Adds a predicate; repeated calls are combined with AND.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = std::mem::take(&mut self.predicate).and(predicate);
        self
    }

    /// Appends a sort key. Earlier keys take precedence.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Queried entity.
    #[must_use]
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Combined predicate.
    #[must_use]
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// Sort keys in precedence order.
    #[must_use]
    pub fn sort_keys(&self) -> &[SortKey] {
        &self.order
    }

    /// Result cap, if any.
    #[must_use]
    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Checks the predicate and sort keys against the schema.
    ///
    /// # Errors
    ///
    /// `InvalidPredicate` for unknown entities or fields, mistyped values
    /// and sort keys on blob fields.
    pub fn validate(&self, schema: &Schema) -> CoreResult<()> {
        self.predicate.validate(schema, &self.entity)?;
        let entity = schema
            .entity(&self.entity)
            .map_err(|_| CoreError::invalid_predicate(format!("unknown entity `{}`", self.entity)))?;
        for key in &self.order {
            let def = entity.field_def(&key.field).ok_or_else(|| {
                CoreError::invalid_predicate(format!(
                    "unknown sort field `{}.{}`",
                    self.entity, key.field
                ))
            })?;
            if !def.ty.is_ordered() {
                return Err(CoreError::invalid_predicate(format!(
                    "cannot sort by `{}.{}` of type {:?}",
                    self.entity, key.field, def.ty
                )));
            }
        }
        Ok(())
    }

    /// Validates, filters, sorts and truncates `candidates`.
    ///
    /// Candidates of other entities are skipped. Ties on every sort key fall
    /// back to identity order so the result is deterministic.
    pub(crate) fn execute<'a>(
        &self,
        schema: &Schema,
        candidates: impl IntoIterator<Item = &'a Record>,
        resolve: &dyn Fn(RecordId) -> Option<Record>,
    ) -> CoreResult<Vec<Record>> {
        self.validate(schema)?;

        let mut matches: Vec<Record> = candidates
            .into_iter()
            .filter(|r| r.entity() == self.entity && self.predicate.matches(r, resolve))
            .cloned()
            .collect();

        if !self.order.is_empty() {
            matches.sort_by(|a, b| self.compare(a, b));
        }
        if let Some(limit) = self.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        self.order
            .iter()
            .map(|key| {
                let ordering = a.value(&key.field).sort_cmp(b.value(&key.field));
                match key.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a.id().cmp(&b.id()))
    }
}
