//! Predicate expressions.

use crate::error::{CoreError, CoreResult};
use crate::record::{FieldValue, Record, RecordId};
use crate::schema::{EntitySchema, FieldType, Schema};
use std::cmp::Ordering;

/// Whether text operators distinguish letter case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaseSensitivity {
    /// Exact comparison.
    #[default]
    Sensitive,
    /// Compares lowercased text.
    Insensitive,
}

/// Ordering comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// A filter over the records of one entity.
///
/// Predicates are plain values: build them once, validate them against the
/// schema and evaluate them any number of times. Evaluation never changes
/// the records it looks at.
///
/// # Example
///
/// ```rust
/// use cdlab_core::Predicate;
///
/// // Libraries named "Favorites" holding at least one track starting with "A"
/// let p = Predicate::eq("name", "Favorites")
///     .and(Predicate::any("musics", Predicate::begins_with("name", "A")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Predicate {
    /// Matches every record.
    #[default]
    True,

    /// Field equals value. `Null` equals `Null`.
    Eq {
        /// Field name.
        field: String,
        /// Value to match.
        value: FieldValue,
    },

    /// Field differs from value.
    Ne {
        /// Field name.
        field: String,
        /// Value that must not match.
        value: FieldValue,
    },

    /// Text field contains a substring.
    Contains {
        /// Field name.
        field: String,
        /// Substring to look for.
        needle: String,
        /// Case handling.
        case: CaseSensitivity,
    },

    /// Text field starts with a prefix.
    BeginsWith {
        /// Field name.
        field: String,
        /// Required prefix.
        prefix: String,
        /// Case handling.
        case: CaseSensitivity,
    },

    /// Ordered comparison on a text or timestamp field. Null never matches.
    Compare {
        /// Field name.
        field: String,
        /// Operator, with the field on the left.
        op: CompareOp,
        /// Right-hand value.
        value: FieldValue,
    },

    /// Field holds no value.
    IsNull {
        /// Field name.
        field: String,
    },

    /// Relationship contains a specific record.
    RelatedTo {
        /// Relationship name.
        relation: String,
        /// Target identity.
        id: RecordId,
    },

    /// Relationship contains at least one record matching a predicate over
    /// the target entity.
    Any {
        /// Relationship name.
        relation: String,
        /// Predicate over the related records.
        predicate: Box<Predicate>,
    },

    /// All sub-predicates match. Empty matches everything.
    And(Vec<Predicate>),

    /// At least one sub-predicate matches. Empty matches nothing.
    Or(Vec<Predicate>),

    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Case-sensitive substring match.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case: CaseSensitivity::Sensitive,
        }
    }

    /// Case-insensitive substring match.
    pub fn contains_ignore_case(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            needle: needle.into(),
            case: CaseSensitivity::Insensitive,
        }
    }

    /// Case-sensitive prefix match.
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            field: field.into(),
            prefix: prefix.into(),
            case: CaseSensitivity::Sensitive,
        }
    }

    /// Case-insensitive prefix match.
    pub fn begins_with_ignore_case(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            field: field.into(),
            prefix: prefix.into(),
            case: CaseSensitivity::Insensitive,
        }
    }

    /// Ordered comparison.
    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<FieldValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    /// `field <= value`
    pub fn le(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    /// `field >= value`
    pub fn ge(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    /// Field holds no value.
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    /// Relationship contains `id`.
    pub fn related_to(relation: impl Into<String>, id: RecordId) -> Self {
        Self::RelatedTo {
            relation: relation.into(),
            id,
        }
    }

    /// Some record reachable through `relation` matches `predicate`.
    pub fn any(relation: impl Into<String>, predicate: Predicate) -> Self {
        Self::Any {
            relation: relation.into(),
            predicate: Box::new(predicate),
        }
    }

    /// Conjunction of all predicates.
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::And(predicates.into_iter().collect())
    }

    /// Disjunction of all predicates.
    pub fn either(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Or(predicates.into_iter().collect())
    }

    /// `self AND other`, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::True, p) | (p, Self::True) => p,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), p) => {
                left.push(p);
                Self::And(left)
            }
            (p, q) => Self::And(vec![p, q]),
        }
    }

    /// `self OR other`, flattening nested disjunctions.
    #[must_use]
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), p) => {
                left.push(p);
                Self::Or(left)
            }
            (p, q) => Self::Or(vec![p, q]),
        }
    }

    /// `NOT self`
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Self::Not(inner) => *inner,
            p => Self::Not(Box::new(p)),
        }
    }

    /// Checks that every name and value fits `entity`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPredicate` for unknown fields or relationships, values
    /// of the wrong type, text operators on non-text fields and ordered
    /// comparisons on blob or boolean fields.
    pub fn validate(&self, schema: &Schema, entity: &str) -> CoreResult<()> {
        let entity_schema = schema
            .entity(entity)
            .map_err(|_| CoreError::invalid_predicate(format!("unknown entity `{entity}`")))?;

        match self {
            Self::True => Ok(()),
            Self::Eq { field, value } | Self::Ne { field, value } => {
                let ty = field_type(entity_schema, field)?;
                if value.fits(ty) {
                    Ok(())
                } else {
                    Err(CoreError::invalid_predicate(format!(
                        "`{entity}.{field}` is {ty:?}, compared with {value:?}"
                    )))
                }
            }
            Self::Contains { field, .. } | Self::BeginsWith { field, .. } => {
                match field_type(entity_schema, field)? {
                    FieldType::Text => Ok(()),
                    ty => Err(CoreError::invalid_predicate(format!(
                        "text operator on `{entity}.{field}` of type {ty:?}"
                    ))),
                }
            }
            Self::Compare { field, value, .. } => {
                let ty = field_type(entity_schema, field)?;
                if !matches!(ty, FieldType::Text | FieldType::Timestamp) {
                    return Err(CoreError::invalid_predicate(format!(
                        "`{entity}.{field}` of type {ty:?} has no ordering"
                    )));
                }
                if value.is_null() || !value.fits(ty) {
                    return Err(CoreError::invalid_predicate(format!(
                        "`{entity}.{field}` is {ty:?}, compared with {value:?}"
                    )));
                }
                Ok(())
            }
            Self::IsNull { field } => field_type(entity_schema, field).map(|_| ()),
            Self::RelatedTo { relation, .. } => relation_target(entity_schema, relation).map(|_| ()),
            Self::Any {
                relation,
                predicate,
            } => {
                let target = relation_target(entity_schema, relation)?;
                predicate.validate(schema, target)
            }
            Self::And(predicates) | Self::Or(predicates) => predicates
                .iter()
                .try_for_each(|p| p.validate(schema, entity)),
            Self::Not(inner) => inner.validate(schema, entity),
        }
    }

    /// Evaluates the predicate against `record`.
    ///
    /// `resolve` looks up related records for `Any`; records it cannot find
    /// never match.
    pub fn matches(&self, record: &Record, resolve: &dyn Fn(RecordId) -> Option<Record>) -> bool {
        match self {
            Self::True => true,
            Self::Eq { field, value } => record.value(field) == value,
            Self::Ne { field, value } => record.value(field) != value,
            Self::Contains {
                field,
                needle,
                case,
            } => text_test(record.value(field), needle, *case, |hay, n| hay.contains(n)),
            Self::BeginsWith {
                field,
                prefix,
                case,
            } => text_test(record.value(field), prefix, *case, |hay, p| hay.starts_with(p)),
            Self::Compare { field, op, value } => {
                let own = record.value(field);
                own.field_type().is_some()
                    && own.field_type() == value.field_type()
                    && op.holds(own.sort_cmp(value))
            }
            Self::IsNull { field } => record.value(field).is_null(),
            Self::RelatedTo { relation, id } => record.is_related(relation, *id),
            Self::Any {
                relation,
                predicate,
            } => record
                .related(relation)
                .into_iter()
                .filter_map(resolve)
                .any(|related| predicate.matches(&related, resolve)),
            Self::And(predicates) => predicates.iter().all(|p| p.matches(record, resolve)),
            Self::Or(predicates) => predicates.iter().any(|p| p.matches(record, resolve)),
            Self::Not(inner) => !inner.matches(record, resolve),
        }
    }
}

fn field_type(entity: &EntitySchema, field: &str) -> CoreResult<FieldType> {
    entity.field_def(field).map(|def| def.ty).ok_or_else(|| {
        CoreError::invalid_predicate(format!("unknown field `{}.{field}`", entity.name()))
    })
}

fn relation_target<'a>(entity: &'a EntitySchema, relation: &str) -> CoreResult<&'a str> {
    entity
        .relationship_def(relation)
        .map(|def| def.target.as_str())
        .ok_or_else(|| {
            CoreError::invalid_predicate(format!(
                "unknown relationship `{}.{relation}`",
                entity.name()
            ))
        })
}

fn text_test(
    value: &FieldValue,
    pattern: &str,
    case: CaseSensitivity,
    test: impl Fn(&str, &str) -> bool,
) -> bool {
    let Some(text) = value.as_text() else {
        return false;
    };
    match case {
        CaseSensitivity::Sensitive => test(text, pattern),
        CaseSensitivity::Insensitive => test(&text.to_lowercase(), &pattern.to_lowercase()),
    }
}
