//! Record conditions for conditional aggregates and variables.
//!
//! Conditions gate `count_where` / `sum_where` folds. They are plain data,
//! deserializable from a plan file:
//!
//! ```rust,ignore
//! use groupflow_core::condition::Condition;
//!
//! let refunds = Condition::and(vec![
//!     Condition::eq("kind", "refund"),
//!     Condition::gt("amount", 100),
//! ]);
//! ```

use crate::value::{get_field, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A predicate over a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Equality comparison: field == value
    Eq {
        /// Field path (dot notation)
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Not equal comparison: field != value
    Neq {
        /// Field path
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Greater than comparison: field > value
    Gt {
        /// Field path
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Greater than or equal comparison: field >= value
    Gte {
        /// Field path
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Less than comparison: field < value
    Lt {
        /// Field path
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Less than or equal comparison: field <= value
    Lte {
        /// Field path
        field: String,
        /// Value to compare against
        value: Value,
    },
    /// Field value is one of a list
    In {
        /// Field path
        field: String,
        /// Accepted values
        values: Vec<Value>,
    },
    /// String field contains a substring
    Contains {
        /// Field path
        field: String,
        /// Substring to search for
        value: String,
    },
    /// Field is missing or null
    IsNull {
        /// Field path
        field: String,
    },
    /// Field is present and not null
    IsNotNull {
        /// Field path
        field: String,
    },
    /// All conditions hold (true when empty)
    And {
        /// Conditions to AND together
        conditions: Vec<Condition>,
    },
    /// Any condition holds (false when empty)
    Or {
        /// Conditions to OR together
        conditions: Vec<Condition>,
    },
    /// Negation
    Not {
        /// Condition to negate
        condition: Box<Condition>,
    },
}

impl Condition {
    /// Evaluates the condition against a record.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Eq { field, value } => {
                get_field(record, field).is_some_and(|v| values_equal(v, value))
            }
            Self::Neq { field, value } => {
                get_field(record, field).is_none_or(|v| !values_equal(v, value))
            }
            Self::Gt { field, value } => {
                ordering(record, field, value).is_some_and(Ordering::is_gt)
            }
            Self::Gte { field, value } => {
                ordering(record, field, value).is_some_and(Ordering::is_ge)
            }
            Self::Lt { field, value } => {
                ordering(record, field, value).is_some_and(Ordering::is_lt)
            }
            Self::Lte { field, value } => {
                ordering(record, field, value).is_some_and(Ordering::is_le)
            }
            Self::In { field, values } => get_field(record, field)
                .is_some_and(|v| values.iter().any(|candidate| values_equal(v, candidate))),
            Self::Contains { field, value } => get_field(record, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(value.as_str())),
            Self::IsNull { field } => get_field(record, field).is_none_or(Value::is_null),
            Self::IsNotNull { field } => get_field(record, field).is_some_and(|v| !v.is_null()),
            Self::And { conditions } => conditions.iter().all(|c| c.matches(record)),
            Self::Or { conditions } => conditions.iter().any(|c| c.matches(record)),
            Self::Not { condition } => !condition.matches(record),
        }
    }

    /// Creates an equality condition.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a not-equal condition.
    #[must_use]
    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Neq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a greater-than condition.
    #[must_use]
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a greater-than-or-equal condition.
    #[must_use]
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a less-than condition.
    #[must_use]
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates a less-than-or-equal condition.
    #[must_use]
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an IN condition.
    #[must_use]
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Creates a substring condition for string fields.
    #[must_use]
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Contains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Creates an is-null condition.
    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull {
            field: field.into(),
        }
    }

    /// Creates an is-not-null condition.
    #[must_use]
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::IsNotNull {
            field: field.into(),
        }
    }

    /// Creates an AND condition.
    #[must_use]
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And { conditions }
    }

    /// Creates an OR condition.
    #[must_use]
    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::Or { conditions }
    }

    /// Creates a NOT condition.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }
}

/// Numeric values compare numerically, everything else structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => Scalar::natural(a) == Scalar::natural(b),
        _ => a == b,
    }
}

fn ordering(record: &Value, field: &str, value: &Value) -> Option<Ordering> {
    let actual = get_field(record, field)?;
    if actual.is_null() || value.is_null() {
        return None;
    }
    Scalar::natural(actual).try_cmp(&Scalar::natural(value))
}
