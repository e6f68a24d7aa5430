//! Per-group streaming accumulators.
//!
//! Every aggregate keeps O(1) state and is updated once per matching record
//! with an online algorithm, so a group costs the same memory whether it sees
//! ten records or ten billion. The aggregate list is compiled once into an
//! [`AggregateProgram`]; each record is evaluated against the program once
//! and the resulting inputs are applied to every entry the record belongs to.

use crate::condition::Condition;
use crate::error::FoldError;
use crate::plan::{AggregateKind, AggregateSpec};
use crate::value::{as_number, describe, get_field, number_to_json, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A value tagged with the sequence number of the record it came from.
///
/// Carrying the sequence number keeps `first`/`last` mergeable across
/// independently built accumulators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequenced {
    /// 1-based position of the record in the stream.
    pub seq: u64,
    /// Field value.
    pub value: Value,
}

/// Running state of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregateState {
    /// Rows or non-null values.
    Count {
        /// Running count.
        n: u64,
    },
    /// Running sum.
    Sum {
        /// Sum of numeric inputs.
        total: f64,
        /// Number of numeric inputs.
        n: u64,
    },
    /// Running average, resolved on read.
    Avg {
        /// Sum of numeric inputs.
        total: f64,
        /// Number of numeric inputs.
        n: u64,
    },
    /// Running minimum.
    Min {
        /// Smallest value so far.
        value: Option<Scalar>,
    },
    /// Running maximum.
    Max {
        /// Largest value so far.
        value: Option<Scalar>,
    },
    /// Earliest non-null value.
    First {
        /// Value and its record sequence number.
        value: Option<Sequenced>,
    },
    /// Latest non-null value.
    Last {
        /// Value and its record sequence number.
        value: Option<Sequenced>,
    },
    /// Rows matching a condition.
    CountWhere {
        /// Running count.
        n: u64,
    },
    /// Sum over rows matching a condition.
    SumWhere {
        /// Running sum.
        total: f64,
    },
}

impl AggregateState {
    fn initial(kind: AggregateKind) -> Self {
        match kind {
            AggregateKind::Count => Self::Count { n: 0 },
            AggregateKind::Sum => Self::Sum { total: 0.0, n: 0 },
            AggregateKind::Avg => Self::Avg { total: 0.0, n: 0 },
            AggregateKind::Min => Self::Min { value: None },
            AggregateKind::Max => Self::Max { value: None },
            AggregateKind::First => Self::First { value: None },
            AggregateKind::Last => Self::Last { value: None },
            AggregateKind::CountWhere => Self::CountWhere { n: 0 },
            AggregateKind::SumWhere => Self::SumWhere { total: 0.0 },
        }
    }

    /// Resolved output value. Empty sums, averages and extremes are null.
    #[must_use]
    pub fn resolve(&self) -> Value {
        match self {
            Self::Count { n } | Self::CountWhere { n } => Value::from(*n),
            Self::Sum { total, n } => {
                if *n > 0 {
                    number_to_json(*total)
                } else {
                    Value::Null
                }
            }
            Self::Avg { total, n } => {
                if *n > 0 {
                    number_to_json(*total / *n as f64)
                } else {
                    Value::Null
                }
            }
            Self::Min { value } | Self::Max { value } => {
                value.as_ref().map_or(Value::Null, Scalar::to_json)
            }
            Self::First { value } | Self::Last { value } => {
                value.as_ref().map_or(Value::Null, |s| s.value.clone())
            }
            Self::SumWhere { total } => number_to_json(*total),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct AggregateOp {
    kind: AggregateKind,
    field: Option<String>,
    condition: Option<Condition>,
}

/// Input of one aggregate for one record.
#[derive(Debug, Clone)]
pub(crate) enum Input<'r> {
    /// Nothing to fold.
    Skip,
    /// Count one.
    Row,
    /// Numeric input.
    Number(f64),
    /// Comparable input for min/max.
    Scalar(Scalar),
    /// Raw input for first/last.
    Value(&'r Value),
}

/// Aggregate list compiled once per run and shared by every accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateProgram {
    ids: Arc<[String]>,
    ops: Vec<AggregateOp>,
}

impl AggregateProgram {
    /// Compiles validated aggregate specs.
    #[must_use]
    pub fn compile(specs: &[AggregateSpec]) -> Self {
        let ids: Vec<String> = specs.iter().map(AggregateSpec::resolved_id).collect();
        let ops = specs
            .iter()
            .map(|spec| AggregateOp {
                kind: spec.kind,
                field: spec.field.clone(),
                condition: spec.condition.clone(),
            })
            .collect();
        Self {
            ids: ids.into(),
            ops,
        }
    }

    /// Aggregate ids in configuration order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when no aggregate is configured (rows are still counted).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Evaluates every aggregate's input for one record.
    ///
    /// # Errors
    ///
    /// Returns [`FoldError::NotNumeric`] when a numeric aggregate reads a
    /// non-null, non-numeric value.
    pub(crate) fn evaluate<'r>(&self, record: &'r Value) -> Result<Vec<Input<'r>>, FoldError> {
        self.ops
            .iter()
            .zip(self.ids.iter())
            .map(|(op, id)| op.evaluate(id, record))
            .collect()
    }
}

impl AggregateOp {
    fn field_value<'r>(&self, record: &'r Value) -> Option<&'r Value> {
        self.field
            .as_deref()
            .and_then(|path| get_field(record, path))
            .filter(|v| !v.is_null())
    }

    fn numeric<'r>(&self, id: &str, record: &'r Value) -> Result<Input<'r>, FoldError> {
        match self.field_value(record) {
            None => Ok(Input::Skip),
            Some(v) => as_number(v)
                .map(Input::Number)
                .ok_or_else(|| FoldError::NotNumeric {
                    target: id.to_string(),
                    field: self.field.clone().unwrap_or_default(),
                    found: describe(v),
                }),
        }
    }

    fn evaluate<'r>(&self, id: &str, record: &'r Value) -> Result<Input<'r>, FoldError> {
        let passes = self
            .condition
            .as_ref()
            .is_none_or(|condition| condition.matches(record));

        Ok(match self.kind {
            AggregateKind::Count | AggregateKind::CountWhere => {
                if !passes || (self.field.is_some() && self.field_value(record).is_none()) {
                    Input::Skip
                } else {
                    Input::Row
                }
            }
            AggregateKind::Sum | AggregateKind::Avg => return self.numeric(id, record),
            AggregateKind::SumWhere => {
                if passes {
                    return self.numeric(id, record);
                }
                Input::Skip
            }
            AggregateKind::Min | AggregateKind::Max => self
                .field_value(record)
                .map_or(Input::Skip, |v| Input::Scalar(Scalar::natural(v))),
            AggregateKind::First | AggregateKind::Last => {
                self.field_value(record).map_or(Input::Skip, Input::Value)
            }
        })
    }
}

/// Aggregates of one group entry.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationAccumulator {
    ids: Arc<[String]>,
    count: u64,
    states: Vec<AggregateState>,
}

impl AggregationAccumulator {
    /// Creates an empty accumulator for a program.
    #[must_use]
    pub fn new(program: &AggregateProgram) -> Self {
        Self {
            ids: Arc::clone(&program.ids),
            count: 0,
            states: program
                .ops
                .iter()
                .map(|op| AggregateState::initial(op.kind))
                .collect(),
        }
    }

    /// Applies one record's evaluated inputs.
    ///
    /// Comparability is checked before anything is mutated, so a failed
    /// apply leaves the accumulator unchanged.
    pub(crate) fn apply(&mut self, inputs: &[Input<'_>], seq: u64) -> Result<(), FoldError> {
        for ((state, input), id) in self.states.iter().zip(inputs).zip(self.ids.iter()) {
            if let (
                AggregateState::Min { value: Some(current) }
                | AggregateState::Max { value: Some(current) },
                Input::Scalar(incoming),
            ) = (state, input)
            {
                if current.try_cmp(incoming).is_none() {
                    return Err(FoldError::Incomparable {
                        target: id.clone(),
                        current: current.type_name().to_string(),
                        found: incoming.type_name().to_string(),
                    });
                }
            }
        }

        self.count += 1;
        for (state, input) in self.states.iter_mut().zip(inputs) {
            match (state, input) {
                (_, Input::Skip) => {}
                (AggregateState::Count { n } | AggregateState::CountWhere { n }, Input::Row) => {
                    *n += 1;
                }
                (
                    AggregateState::Sum { total, n } | AggregateState::Avg { total, n },
                    Input::Number(x),
                ) => {
                    *total += x;
                    *n += 1;
                }
                (AggregateState::SumWhere { total }, Input::Number(x)) => *total += x,
                (AggregateState::Min { value }, Input::Scalar(incoming)) => {
                    if value.as_ref().is_none_or(|current| incoming.try_cmp(current).is_some_and(|o| o.is_lt())) {
                        *value = Some(incoming.clone());
                    }
                }
                (AggregateState::Max { value }, Input::Scalar(incoming)) => {
                    if value.as_ref().is_none_or(|current| incoming.try_cmp(current).is_some_and(|o| o.is_gt())) {
                        *value = Some(incoming.clone());
                    }
                }
                (AggregateState::First { value }, Input::Value(v)) => {
                    if value.is_none() {
                        *value = Some(Sequenced {
                            seq,
                            value: (*v).clone(),
                        });
                    }
                }
                (AggregateState::Last { value }, Input::Value(v)) => {
                    *value = Some(Sequenced {
                        seq,
                        value: (*v).clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Number of records folded into this group.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Aggregate ids in configuration order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Raw state of an aggregate.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<&AggregateState> {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .map(|i| &self.states[i])
    }

    /// Sum of a `sum` or `sum_where` aggregate. `None` for an empty sum.
    #[must_use]
    pub fn sum(&self, id: &str) -> Option<f64> {
        match self.state(id)? {
            AggregateState::Sum { total, n } if *n > 0 => Some(*total),
            AggregateState::SumWhere { total } => Some(*total),
            _ => None,
        }
    }

    /// Average of an `avg` aggregate. `None` when no value was folded.
    #[must_use]
    pub fn avg(&self, id: &str) -> Option<f64> {
        match self.state(id)? {
            AggregateState::Avg { total, n } if *n > 0 => Some(*total / *n as f64),
            _ => None,
        }
    }

    /// Minimum of a `min` aggregate.
    #[must_use]
    pub fn min(&self, id: &str) -> Option<&Scalar> {
        match self.state(id)? {
            AggregateState::Min { value } => value.as_ref(),
            _ => None,
        }
    }

    /// Maximum of a `max` aggregate.
    #[must_use]
    pub fn max(&self, id: &str) -> Option<&Scalar> {
        match self.state(id)? {
            AggregateState::Max { value } => value.as_ref(),
            _ => None,
        }
    }

    /// First non-null value of a `first` aggregate.
    #[must_use]
    pub fn first(&self, id: &str) -> Option<&Value> {
        match self.state(id)? {
            AggregateState::First { value } => value.as_ref().map(|s| &s.value),
            _ => None,
        }
    }

    /// Last non-null value of a `last` aggregate.
    #[must_use]
    pub fn last(&self, id: &str) -> Option<&Value> {
        match self.state(id)? {
            AggregateState::Last { value } => value.as_ref().map(|s| &s.value),
            _ => None,
        }
    }

    /// Count of a `count` or `count_where` aggregate.
    #[must_use]
    pub fn counted(&self, id: &str) -> Option<u64> {
        match self.state(id)? {
            AggregateState::Count { n } | AggregateState::CountWhere { n } => Some(*n),
            _ => None,
        }
    }

    /// Count of a `count_where` aggregate.
    #[must_use]
    pub fn conditional_count(&self, id: &str) -> Option<u64> {
        match self.state(id)? {
            AggregateState::CountWhere { n } => Some(*n),
            _ => None,
        }
    }

    /// Sum of a `sum_where` aggregate.
    #[must_use]
    pub fn conditional_sum(&self, id: &str) -> Option<f64> {
        match self.state(id)? {
            AggregateState::SumWhere { total } => Some(*total),
            _ => None,
        }
    }

    /// Resolved JSON value of an aggregate.
    #[must_use]
    pub fn value(&self, id: &str) -> Option<Value> {
        self.state(id).map(AggregateState::resolve)
    }

    /// `(id, resolved value)` pairs in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> + '_ {
        self.ids
            .iter()
            .zip(&self.states)
            .map(|(id, state)| (id.as_str(), state.resolve()))
    }

    /// Merges another accumulator built from the same program.
    ///
    /// Count, sum, avg, min, max and the conditional aggregates combine
    /// associatively and commutatively; first/last keep the value with the
    /// lowest/highest record sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`FoldError::Incomparable`] when min/max values of different
    /// types meet. `self` is unchanged in that case.
    pub fn merge(&mut self, other: &Self) -> Result<(), FoldError> {
        debug_assert_eq!(self.ids, other.ids, "merging accumulators of different programs");

        for ((mine, theirs), id) in self.states.iter().zip(&other.states).zip(self.ids.iter()) {
            if let (
                AggregateState::Min { value: Some(a) } | AggregateState::Max { value: Some(a) },
                AggregateState::Min { value: Some(b) } | AggregateState::Max { value: Some(b) },
            ) = (mine, theirs)
            {
                if a.try_cmp(b).is_none() {
                    return Err(FoldError::Incomparable {
                        target: id.clone(),
                        current: a.type_name().to_string(),
                        found: b.type_name().to_string(),
                    });
                }
            }
        }

        self.count += other.count;
        for (mine, theirs) in self.states.iter_mut().zip(&other.states) {
            match (mine, theirs) {
                (AggregateState::Count { n }, AggregateState::Count { n: m })
                | (AggregateState::CountWhere { n }, AggregateState::CountWhere { n: m }) => {
                    *n += m;
                }
                (
                    AggregateState::Sum { total, n },
                    AggregateState::Sum { total: t, n: m },
                )
                | (
                    AggregateState::Avg { total, n },
                    AggregateState::Avg { total: t, n: m },
                ) => {
                    *total += t;
                    *n += m;
                }
                (AggregateState::SumWhere { total }, AggregateState::SumWhere { total: t }) => {
                    *total += t;
                }
                (AggregateState::Min { value }, AggregateState::Min { value: Some(b) }) => {
                    if value.as_ref().is_none_or(|a| b.try_cmp(a).is_some_and(|o| o.is_lt())) {
                        *value = Some(b.clone());
                    }
                }
                (AggregateState::Max { value }, AggregateState::Max { value: Some(b) }) => {
                    if value.as_ref().is_none_or(|a| b.try_cmp(a).is_some_and(|o| o.is_gt())) {
                        *value = Some(b.clone());
                    }
                }
                (AggregateState::First { value }, AggregateState::First { value: Some(b) }) => {
                    if value.as_ref().is_none_or(|a| b.seq < a.seq) {
                        *value = Some(b.clone());
                    }
                }
                (AggregateState::Last { value }, AggregateState::Last { value: Some(b) }) => {
                    if value.as_ref().is_none_or(|a| b.seq > a.seq) {
                        *value = Some(b.clone());
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Converts to a JSON object of `id → resolved value`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .iter()
            .map(|(id, value)| (id.to_string(), value))
            .collect();
        Value::Object(map)
    }
}
