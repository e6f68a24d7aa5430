//! Read-only access to a published aggregation table.
//!
//! Renderers ask for a group and get one of three answers: the accumulator,
//! the error marker of a group whose fold failed, or "not found". A missing
//! group is an ordinary outcome here, never an error.

use crate::accumulator::AggregationAccumulator;
use crate::error::{Error, Result};
use crate::group_key::GroupKey;
use crate::table::{AggregationTable, Entry, ErrorMarker};
use serde_json::Value;

/// Text renderers show in place of an unavailable value.
pub const PLACEHOLDER: &str = "data unavailable";

/// Outcome of a group lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Healthy accumulator.
    Found(&'a AggregationAccumulator),
    /// The group's fold failed.
    Failed(&'a ErrorMarker),
    /// No record produced this group.
    NotFound,
}

impl<'a> Lookup<'a> {
    /// The accumulator, if found.
    #[must_use]
    pub fn found(self) -> Option<&'a AggregationAccumulator> {
        match self {
            Self::Found(acc) => Some(acc),
            _ => None,
        }
    }

    /// True for [`Lookup::NotFound`].
    #[must_use]
    pub fn is_not_found(self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// Query facade over an [`AggregationTable`].
#[derive(Debug, Clone, Copy)]
pub struct AggregationQueryFacade<'a> {
    table: &'a AggregationTable,
}

impl<'a> AggregationQueryFacade<'a> {
    /// Wraps a table.
    #[must_use]
    pub fn new(table: &'a AggregationTable) -> Self {
        Self { table }
    }

    /// Placeholder text for unavailable values.
    #[must_use]
    pub const fn placeholder() -> &'static str {
        PLACEHOLDER
    }

    /// Looks up a group. The empty key is the grand total.
    #[must_use]
    pub fn get(&self, key: &GroupKey) -> Lookup<'a> {
        match self.table.get(key) {
            Some(Entry::Ready(acc)) => Lookup::Found(acc),
            Some(Entry::Failed(marker)) => Lookup::Failed(marker),
            None => Lookup::NotFound,
        }
    }

    /// Looks up a group, turning the non-found outcomes into errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AggregationNotFound`] for a missing group and
    /// [`Error::FoldType`] for a failed one.
    pub fn require(&self, key: &GroupKey) -> Result<&'a AggregationAccumulator> {
        match self.get(key) {
            Lookup::Found(acc) => Ok(acc),
            Lookup::Failed(marker) => Err(Error::FoldType(marker.error.clone())),
            Lookup::NotFound => Err(Error::AggregationNotFound(key.to_string())),
        }
    }

    /// Resolved aggregate value, or the placeholder string when the group or
    /// aggregate is unavailable.
    #[must_use]
    pub fn value(&self, key: &GroupKey, id: &str) -> Value {
        self.get(key)
            .found()
            .and_then(|acc| acc.value(id))
            .unwrap_or_else(|| Value::String(PLACEHOLDER.to_string()))
    }

    /// Grand total, present when grouping is cumulative or there are no
    /// group levels.
    #[must_use]
    pub fn grand_total(&self) -> Lookup<'a> {
        self.get(&GroupKey::root())
    }

    /// Direct sub-groups of `key` that hold accumulators, in first-seen order.
    #[must_use]
    pub fn children(&self, key: &GroupKey) -> Vec<(GroupKey, Lookup<'a>)> {
        self.table
            .children_of(key)
            .into_iter()
            .map(|id| {
                let lookup = match self.table.entry(id) {
                    Some(Entry::Ready(acc)) => Lookup::Found(acc),
                    Some(Entry::Failed(marker)) => Lookup::Failed(marker),
                    None => Lookup::NotFound,
                };
                (self.table.key_of(id), lookup)
            })
            .collect()
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Every group in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (GroupKey, Lookup<'a>)> + 'a {
        self.table.iter().map(|(key, entry)| {
            let lookup = match entry {
                Entry::Ready(acc) => Lookup::Found(acc),
                Entry::Failed(marker) => Lookup::Failed(marker),
            };
            (key, lookup)
        })
    }
}
