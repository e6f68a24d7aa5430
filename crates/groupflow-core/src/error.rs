//! Error types for `groupflow`.
//!
//! Fatal errors abort a run and surface to the caller. Per-group fold errors
//! ([`FoldError`]) are isolated: the aggregation table records them as
//! [`ErrorMarker`](crate::table::ErrorMarker)s and the run continues.
//! Error codes follow the pattern `GFLOW-XXX`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for `groupflow` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running an aggregation.
#[derive(Error, Debug)]
pub enum Error {
    /// The upstream record source failed (GFLOW-001). Fatal.
    #[error("[GFLOW-001] Record source error: {0}")]
    QuerySource(String),

    /// No accumulator exists for the requested group key (GFLOW-002).
    ///
    /// Only produced when a caller explicitly asks for it; lookups through the
    /// query facade return `Lookup::NotFound` instead.
    #[error("[GFLOW-002] No aggregation for group '{0}'")]
    AggregationNotFound(String),

    /// An aggregate expression met an incompatible value (GFLOW-003).
    #[error("[GFLOW-003] Fold type error: {0}")]
    FoldType(#[from] FoldError),

    /// The record source was iterated after it reported end of stream (GFLOW-004).
    ///
    /// This is a programming error and is always fatal.
    #[error("[GFLOW-004] Record source '{0}' was consumed twice")]
    DoubleConsumption(String),

    /// The aggregation plan is structurally invalid (GFLOW-005).
    #[error("[GFLOW-005] Invalid aggregation plan: {0}")]
    InvalidPlan(String),

    /// Engine configuration error (GFLOW-006).
    #[error("[GFLOW-006] Configuration error: {0}")]
    Config(String),

    /// More distinct groups were observed than the configured hard limit (GFLOW-007).
    #[error("[GFLOW-007] Too many groups (limit: {limit})")]
    GroupLimitExceeded {
        /// Configured maximum number of table entries.
        limit: usize,
    },

    /// The run was cancelled between batches (GFLOW-008).
    #[error("[GFLOW-008] Aggregation cancelled after {records} records")]
    Cancelled {
        /// Records folded before cancellation took effect.
        records: u64,
    },

    /// An operation was attempted in the wrong run state (GFLOW-009).
    #[error("[GFLOW-009] Invalid state: {0}")]
    InvalidState(String),

    /// IO error (GFLOW-010).
    #[error("[GFLOW-010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error (GFLOW-011).
    #[error("[GFLOW-011] Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns the error code (e.g., "GFLOW-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::QuerySource(_) => "GFLOW-001",
            Self::AggregationNotFound(_) => "GFLOW-002",
            Self::FoldType(_) => "GFLOW-003",
            Self::DoubleConsumption(_) => "GFLOW-004",
            Self::InvalidPlan(_) => "GFLOW-005",
            Self::Config(_) => "GFLOW-006",
            Self::GroupLimitExceeded { .. } => "GFLOW-007",
            Self::Cancelled { .. } => "GFLOW-008",
            Self::InvalidState(_) => "GFLOW-009",
            Self::Io(_) => "GFLOW-010",
            Self::Serialization(_) => "GFLOW-011",
        }
    }

    /// Returns true if this error aborts the whole run.
    ///
    /// Missing groups and per-group fold errors only affect a single group and
    /// are rendered as placeholders downstream.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::AggregationNotFound(_) | Self::FoldType(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// A value that an aggregate or variable fold cannot accept.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FoldError {
    /// A numeric fold met a non-numeric value.
    #[error("'{target}' expects a number at '{field}', found {found}")]
    NotNumeric {
        /// Aggregate id or variable name.
        target: String,
        /// Field path that was read.
        field: String,
        /// Description of the offending value.
        found: String,
    },

    /// A min/max fold met values of different types.
    #[error("'{target}' cannot compare {current} with {found}")]
    Incomparable {
        /// Aggregate id or variable name.
        target: String,
        /// Type of the value already held.
        current: String,
        /// Type of the incoming value.
        found: String,
    },

    /// A registered custom fold rejected its input.
    #[error("custom fold '{name}' failed for '{target}': {message}")]
    Custom {
        /// Variable name.
        target: String,
        /// Registered fold name.
        name: String,
        /// Message returned by the fold.
        message: String,
    },
}

impl FoldError {
    /// Aggregate id or variable name the error belongs to.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::NotNumeric { target, .. }
            | Self::Incomparable { target, .. }
            | Self::Custom { target, .. } => target,
        }
    }
}
