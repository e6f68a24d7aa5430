//! # `groupflow` Core
//!
//! Single-pass streaming group aggregation.
//!
//! `groupflow` consumes an ordered record stream of any length and produces
//! per-group accumulators in memory proportional to the number of distinct
//! groups, never to the number of records. In the same pass it tracks report
//! variables that reset per report, page, group level or record, detects
//! multi-level group breaks, and optionally keeps a reservoir sample.
//!
//! ## Features
//!
//! - **Bounded memory**: O(1) state per aggregate per group
//! - **Nested grouping**: keys interned per level, cumulative subtotals
//! - **Report variables**: sum/count/avg/min/max/conditional/custom folds
//! - **Group footers**: emitted at every break, deepest level first
//! - **Isolated failures**: a bad value marks one group, the run continues
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use groupflow_core::{AggregateSpec, AggregationPlan, GroupDefinition, GroupKey, StreamAggregator, VecSource};
//! use serde_json::json;
//!
//! let plan = AggregationPlan::new()
//!     .with_group(GroupDefinition::new("region", 1, ["region"]))
//!     .with_aggregate(AggregateSpec::sum("amt"))
//!     .with_aggregate(AggregateSpec::count());
//!
//! let mut source = VecSource::new(vec![
//!     json!({"region": "A", "amt": 10}),
//!     json!({"region": "A", "amt": 5}),
//!     json!({"region": "B", "amt": 7}),
//! ]);
//!
//! let result = StreamAggregator::new(plan)?.run(&mut source)?;
//! let a = result.facade().require(&GroupKey::of(["A"]))?;
//! assert_eq!(a.sum("sum_amt"), Some(15.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // u64 counts averaged as f64
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::derive_partial_eq_without_eq)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::use_self)]

pub mod accumulator;
#[cfg(test)]
mod accumulator_tests;
pub mod breaks;
pub mod condition;
pub mod config;
pub mod error;
#[cfg(test)]
mod error_tests;
pub mod facade;
pub mod group_key;
pub mod plan;
#[cfg(test)]
mod plan_tests;
pub mod sample;
pub mod source;
pub mod stream;
pub mod table;
pub mod value;
#[cfg(test)]
mod value_tests;
pub mod variables;

pub use accumulator::{AggregateProgram, AggregationAccumulator};
pub use breaks::{BreakLevel, GroupBreakDetector};
pub use condition::Condition;
pub use config::{ConfigError, GroupflowConfig};
pub use error::{Error, FoldError, Result};
pub use facade::{AggregationQueryFacade, Lookup, PLACEHOLDER};
pub use group_key::{GroupKey, GroupKeyExtractor, LevelKey};
pub use plan::{
    AggregateKind, AggregateSpec, AggregationPlan, CardinalityWarning, GroupDefinition,
    ResetScope, SampleOptions, SortDirection, SourceExpr, VariableDef, VariableKind,
};
pub use sample::ReservoirSample;
pub use source::{IterSource, JsonLinesSource, RecordBatch, RecordSource, SinglePass, VecSource};
pub use stream::{
    AggregationResult, AggregatorOptions, CancellationToken, DiscardFooters, FooterSink,
    GroupFooter, RunState, RunStats, Step, StreamAggregator,
};
pub use table::{AggregationTable, Entry, ErrorMarker, TableStats};
pub use value::{FieldType, Record, Scalar};
pub use variables::{CustomFold, CustomFoldRegistry, VariableAccumulator, VariableSnapshot};
