//! Single-pass aggregation driver.
//!
//! [`StreamAggregator`] pulls bounded batches from a [`RecordSource`] and, for
//! every record:
//!
//! 1. extracts the group key,
//! 2. detects the break level against the previous key and, on a break,
//!    emits group footers deepest level first and resets the variables of
//!    each closed level,
//! 3. folds the record into the aggregation table, the report variables and
//!    the optional reservoir sample.
//!
//! When the source is exhausted every open level is flushed and the table,
//! the final variable snapshot and the sample are published together as one
//! [`AggregationResult`].
//!
//! ```text
//! Idle ──start──▶ Running ──end of stream──▶ Draining ──finish──▶ Completed
//!  │                 │ │                          │
//!  └──cancel──┐      │ └──────── error ───────────┴──────▶ Failed
//!             ▼      ▼
//!          Cancelled ◀── cancel (checked between batches)
//! ```

use crate::accumulator::AggregateProgram;
use crate::breaks::{BreakLevel, GroupBreakDetector};
use crate::config::{
    GroupflowConfig, DEFAULT_BATCH_SIZE, DEFAULT_CARDINALITY_CEILING, DEFAULT_SAMPLE_SEED,
    DEFAULT_SAMPLE_SIZE,
};
use crate::error::{Error, Result};
use crate::facade::AggregationQueryFacade;
use crate::group_key::{GroupKey, GroupKeyExtractor};
use crate::plan::{AggregationPlan, CardinalityWarning, ResetScope};
use crate::sample::ReservoirSample;
use crate::source::RecordSource;
use crate::table::{AggregationTable, EntryId};
use crate::variables::{CustomFoldRegistry, VariableAccumulator, VariableSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, trace, warn};

/// Lifecycle of one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Configured, nothing pulled yet.
    Idle,
    /// Pulling and folding batches.
    Running,
    /// Source exhausted, final flush pending.
    Draining,
    /// Result published.
    Completed,
    /// Aborted by a fatal error.
    Failed,
    /// Stopped by a cancellation request.
    Cancelled,
}

impl RunState {
    /// True for `Completed`, `Failed` and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Shared flag that stops a run at the next batch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Engine tuning for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Records pulled per batch.
    pub batch_size: usize,
    /// Hard cap on table entries.
    pub max_groups: Option<usize>,
    /// Declared-cardinality ceiling for the pre-run warning.
    pub cardinality_ceiling: u64,
    /// Reservoir capacity for plans that do not size their sample.
    pub sample_size: usize,
    /// Sample seed for plans that do not set one.
    pub sample_seed: u64,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_groups: None,
            cardinality_ceiling: DEFAULT_CARDINALITY_CEILING,
            sample_size: DEFAULT_SAMPLE_SIZE,
            sample_seed: DEFAULT_SAMPLE_SEED,
        }
    }
}

impl AggregatorOptions {
    /// Takes the engine and sample sections of a configuration.
    #[must_use]
    pub fn from_config(config: &GroupflowConfig) -> Self {
        Self {
            batch_size: config.engine.batch_size,
            max_groups: config.engine.max_groups,
            cardinality_ceiling: config.engine.cardinality_ceiling,
            sample_size: config.sample.sample_size,
            sample_seed: config.sample.seed,
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the group limit.
    #[must_use]
    pub fn with_max_groups(mut self, max_groups: usize) -> Self {
        self.max_groups = Some(max_groups);
        self
    }
}

/// Variables of a closed group, emitted at a break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupFooter {
    /// Level that closed.
    pub level: usize,
    /// Name of the group definition.
    pub group: String,
    /// Key prefix of the closed group.
    pub key: GroupKey,
    /// Variable values before the level's reset.
    pub snapshot: VariableSnapshot,
}

/// Receives footers in break order.
pub trait FooterSink {
    /// Whether footers should be built at all.
    fn wants_footers(&self) -> bool {
        true
    }

    /// Receives one footer.
    fn emit(&mut self, footer: GroupFooter);
}

impl FooterSink for Vec<GroupFooter> {
    fn emit(&mut self, footer: GroupFooter) {
        self.push(footer);
    }
}

/// Sink that drops footers without building them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardFooters;

impl FooterSink for DiscardFooters {
    fn wants_footers(&self) -> bool {
        false
    }

    fn emit(&mut self, _footer: GroupFooter) {}
}

/// Outcome of one [`StreamAggregator::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// More batches follow.
    Continue,
    /// The source is exhausted; call [`StreamAggregator::finish`].
    EndOfStream,
}

/// Counters of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Batches pulled.
    pub batches: u64,
    /// Table entries.
    pub groups: usize,
    /// Error-marked entries.
    pub failed_groups: usize,
    /// Groups that reappeared after closing.
    pub revisited_groups: u64,
    /// Key construction operations.
    pub key_operations: u64,
}

/// Everything a completed run publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationResult {
    /// Per-group accumulators.
    pub table: AggregationTable,
    /// Variables at end of stream, before the final flush.
    pub variables_final: VariableSnapshot,
    /// Reservoir sample, empty unless sampling was enabled.
    pub sample: Vec<Value>,
    /// Records read.
    pub record_count: u64,
    /// Pre-run cardinality warnings.
    pub warnings: Vec<CardinalityWarning>,
    /// Run counters.
    pub stats: RunStats,
}

impl AggregationResult {
    /// Read-only accessor over the table.
    #[must_use]
    pub fn facade(&self) -> AggregationQueryFacade<'_> {
        AggregationQueryFacade::new(&self.table)
    }

    /// Converts the whole result to JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "record_count": self.record_count,
            "groups": self.table.to_json(),
            "variables": serde_json::to_value(&self.variables_final).unwrap_or(Value::Null),
            "sample": self.sample,
            "warnings": self.warnings.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "stats": serde_json::to_value(self.stats).unwrap_or(Value::Null),
        })
    }
}

/// Single-pass streaming aggregation over one record source.
pub struct StreamAggregator {
    plan: AggregationPlan,
    options: AggregatorOptions,
    extractor: GroupKeyExtractor,
    table: Option<AggregationTable>,
    variables: VariableAccumulator,
    detector: GroupBreakDetector,
    open_path: Vec<EntryId>,
    sample: Option<ReservoirSample>,
    record_count: u64,
    batches: u64,
    state: RunState,
    token: CancellationToken,
    warnings: Vec<CardinalityWarning>,
    started: Option<Instant>,
}

impl StreamAggregator {
    /// Creates an aggregator with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlan`] if the plan is invalid.
    pub fn new(plan: AggregationPlan) -> Result<Self> {
        Self::with_options(plan, AggregatorOptions::default())
    }

    /// Creates an aggregator with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlan`] if the plan is invalid and
    /// [`Error::Config`] for a zero batch size.
    pub fn with_options(plan: AggregationPlan, options: AggregatorOptions) -> Result<Self> {
        Self::with_custom_folds(plan, options, &CustomFoldRegistry::new())
    }

    /// Creates an aggregator whose `custom` variables resolve against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlan`] if the plan is invalid or names an
    /// unregistered fold, and [`Error::Config`] for a zero batch size.
    pub fn with_custom_folds(
        plan: AggregationPlan,
        options: AggregatorOptions,
        registry: &CustomFoldRegistry,
    ) -> Result<Self> {
        plan.validate()?;
        if options.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_string()));
        }

        let depth = plan.depth();
        let warnings: Vec<CardinalityWarning> = plan
            .check_cardinality(options.cardinality_ceiling)
            .into_iter()
            .collect();
        for warning in &warnings {
            warn!("Cardinality check: {warning}");
        }

        let table = AggregationTable::new(
            AggregateProgram::compile(&plan.aggregates),
            depth,
            plan.cumulative,
        )
        .with_max_groups(options.max_groups);
        let variables = VariableAccumulator::new(&plan.variables, depth, registry)?;
        let sample = plan.sample.include_sample.then(|| {
            ReservoirSample::new(
                plan.sample.sample_size.unwrap_or(options.sample_size),
                plan.sample.seed.unwrap_or(options.sample_seed),
            )
        });

        Ok(Self {
            extractor: GroupKeyExtractor::new(&plan.groups),
            table: Some(table),
            variables,
            detector: GroupBreakDetector::new(),
            open_path: Vec::with_capacity(depth + 1),
            sample,
            record_count: 0,
            batches: 0,
            state: RunState::Idle,
            token: CancellationToken::new(),
            warnings,
            started: None,
            plan,
            options,
        })
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Records folded so far.
    #[must_use]
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Pre-run cardinality warnings.
    #[must_use]
    pub fn warnings(&self) -> &[CardinalityWarning] {
        &self.warnings
    }

    /// Token that cancels this run from another thread.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Current variable values.
    #[must_use]
    pub fn variables(&self) -> VariableSnapshot {
        self.variables.snapshot()
    }

    /// Moves `Idle → Running`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the run is idle, or
    /// [`Error::Cancelled`] if cancellation was already requested.
    pub fn start(&mut self) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(self.wrong_state("start"));
        }
        if self.token.is_cancelled() {
            self.state = RunState::Cancelled;
            return Err(Error::Cancelled { records: 0 });
        }
        info!(
            "Starting aggregation: {} group levels, {} aggregates, {} variables{}",
            self.plan.depth(),
            self.plan.aggregates.len(),
            self.plan.variables.len(),
            if self.plan.cumulative { ", cumulative" } else { "" }
        );
        self.started = Some(Instant::now());
        self.state = RunState::Running;
        Ok(())
    }

    /// Signals a page boundary: snapshots the variables, then resets
    /// `page`-scoped ones.
    pub fn page_break(&mut self) -> VariableSnapshot {
        let snapshot = self.variables.snapshot();
        self.variables.reset(ResetScope::Page, 0);
        trace!(records = self.record_count, "page break");
        snapshot
    }

    /// Pulls and folds one batch. Starts the run if it is idle.
    ///
    /// # Errors
    ///
    /// Fatal errors move the run to `Failed`: source failures, double
    /// consumption and the group limit. A pending cancellation moves it to
    /// `Cancelled` and returns [`Error::Cancelled`].
    pub fn step<S, F>(&mut self, source: &mut S, sink: &mut F) -> Result<Step>
    where
        S: RecordSource + ?Sized,
        F: FooterSink + ?Sized,
    {
        if self.state == RunState::Idle {
            self.start()?;
        }
        if self.state != RunState::Running {
            return Err(self.wrong_state("step"));
        }
        if self.token.is_cancelled() {
            self.state = RunState::Cancelled;
            warn!(
                "Aggregation cancelled after {} records",
                self.record_count
            );
            return Err(Error::Cancelled {
                records: self.record_count,
            });
        }

        let batch = match source.next_batch(self.options.batch_size) {
            Ok(batch) => batch,
            Err(e) => return Err(self.fail(e)),
        };
        self.batches += 1;
        debug!(
            batch = self.batches,
            records = batch.items.len(),
            has_more = batch.has_more,
            "pulled batch from {}",
            source.source_type()
        );

        for record in &batch.items {
            if let Err(e) = self.process(record, sink) {
                return Err(self.fail(e));
            }
        }

        if batch.has_more {
            Ok(Step::Continue)
        } else {
            self.state = RunState::Draining;
            Ok(Step::EndOfStream)
        }
    }

    /// Flushes every open level and publishes the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] unless the source was drained.
    pub fn finish<F: FooterSink + ?Sized>(&mut self, sink: &mut F) -> Result<AggregationResult> {
        if self.state != RunState::Draining {
            return Err(self.wrong_state("finish"));
        }

        let variables_final = self.variables.snapshot();
        if let Some(previous) = self.detector.previous() {
            close_levels(
                &mut self.variables,
                &self.plan,
                previous,
                1,
                sink,
            );
        }

        let table = self.table.take().ok_or_else(|| self.wrong_state("finish"))?;
        let table_stats = table.stats();
        let stats = RunStats {
            batches: self.batches,
            groups: table.len(),
            failed_groups: table.failed_count(),
            revisited_groups: table_stats.revisited_groups,
            key_operations: table_stats.key_operations,
        };
        self.state = RunState::Completed;

        let elapsed = self.started.map_or(0.0, |s| s.elapsed().as_secs_f64());
        let throughput = if elapsed > 0.0 {
            self.record_count as f64 / elapsed
        } else {
            0.0
        };
        info!(
            "Aggregation complete: {} records, {} groups ({} failed) in {:.2}s ({:.0} records/sec)",
            self.record_count, stats.groups, stats.failed_groups, elapsed, throughput
        );
        if stats.revisited_groups > 0 {
            warn!(
                "{} groups reappeared after closing; input was not sorted on the group fields",
                stats.revisited_groups
            );
        }

        Ok(AggregationResult {
            table,
            variables_final,
            sample: self.sample.take().map(ReservoirSample::into_items).unwrap_or_default(),
            record_count: self.record_count,
            warnings: self.warnings.clone(),
            stats,
        })
    }

    /// Runs the whole pass without collecting footers.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step) and [`finish`](Self::finish).
    pub fn run<S: RecordSource + ?Sized>(&mut self, source: &mut S) -> Result<AggregationResult> {
        self.run_with_footers(source, &mut DiscardFooters)
    }

    /// Runs the whole pass, emitting footers at every break.
    ///
    /// # Errors
    ///
    /// See [`step`](Self::step) and [`finish`](Self::finish).
    pub fn run_with_footers<S, F>(&mut self, source: &mut S, sink: &mut F) -> Result<AggregationResult>
    where
        S: RecordSource + ?Sized,
        F: FooterSink + ?Sized,
    {
        let span = info_span!(
            "aggregation",
            source = source.source_type(),
            levels = self.plan.depth()
        );
        let _guard = span.enter();

        self.start()?;
        while self.step(source, sink)? == Step::Continue {}
        self.finish(sink)
    }

    fn process<F: FooterSink + ?Sized>(&mut self, record: &Value, sink: &mut F) -> Result<()> {
        let (brk, previous, key) = self.detector.advance(self.extractor.extract(record));
        let table = self
            .table
            .as_mut()
            .ok_or_else(|| Error::InvalidState("table already published".to_string()))?;

        match brk {
            BreakLevel::None => {}
            BreakLevel::Initial => {
                self.variables.reset(ResetScope::Group, 1);
                table.descend(&mut self.open_path, key, 1);
            }
            BreakLevel::Level(level) => {
                if let Some(previous) = &previous {
                    trace!(level, from = %previous, to = %key, "group break");
                    close_levels(&mut self.variables, &self.plan, previous, level, sink);
                }
                table.reopen(&mut self.open_path, key, level);
            }
        }

        table.fold_path(&self.open_path, record)?;
        self.variables.fold(record);
        if let Some(sample) = self.sample.as_mut() {
            sample.offer(record);
        }
        self.record_count += 1;
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = RunState::Failed;
        tracing::error!(
            code = error.code(),
            records = self.record_count,
            "Aggregation failed: {error}"
        );
        error
    }

    fn wrong_state(&self, operation: &str) -> Error {
        Error::InvalidState(format!("cannot {operation} in state {:?}", self.state))
    }
}

/// Closes levels `depth..=from` of `previous`, deepest first: emits the
/// footer, then resets the variables bound to that level.
fn close_levels<F: FooterSink + ?Sized>(
    variables: &mut VariableAccumulator,
    plan: &AggregationPlan,
    previous: &GroupKey,
    from: usize,
    sink: &mut F,
) {
    for level in (from..=plan.depth()).rev() {
        if sink.wants_footers() {
            sink.emit(GroupFooter {
                level,
                group: plan.groups[level - 1].name.clone(),
                key: previous.prefix(level),
                snapshot: variables.snapshot(),
            });
        }
        variables.reset_exact(level);
    }
}

impl std::fmt::Debug for StreamAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAggregator")
            .field("state", &self.state)
            .field("levels", &self.plan.depth())
            .field("record_count", &self.record_count)
            .field("batches", &self.batches)
            .finish_non_exhaustive()
    }
}
