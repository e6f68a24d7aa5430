//! Aggregation plan: what to group by, which variables to track and which
//! aggregates to compute.
//!
//! A plan arrives already validated by the definition layer, but the engine
//! re-checks the structural invariants it depends on (contiguous levels,
//! unique names, required fields) because violating them would silently
//! corrupt results. Plans deserialize from TOML or JSON:
//!
//! ```toml
//! cumulative = true
//!
//! [[groups]]
//! name = "region"
//! level = 1
//! field_paths = ["region"]
//!
//! [[aggregates]]
//! kind = "sum"
//! field = "amount"
//!
//! [[variables]]
//! name = "row_count"
//! kind = "count"
//! reset_scope = "report"
//! ```

use crate::condition::Condition;
use crate::error::{Error, Result};
use crate::value::FieldType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Sort direction the upstream source applied to a group level.
///
/// Informational: the engine never sorts, it only relies on equal keys being
/// adjacent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Ascending order (default).
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// One grouping level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    /// Group name, reported on footers.
    pub name: String,
    /// Nesting level, starting at 1.
    pub level: usize,
    /// Field paths whose values together form this level's key.
    pub field_paths: Vec<String>,
    /// Sort direction of the input on this level.
    #[serde(default)]
    pub sort_direction: SortDirection,
    /// Equality used to compare this level's values.
    #[serde(default)]
    pub field_type: FieldType,
    /// Expected number of distinct values, used by the cardinality pre-check.
    #[serde(default)]
    pub expected_cardinality: Option<u64>,
}

impl GroupDefinition {
    /// Creates a group level over the given field paths.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, level: usize, field_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            level,
            field_paths: field_paths.into_iter().map(Into::into).collect(),
            sort_direction: SortDirection::Ascending,
            field_type: FieldType::Any,
            expected_cardinality: None,
        }
    }

    /// Sets the declared field type.
    #[must_use]
    pub fn with_field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    /// Sets the sort direction.
    #[must_use]
    pub fn with_sort_direction(mut self, direction: SortDirection) -> Self {
        self.sort_direction = direction;
        self
    }

    /// Declares the expected number of distinct values on this level.
    #[must_use]
    pub fn with_expected_cardinality(mut self, cardinality: u64) -> Self {
        self.expected_cardinality = Some(cardinality);
        self
    }
}

/// Fold operator of a report variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    /// Running sum.
    Sum,
    /// Row count, or non-null count when a source is given.
    Count,
    /// Running average.
    Avg,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// Count of rows matching the condition.
    CountWhere,
    /// Sum over rows matching the condition.
    SumWhere,
    /// Registered custom fold.
    Custom,
}

/// When a variable returns to its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    /// Never within a run.
    #[default]
    Report,
    /// On an externally signalled page boundary.
    Page,
    /// On a group break at or above `reset_group_level`.
    Group,
    /// Before every record.
    Detail,
}

/// Where a variable or aggregate reads its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceExpr {
    /// Field path (dot notation).
    Field(String),
    /// Constant value.
    Literal(Value),
}

impl SourceExpr {
    /// Evaluates the expression against a record. Missing fields read as null.
    #[must_use]
    pub fn evaluate<'a>(&'a self, record: &'a Value) -> &'a Value {
        match self {
            Self::Field(path) => crate::value::get_field(record, path).unwrap_or(&Value::Null),
            Self::Literal(value) => value,
        }
    }

    /// Display form used in errors: the path, or `literal`.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Field(path) => path,
            Self::Literal(_) => "literal",
        }
    }
}

/// A report variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    /// Unique variable name.
    pub name: String,
    /// Fold operator.
    pub kind: VariableKind,
    /// Input expression. Optional for `count` and `count_where`.
    #[serde(default)]
    pub source: Option<SourceExpr>,
    /// Condition for `count_where` / `sum_where`.
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Reset scope.
    #[serde(default)]
    pub reset_scope: ResetScope,
    /// Group level for `group` scope. Defaults to the innermost level.
    #[serde(default)]
    pub reset_group_level: Option<usize>,
    /// Value restored on reset.
    #[serde(default)]
    pub initial_value: Value,
    /// Registered fold name for `custom` variables.
    #[serde(default)]
    pub custom: Option<String>,
}

impl VariableDef {
    /// Creates a report-scoped variable with a null initial value.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            source: None,
            condition: None,
            reset_scope: ResetScope::Report,
            reset_group_level: None,
            initial_value: Value::Null,
            custom: None,
        }
    }

    /// Reads input from a field path.
    #[must_use]
    pub fn with_field(mut self, path: impl Into<String>) -> Self {
        self.source = Some(SourceExpr::Field(path.into()));
        self
    }

    /// Reads a constant input.
    #[must_use]
    pub fn with_literal(mut self, value: impl Into<Value>) -> Self {
        self.source = Some(SourceExpr::Literal(value.into()));
        self
    }

    /// Sets the condition.
    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Resets at every break at or above `level`.
    #[must_use]
    pub fn reset_on_group(mut self, level: usize) -> Self {
        self.reset_scope = ResetScope::Group;
        self.reset_group_level = Some(level);
        self
    }

    /// Sets the reset scope.
    #[must_use]
    pub fn with_reset_scope(mut self, scope: ResetScope) -> Self {
        self.reset_scope = scope;
        self
    }

    /// Sets the initial value.
    #[must_use]
    pub fn with_initial_value(mut self, value: impl Into<Value>) -> Self {
        self.initial_value = value.into();
        self
    }

    /// Uses a registered custom fold.
    #[must_use]
    pub fn with_custom(mut self, name: impl Into<String>) -> Self {
        self.custom = Some(name.into());
        self
    }
}

/// Aggregate computed for every group entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    /// Row count, or non-null count of `field`.
    Count,
    /// Sum of `field`.
    Sum,
    /// Average of `field`.
    Avg,
    /// Minimum of `field`.
    Min,
    /// Maximum of `field`.
    Max,
    /// First non-null value of `field` in stream order.
    First,
    /// Last non-null value of `field` in stream order.
    Last,
    /// Rows matching `condition`.
    CountWhere,
    /// Sum of `field` over rows matching `condition`.
    SumWhere,
}

impl AggregateKind {
    /// Prefix used for generated aggregate ids.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::First => "first",
            Self::Last => "last",
            Self::CountWhere => "count_where",
            Self::SumWhere => "sum_where",
        }
    }

    const fn needs_field(self) -> bool {
        !matches!(self, Self::Count | Self::CountWhere)
    }

    const fn needs_condition(self) -> bool {
        matches!(self, Self::CountWhere | Self::SumWhere)
    }
}

/// One configured aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Output id. Generated from kind and field when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Aggregate kind.
    pub kind: AggregateKind,
    /// Input field path.
    #[serde(default)]
    pub field: Option<String>,
    /// Condition for conditional kinds.
    #[serde(default)]
    pub condition: Option<Condition>,
}

impl AggregateSpec {
    fn of(kind: AggregateKind, field: Option<String>) -> Self {
        Self {
            id: None,
            kind,
            field,
            condition: None,
        }
    }

    /// `count(*)`.
    #[must_use]
    pub fn count() -> Self {
        Self::of(AggregateKind::Count, None)
    }

    /// Non-null count of a field.
    #[must_use]
    pub fn count_field(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Count, Some(field.into()))
    }

    /// Sum of a field.
    #[must_use]
    pub fn sum(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Sum, Some(field.into()))
    }

    /// Average of a field.
    #[must_use]
    pub fn avg(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Avg, Some(field.into()))
    }

    /// Minimum of a field.
    #[must_use]
    pub fn min(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Min, Some(field.into()))
    }

    /// Maximum of a field.
    #[must_use]
    pub fn max(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Max, Some(field.into()))
    }

    /// First non-null value of a field.
    #[must_use]
    pub fn first(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::First, Some(field.into()))
    }

    /// Last non-null value of a field.
    #[must_use]
    pub fn last(field: impl Into<String>) -> Self {
        Self::of(AggregateKind::Last, Some(field.into()))
    }

    /// Rows matching a condition, under an explicit id.
    #[must_use]
    pub fn count_where(id: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: Some(id.into()),
            kind: AggregateKind::CountWhere,
            field: None,
            condition: Some(condition),
        }
    }

    /// Sum of a field over rows matching a condition, under an explicit id.
    #[must_use]
    pub fn sum_where(id: impl Into<String>, field: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: Some(id.into()),
            kind: AggregateKind::SumWhere,
            field: Some(field.into()),
            condition: Some(condition),
        }
    }

    /// Overrides the output id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Output id: the explicit id, `count` for `count(*)`, else `{kind}_{field}`.
    #[must_use]
    pub fn resolved_id(&self) -> String {
        if let Some(ref id) = self.id {
            return id.clone();
        }
        match &self.field {
            Some(field) => format!("{}_{field}", self.kind.prefix()),
            None => self.kind.prefix().to_string(),
        }
    }
}

/// Reservoir sampling options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleOptions {
    /// Collect a sample during the pass.
    pub include_sample: bool,
    /// Maximum number of sampled records. Unset takes the engine default.
    pub sample_size: Option<usize>,
    /// RNG seed, so identical input yields an identical sample. Unset takes
    /// the engine default.
    pub seed: Option<u64>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            include_sample: false,
            sample_size: None,
            seed: None,
        }
    }
}

/// Declared nested cardinality exceeds the configured ceiling.
///
/// Surfaced before the run starts; the run still proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardinalityWarning {
    /// Product of the declared per-level cardinalities.
    pub estimated_groups: u64,
    /// Configured ceiling.
    pub ceiling: u64,
    /// Levels that contributed an estimate, outermost first.
    pub levels: Vec<String>,
}

impl fmt::Display for CardinalityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nested grouping [{}] may produce up to {} groups (ceiling {})",
            self.levels.join(" > "),
            self.estimated_groups,
            self.ceiling
        )
    }
}

/// The full aggregation configuration for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPlan {
    /// Group levels in ascending order.
    pub groups: Vec<GroupDefinition>,
    /// Report variables.
    pub variables: Vec<VariableDef>,
    /// Aggregates computed per group entry.
    pub aggregates: Vec<AggregateSpec>,
    /// Aggregate at every level (and the grand total), not only the innermost.
    pub cumulative: bool,
    /// Reservoir sampling.
    pub sample: SampleOptions,
}

impl AggregationPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a group level.
    #[must_use]
    pub fn with_group(mut self, group: GroupDefinition) -> Self {
        self.groups.push(group);
        self
    }

    /// Appends a variable.
    #[must_use]
    pub fn with_variable(mut self, variable: VariableDef) -> Self {
        self.variables.push(variable);
        self
    }

    /// Appends an aggregate.
    #[must_use]
    pub fn with_aggregate(mut self, aggregate: AggregateSpec) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    /// Enables or disables cumulative grouping.
    #[must_use]
    pub fn cumulative(mut self, cumulative: bool) -> Self {
        self.cumulative = cumulative;
        self
    }

    /// Enables a reservoir sample of the given size.
    #[must_use]
    pub fn with_sample(mut self, sample_size: usize, seed: u64) -> Self {
        self.sample = SampleOptions {
            include_sample: true,
            sample_size: Some(sample_size),
            seed: Some(seed),
        };
        self
    }

    /// Enables sampling, keeping any size and seed the plan already sets.
    #[must_use]
    pub fn sampled(mut self) -> Self {
        self.sample.include_sample = true;
        self
    }

    /// Number of group levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.groups.len()
    }

    /// Parses a plan from TOML.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::InvalidPlan(e.to_string()))
    }

    /// Parses a plan from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidPlan(e.to_string()))
    }

    /// Loads a plan file; `.json` files are JSON, anything else TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_toml(&text)
        }
    }

    /// Validates the structural invariants the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlan`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        self.validate_groups()?;
        self.validate_variables()?;
        self.validate_aggregates()?;

        if self.sample.include_sample && self.sample.sample_size == Some(0) {
            return Err(Error::InvalidPlan(
                "sample.sample_size must be > 0 when sampling is enabled".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_groups(&self) -> Result<()> {
        let mut names = HashSet::new();
        for (index, group) in self.groups.iter().enumerate() {
            if group.level != index + 1 {
                return Err(Error::InvalidPlan(format!(
                    "group '{}' has level {}, expected {} (levels must be contiguous from 1 in ascending order)",
                    group.name,
                    group.level,
                    index + 1
                )));
            }
            if group.field_paths.is_empty() {
                return Err(Error::InvalidPlan(format!(
                    "group '{}' has no field paths",
                    group.name
                )));
            }
            if !names.insert(group.name.as_str()) {
                return Err(Error::InvalidPlan(format!(
                    "duplicate group name '{}'",
                    group.name
                )));
            }
        }
        Ok(())
    }

    fn validate_variables(&self) -> Result<()> {
        let depth = self.depth();
        let mut names = HashSet::new();
        for var in &self.variables {
            if !names.insert(var.name.as_str()) {
                return Err(Error::InvalidPlan(format!(
                    "duplicate variable name '{}'",
                    var.name
                )));
            }
            let needs_source = !matches!(
                var.kind,
                VariableKind::Count | VariableKind::CountWhere | VariableKind::Custom
            );
            if needs_source && var.source.is_none() {
                return Err(Error::InvalidPlan(format!(
                    "variable '{}' ({:?}) requires a source",
                    var.name, var.kind
                )));
            }
            let needs_condition =
                matches!(var.kind, VariableKind::CountWhere | VariableKind::SumWhere);
            if needs_condition && var.condition.is_none() {
                return Err(Error::InvalidPlan(format!(
                    "variable '{}' ({:?}) requires a condition",
                    var.name, var.kind
                )));
            }
            if var.kind == VariableKind::Custom && var.custom.is_none() {
                return Err(Error::InvalidPlan(format!(
                    "custom variable '{}' does not name a fold",
                    var.name
                )));
            }
            match (var.reset_scope, var.reset_group_level) {
                (ResetScope::Group, _) if depth == 0 => {
                    return Err(Error::InvalidPlan(format!(
                        "variable '{}' resets on group but the plan has no groups",
                        var.name
                    )));
                }
                (ResetScope::Group, Some(level)) if level == 0 || level > depth => {
                    return Err(Error::InvalidPlan(format!(
                        "variable '{}' resets on level {level}, plan has levels 1..={depth}",
                        var.name
                    )));
                }
                (scope, Some(_)) if scope != ResetScope::Group => {
                    return Err(Error::InvalidPlan(format!(
                        "variable '{}' sets reset_group_level with {scope:?} scope",
                        var.name
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_aggregates(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for spec in &self.aggregates {
            let id = spec.resolved_id();
            if spec.kind.needs_field() && spec.field.is_none() {
                return Err(Error::InvalidPlan(format!(
                    "aggregate '{id}' ({:?}) requires a field",
                    spec.kind
                )));
            }
            if spec.kind.needs_condition() && spec.condition.is_none() {
                return Err(Error::InvalidPlan(format!(
                    "aggregate '{id}' ({:?}) requires a condition",
                    spec.kind
                )));
            }
            if !ids.insert(id.clone()) {
                return Err(Error::InvalidPlan(format!("duplicate aggregate id '{id}'")));
            }
        }
        Ok(())
    }

    /// Checks the declared nested cardinality against a ceiling.
    ///
    /// The estimate is the product of every declared `expected_cardinality`
    /// (levels without one are ignored). With cumulative grouping each prefix
    /// also holds an entry, which at most doubles the product and is not
    /// counted separately.
    #[must_use]
    pub fn check_cardinality(&self, ceiling: u64) -> Option<CardinalityWarning> {
        let mut estimated: u64 = 1;
        let mut levels = Vec::new();
        for group in &self.groups {
            if let Some(cardinality) = group.expected_cardinality {
                estimated = estimated.saturating_mul(cardinality);
                levels.push(group.name.clone());
            }
        }
        (!levels.is_empty() && estimated > ceiling).then(|| CardinalityWarning {
            estimated_groups: estimated,
            ceiling,
            levels,
        })
    }
}
