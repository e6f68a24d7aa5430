//! Report variables: one scalar per declared variable, folded per record and
//! reset at its scope.
//!
//! Each variable's fold is resolved into a [`FoldOp`] once when the
//! accumulator is built; folding a record is a plain match over that closed
//! set, never a lookup by kind name.

use crate::condition::Condition;
use crate::error::{Error, FoldError, Result};
use crate::plan::{ResetScope, SourceExpr, VariableDef, VariableKind};
use crate::value::{as_number, describe, number_to_json, Scalar};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// User-supplied fold for `custom` variables.
///
/// Receives the current value, the evaluated source (null when the variable
/// has no source) and the whole record, and returns the new value.
pub trait CustomFold: Send + Sync {
    /// Folds one record.
    ///
    /// # Errors
    ///
    /// An error message marks the variable failed until its next reset.
    fn fold(&self, current: &Value, input: &Value, record: &Value) -> std::result::Result<Value, String>;
}

impl<F> CustomFold for F
where
    F: Fn(&Value, &Value, &Value) -> std::result::Result<Value, String> + Send + Sync,
{
    fn fold(&self, current: &Value, input: &Value, record: &Value) -> std::result::Result<Value, String> {
        self(current, input, record)
    }
}

/// Named custom folds available to a run.
#[derive(Clone, Default)]
pub struct CustomFoldRegistry {
    folds: HashMap<String, Arc<dyn CustomFold>>,
}

impl CustomFoldRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fold under a name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, fold: impl CustomFold + 'static) {
        self.folds.insert(name.into(), Arc::new(fold));
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, fold: impl CustomFold + 'static) -> Self {
        self.register(name, fold);
        self
    }

    /// Looks up a fold.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomFold>> {
        self.folds.get(name).cloned()
    }

    /// Number of registered folds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.folds.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }
}

impl fmt::Debug for CustomFoldRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.folds.keys().collect();
        names.sort();
        f.debug_struct("CustomFoldRegistry")
            .field("folds", &names)
            .finish()
    }
}

/// Variable values at a point in the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    /// Every variable in declaration order. Failed variables read as null.
    pub values: IndexMap<String, Value>,
    /// Variables currently in an error state.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub failed: IndexMap<String, FoldError>,
}

impl VariableSnapshot {
    /// Value of a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// True when the variable is in an error state.
    #[must_use]
    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains_key(name)
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no variable is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone)]
enum FoldOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    CountWhere(Condition),
    SumWhere(Condition),
    Custom {
        name: String,
        fold: Arc<dyn CustomFold>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum VarState {
    Number(f64),
    Avg { total: f64, n: u64 },
    Value(Value),
    Failed(FoldError),
}

#[derive(Clone)]
struct Variable {
    name: String,
    op: FoldOp,
    source: Option<SourceExpr>,
    scope: ResetScope,
    reset_level: usize,
    initial: VarState,
    state: VarState,
}

impl Variable {
    fn build(def: &VariableDef, depth: usize, registry: &CustomFoldRegistry) -> Result<Self> {
        let condition = || def.condition.clone().unwrap_or_else(|| Condition::and(Vec::new()));
        let op = match def.kind {
            VariableKind::Sum => FoldOp::Sum,
            VariableKind::Count => FoldOp::Count,
            VariableKind::Avg => FoldOp::Avg,
            VariableKind::Min => FoldOp::Min,
            VariableKind::Max => FoldOp::Max,
            VariableKind::CountWhere => FoldOp::CountWhere(condition()),
            VariableKind::SumWhere => FoldOp::SumWhere(condition()),
            VariableKind::Custom => {
                let name = def.custom.clone().unwrap_or_default();
                let fold = registry.get(&name).ok_or_else(|| {
                    Error::InvalidPlan(format!(
                        "variable '{}' uses unregistered custom fold '{name}'",
                        def.name
                    ))
                })?;
                FoldOp::Custom { name, fold }
            }
        };

        let initial = match op {
            FoldOp::Sum | FoldOp::Count | FoldOp::CountWhere(_) | FoldOp::SumWhere(_) => {
                if def.initial_value.is_null() {
                    VarState::Number(0.0)
                } else {
                    VarState::Number(as_number(&def.initial_value).ok_or_else(|| {
                        Error::InvalidPlan(format!(
                            "variable '{}' needs a numeric initial value, found {}",
                            def.name,
                            describe(&def.initial_value)
                        ))
                    })?)
                }
            }
            FoldOp::Avg => VarState::Avg { total: 0.0, n: 0 },
            FoldOp::Min | FoldOp::Max | FoldOp::Custom { .. } => {
                VarState::Value(def.initial_value.clone())
            }
        };

        Ok(Self {
            name: def.name.clone(),
            op,
            source: def.source.clone(),
            scope: def.reset_scope,
            reset_level: def.reset_group_level.unwrap_or(depth),
            state: initial.clone(),
            initial,
        })
    }

    fn reset(&mut self) {
        self.state = self.initial.clone();
    }

    fn input<'a>(source: Option<&'a SourceExpr>, record: &'a Value) -> &'a Value {
        source.map_or(&Value::Null, |source| source.evaluate(record))
    }

    fn not_numeric(&self, found: &Value) -> FoldError {
        FoldError::NotNumeric {
            target: self.name.clone(),
            field: self.source.as_ref().map_or("", SourceExpr::label).to_string(),
            found: describe(found),
        }
    }

    fn counts(&self, record: &Value) -> bool {
        self.source.is_none() || !Self::input(self.source.as_ref(), record).is_null()
    }

    fn add(&mut self, record: &Value) -> std::result::Result<(), FoldError> {
        let input = Self::input(self.source.as_ref(), record);
        if input.is_null() {
            return Ok(());
        }
        let x = as_number(input).ok_or_else(|| self.not_numeric(input))?;
        if let VarState::Number(total) = &mut self.state {
            *total += x;
        }
        Ok(())
    }

    fn extreme(&mut self, record: &Value, keep_incoming: fn(std::cmp::Ordering) -> bool) -> std::result::Result<(), FoldError> {
        let input = Self::input(self.source.as_ref(), record);
        if input.is_null() {
            return Ok(());
        }
        let incoming = Scalar::natural(input);
        let replace = match &self.state {
            VarState::Value(current) if !current.is_null() => {
                let current = Scalar::natural(current);
                let ordering = incoming.try_cmp(&current).ok_or_else(|| FoldError::Incomparable {
                    target: self.name.clone(),
                    current: current.type_name().to_string(),
                    found: incoming.type_name().to_string(),
                })?;
                keep_incoming(ordering)
            }
            _ => true,
        };
        if replace {
            self.state = VarState::Value(input.clone());
        }
        Ok(())
    }

    fn fold(&mut self, record: &Value) -> std::result::Result<(), FoldError> {
        if matches!(self.state, VarState::Failed(_)) {
            return Ok(());
        }
        match &self.op {
            FoldOp::Sum => self.add(record),
            FoldOp::SumWhere(condition) => {
                if condition.matches(record) {
                    self.add(record)
                } else {
                    Ok(())
                }
            }
            FoldOp::Count => {
                if self.counts(record) {
                    if let VarState::Number(n) = &mut self.state {
                        *n += 1.0;
                    }
                }
                Ok(())
            }
            FoldOp::CountWhere(condition) => {
                if condition.matches(record) && self.counts(record) {
                    if let VarState::Number(n) = &mut self.state {
                        *n += 1.0;
                    }
                }
                Ok(())
            }
            FoldOp::Avg => {
                let input = Self::input(self.source.as_ref(), record);
                if input.is_null() {
                    return Ok(());
                }
                let x = as_number(input).ok_or_else(|| self.not_numeric(input))?;
                if let VarState::Avg { total, n } = &mut self.state {
                    *total += x;
                    *n += 1;
                }
                Ok(())
            }
            FoldOp::Min => self.extreme(record, std::cmp::Ordering::is_lt),
            FoldOp::Max => self.extreme(record, std::cmp::Ordering::is_gt),
            FoldOp::Custom { name, fold } => {
                let current = match &self.state {
                    VarState::Value(value) => value,
                    _ => &Value::Null,
                };
                let input = Self::input(self.source.as_ref(), record);
                match fold.fold(current, input, record) {
                    Ok(value) => {
                        self.state = VarState::Value(value);
                        Ok(())
                    }
                    Err(message) => Err(FoldError::Custom {
                        target: self.name.clone(),
                        name: name.clone(),
                        message,
                    }),
                }
            }
        }
    }

    fn resolve(&self) -> Value {
        match &self.state {
            VarState::Number(x) => number_to_json(*x),
            VarState::Avg { total, n } => {
                if *n > 0 {
                    number_to_json(*total / *n as f64)
                } else {
                    Value::Null
                }
            }
            VarState::Value(value) => value.clone(),
            VarState::Failed(_) => Value::Null,
        }
    }
}

/// All report variables of a run.
#[derive(Clone)]
pub struct VariableAccumulator {
    variables: Vec<Variable>,
}

impl VariableAccumulator {
    /// Resolves every variable's fold and initial state.
    ///
    /// `depth` is the number of group levels; a `group` variable without a
    /// reset level resets at the innermost one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPlan`] for an unregistered custom fold or a
    /// non-numeric initial value on a numeric fold.
    pub fn new(defs: &[VariableDef], depth: usize, registry: &CustomFoldRegistry) -> Result<Self> {
        let variables = defs
            .iter()
            .map(|def| Variable::build(def, depth, registry))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { variables })
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// True when no variable is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Folds one record into every variable.
    ///
    /// `detail` variables are reset first. A fold error marks only the
    /// offending variable; the others still fold.
    pub fn fold(&mut self, record: &Value) {
        for variable in &mut self.variables {
            if variable.scope == ResetScope::Detail {
                variable.reset();
            }
            if let Err(error) = variable.fold(record) {
                warn!(variable = %variable.name, error = %error, "variable fold failed, value unavailable until reset");
                variable.state = VarState::Failed(error);
            }
        }
    }

    /// Restores initial values for the variables a scope event affects.
    ///
    /// A `group` event at `level` resets group variables whose reset level is
    /// `level` or deeper. `page` and `detail` events reset their own scope.
    /// `report` variables never reset.
    pub fn reset(&mut self, scope: ResetScope, level: usize) {
        for variable in &mut self.variables {
            let hit = match scope {
                ResetScope::Report => false,
                ResetScope::Group => {
                    variable.scope == ResetScope::Group && variable.reset_level >= level
                }
                ResetScope::Page | ResetScope::Detail => variable.scope == scope,
            };
            if hit {
                variable.reset();
            }
        }
    }

    /// Resets the group variables bound to exactly `level`.
    pub fn reset_exact(&mut self, level: usize) {
        for variable in &mut self.variables {
            if variable.scope == ResetScope::Group && variable.reset_level == level {
                variable.reset();
            }
        }
    }

    /// Current value of a variable. Failed variables read as null.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        self.variables
            .iter()
            .find(|variable| variable.name == name)
            .map(Variable::resolve)
    }

    /// Copies every variable's current value.
    #[must_use]
    pub fn snapshot(&self) -> VariableSnapshot {
        let mut snapshot = VariableSnapshot::default();
        for variable in &self.variables {
            snapshot
                .values
                .insert(variable.name.clone(), variable.resolve());
            if let VarState::Failed(ref error) = variable.state {
                snapshot.failed.insert(variable.name.clone(), error.clone());
            }
        }
        snapshot
    }
}

impl fmt::Debug for VariableAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.variables.iter().map(|v| (&v.name, &v.state)))
            .finish()
    }
}
