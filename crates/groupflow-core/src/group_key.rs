//! Group keys and their extraction from records.

use crate::plan::GroupDefinition;
use crate::value::{get_field, FieldType, Scalar};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The value of one group level: one scalar per field path of the level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelKey(Vec<Scalar>);

impl LevelKey {
    /// Creates a level value from its components.
    #[must_use]
    pub fn new(values: Vec<Scalar>) -> Self {
        Self(values)
    }

    /// Single-field level value.
    #[must_use]
    pub fn single(value: impl Into<Scalar>) -> Self {
        Self(vec![value.into()])
    }

    /// Components in field-path order.
    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.0
    }
}

impl fmt::Display for LevelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.0.as_slice() {
            return write!(f, "{single}");
        }
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Ordered tuple of level values with a pre-computed hash.
///
/// The empty key denotes the grand total.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Vec<LevelKey>", into = "Vec<LevelKey>")]
pub struct GroupKey {
    levels: Vec<LevelKey>,
    hash: u64,
}

impl GroupKey {
    /// Creates a key from its level values, outermost first.
    #[must_use]
    pub fn new(levels: Vec<LevelKey>) -> Self {
        let hash = Self::compute_hash(&levels);
        Self { levels, hash }
    }

    /// The grand-total key.
    #[must_use]
    pub fn root() -> Self {
        Self::new(Vec::new())
    }

    /// Builds a key with one single-field value per level.
    ///
    /// ```rust,ignore
    /// let key = GroupKey::of(["EMEA", "Paris"]);
    /// ```
    #[must_use]
    pub fn of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        Self::new(values.into_iter().map(LevelKey::single).collect())
    }

    fn compute_hash(levels: &[LevelKey]) -> u64 {
        let mut hasher = FxHasher::default();
        levels.len().hash(&mut hasher);
        for level in levels {
            level.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Number of levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// True for the grand-total key.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.levels.is_empty()
    }

    /// All level values, outermost first.
    #[must_use]
    pub fn levels(&self) -> &[LevelKey] {
        &self.levels
    }

    /// Value of a 1-based level.
    #[must_use]
    pub fn level(&self, level: usize) -> Option<&LevelKey> {
        level.checked_sub(1).and_then(|i| self.levels.get(i))
    }

    /// Key made of the first `depth` levels.
    #[must_use]
    pub fn prefix(&self, depth: usize) -> Self {
        Self::new(self.levels[..depth.min(self.levels.len())].to_vec())
    }

    /// First 1-based level at which the keys differ, or `None` when equal.
    #[must_use]
    pub fn first_difference(&self, other: &Self) -> Option<usize> {
        if self == other {
            return None;
        }
        self.levels
            .iter()
            .zip(&other.levels)
            .position(|(a, b)| a != b)
            .or_else(|| Some(self.levels.len().min(other.levels.len())))
            .map(|i| i + 1)
    }
}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        // Different hash means definitely different.
        self.hash == other.hash && self.levels == other.levels
    }
}

impl Eq for GroupKey {}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupKey").field(&self.levels).finish()
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.levels.is_empty() {
            return f.write_str("(all)");
        }
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                f.write_str(" / ")?;
            }
            write!(f, "{level}")?;
        }
        Ok(())
    }
}

impl From<Vec<LevelKey>> for GroupKey {
    fn from(levels: Vec<LevelKey>) -> Self {
        Self::new(levels)
    }
}

impl From<GroupKey> for Vec<LevelKey> {
    fn from(key: GroupKey) -> Self {
        key.levels
    }
}

#[derive(Debug, Clone)]
struct LevelSpec {
    field_paths: Vec<String>,
    field_type: FieldType,
}

/// Pure record → [`GroupKey`] function built from the group definitions.
#[derive(Debug, Clone)]
pub struct GroupKeyExtractor {
    levels: Vec<LevelSpec>,
}

impl GroupKeyExtractor {
    /// Creates an extractor for definitions already sorted by level.
    #[must_use]
    pub fn new(groups: &[GroupDefinition]) -> Self {
        let levels = groups
            .iter()
            .map(|g| LevelSpec {
                field_paths: g.field_paths.clone(),
                field_type: g.field_type,
            })
            .collect();
        Self { levels }
    }

    /// Number of levels produced.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Extracts the value of one 1-based level. Missing fields read as null.
    ///
    /// # Panics
    ///
    /// Panics if `level` is 0 or deeper than [`depth`](Self::depth).
    #[must_use]
    pub fn extract_level(&self, record: &Value, level: usize) -> LevelKey {
        let spec = &self.levels[level - 1];
        LevelKey(
            spec.field_paths
                .iter()
                .map(|path| {
                    get_field(record, path)
                        .map_or(Scalar::Null, |v| Scalar::from_json(v, spec.field_type))
                })
                .collect(),
        )
    }

    /// Extracts the full key of a record.
    #[must_use]
    pub fn extract(&self, record: &Value) -> GroupKey {
        let mut levels = Vec::with_capacity(self.levels.len());
        for level in 1..=self.levels.len() {
            levels.push(self.extract_level(record, level));
        }
        GroupKey::new(levels)
    }
}
