//! Aggregation table: composite group key → accumulator.
//!
//! Keys are interned as a tree of `(parent entry, level value)` nodes. The
//! root node is the grand total, its children are level-1 groups, and so on.
//! Resolving the node of level k from the node of level k−1 is a single hash
//! lookup, so building every prefix of a key costs one operation per level,
//! and the full [`GroupKey`] is only materialized when a caller reads it.
//!
//! Only some nodes hold an accumulator: the innermost level, plus every level
//! and the root when grouping is cumulative.

use crate::accumulator::{AggregateProgram, AggregationAccumulator, Input};
use crate::error::{Error, FoldError, Result};
use crate::group_key::{GroupKey, LevelKey};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Index of a node in the table.
pub type EntryId = usize;

/// Id of the root (grand-total) node.
pub const ROOT: EntryId = 0;

/// Replaces the accumulator of a group whose fold failed.
///
/// The marker keeps the first error; records routed to the group afterwards
/// are counted but not folded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMarker {
    /// The fold error that poisoned the group.
    pub error: FoldError,
    /// Sequence number of the offending record.
    pub record_seq: u64,
    /// Records routed to the group after the failure.
    pub skipped: u64,
}

/// Accumulator slot of one group.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// Healthy accumulator.
    Ready(AggregationAccumulator),
    /// Fold failed for this group.
    Failed(ErrorMarker),
}

impl Entry {
    /// The accumulator, unless the group failed.
    #[must_use]
    pub fn accumulator(&self) -> Option<&AggregationAccumulator> {
        match self {
            Self::Ready(acc) => Some(acc),
            Self::Failed(_) => None,
        }
    }

    /// True for error-marked groups.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Node {
    parent: Option<EntryId>,
    level: usize,
    value: Option<LevelKey>,
    children: FxHashMap<LevelKey, EntryId>,
    entry: Option<Entry>,
}

impl Node {
    fn root() -> Self {
        Self {
            parent: None,
            level: 0,
            value: None,
            children: FxHashMap::default(),
            entry: None,
        }
    }
}

/// Counters describing how the table was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Child lookups performed while building keys.
    pub key_operations: u64,
    /// Groups seen again after their run of records had ended.
    pub revisited_groups: u64,
    /// Groups that were error-marked.
    pub failed_groups: u64,
    /// Records folded through the table.
    pub records: u64,
}

/// Composite-key aggregation table with a single writer.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationTable {
    program: AggregateProgram,
    depth: usize,
    cumulative: bool,
    max_groups: Option<usize>,
    nodes: Vec<Node>,
    entries: usize,
    stats: TableStats,
    revisit_warned: bool,
}

impl AggregationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(program: AggregateProgram, depth: usize, cumulative: bool) -> Self {
        Self {
            program,
            depth,
            cumulative,
            max_groups: None,
            nodes: vec![Node::root()],
            entries: 0,
            stats: TableStats::default(),
            revisit_warned: false,
        }
    }

    /// Caps the number of accumulators. Exceeding it fails the fold.
    #[must_use]
    pub fn with_max_groups(mut self, max_groups: Option<usize>) -> Self {
        self.max_groups = max_groups;
        self
    }

    /// Number of group levels.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True when every prefix (and the grand total) holds an accumulator.
    #[must_use]
    pub fn is_cumulative(&self) -> bool {
        self.cumulative
    }

    /// Compiled aggregate list.
    #[must_use]
    pub fn program(&self) -> &AggregateProgram {
        &self.program
    }

    /// Number of accumulators (healthy or failed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
    }

    /// True when no record was folded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Build counters.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.stats
    }

    /// Number of error-marked groups.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.iter().filter(|(_, entry)| entry.is_failed()).count()
    }

    /// Whether nodes of this level carry an accumulator.
    #[must_use]
    pub fn holds_entry(&self, level: usize) -> bool {
        self.cumulative || level == self.depth
    }

    /// Resolves (or creates) the child of `parent` for a level value.
    ///
    /// The level value is cloned only when the node is new. Returns the child
    /// id and whether it was created.
    pub(crate) fn child(&mut self, parent: EntryId, value: &LevelKey) -> (EntryId, bool) {
        self.stats.key_operations += 1;
        if let Some(&id) = self.nodes[parent].children.get(value) {
            return (id, false);
        }
        let id = self.nodes.len();
        let level = self.nodes[parent].level + 1;
        self.nodes.push(Node {
            parent: Some(parent),
            level,
            value: Some(value.clone()),
            children: FxHashMap::default(),
            entry: None,
        });
        self.nodes[parent].children.insert(value.clone(), id);
        (id, true)
    }

    /// Rebuilds `path` (root first) from `level` down for `key`.
    ///
    /// Levels above `level` are kept as they are. Returns whether the node at
    /// `level` already existed.
    pub(crate) fn descend(&mut self, path: &mut Vec<EntryId>, key: &GroupKey, level: usize) -> bool {
        path.truncate(level);
        if path.is_empty() {
            path.push(ROOT);
        }
        let mut existed = true;
        for (index, value) in key.levels().iter().enumerate().skip(level - 1) {
            let parent = path[path.len() - 1];
            let (id, created) = self.child(parent, value);
            if index + 1 == level {
                existed = !created;
            }
            path.push(id);
        }
        existed
    }

    /// Reopens the groups of `key` after a break at `level`.
    ///
    /// A group that already exists at the break level was closed earlier and
    /// shows up again, which means the input was not sorted. Its records keep
    /// merging into the existing entry.
    pub(crate) fn reopen(&mut self, path: &mut Vec<EntryId>, key: &GroupKey, level: usize) {
        if self.descend(path, key, level) {
            self.stats.revisited_groups += 1;
            if !self.revisit_warned {
                self.revisit_warned = true;
                warn!(
                    group = %key.prefix(level),
                    level,
                    "group seen again after it closed; input is not sorted on the group fields, merging into the existing entry"
                );
            }
        }
    }

    /// Folds one record into every accumulator along `path`.
    ///
    /// `path` holds the root followed by one node per level.
    pub(crate) fn fold_path(&mut self, path: &[EntryId], record: &Value) -> Result<()> {
        self.stats.records += 1;
        let seq = self.stats.records;
        let inputs = self.program.evaluate(record);
        for &id in path {
            if self.holds_entry(self.nodes[id].level) {
                self.fold_entry(id, &inputs, seq)?;
            }
        }
        Ok(())
    }

    fn fold_entry(
        &mut self,
        id: EntryId,
        inputs: &std::result::Result<Vec<Input<'_>>, FoldError>,
        seq: u64,
    ) -> Result<()> {
        if self.nodes[id].entry.is_none() {
            if let Some(limit) = self.max_groups {
                if self.entries >= limit {
                    return Err(Error::GroupLimitExceeded { limit });
                }
            }
            self.entries += 1;
            self.nodes[id].entry = Some(Entry::Ready(AggregationAccumulator::new(&self.program)));
        }

        let outcome = match (&mut self.nodes[id].entry, inputs) {
            (Some(Entry::Failed(marker)), _) => {
                marker.skipped += 1;
                Ok(())
            }
            (Some(Entry::Ready(_)), Err(error)) => Err(error.clone()),
            (Some(Entry::Ready(acc)), Ok(inputs)) => acc.apply(inputs, seq),
            (None, _) => Ok(()),
        };

        if let Err(error) = outcome {
            self.stats.failed_groups += 1;
            warn!(
                group = %self.key_of(id),
                code = "GFLOW-003",
                error = %error,
                record = seq,
                "fold failed, group marked unavailable"
            );
            self.nodes[id].entry = Some(Entry::Failed(ErrorMarker {
                error,
                record_seq: seq,
                skipped: 0,
            }));
        }
        Ok(())
    }

    /// Folds a record into the group `key` (and its prefixes when cumulative).
    ///
    /// Walks the key from the root, one lookup per level. A per-group fold
    /// error marks that group and is not returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the key depth does not match the
    /// table, or [`Error::GroupLimitExceeded`] when a new group would pass the
    /// configured limit.
    pub fn update(&mut self, key: &GroupKey, record: &Value) -> Result<()> {
        if key.depth() != self.depth {
            return Err(Error::InvalidState(format!(
                "key {key} has {} levels, table has {}",
                key.depth(),
                self.depth
            )));
        }
        let mut path = Vec::with_capacity(self.depth + 1);
        path.push(ROOT);
        if self.depth > 0 {
            self.descend(&mut path, key, 1);
        }
        self.fold_path(&path, record)
    }

    /// Looks up a group entry. The empty key is the grand total.
    #[must_use]
    pub fn get(&self, key: &GroupKey) -> Option<&Entry> {
        if key.depth() > self.depth {
            return None;
        }
        let mut id = ROOT;
        for value in key.levels() {
            id = *self.nodes[id].children.get(value)?;
        }
        self.nodes[id].entry.as_ref()
    }

    /// Group ids of the direct children of `key` that hold entries.
    pub(crate) fn children_of(&self, key: &GroupKey) -> Vec<EntryId> {
        let mut id = ROOT;
        for value in key.levels() {
            match self.nodes[id].children.get(value) {
                Some(&child) => id = child,
                None => return Vec::new(),
            }
        }
        let mut children: Vec<EntryId> = self.nodes[id]
            .children
            .values()
            .copied()
            .filter(|&child| self.nodes[child].entry.is_some())
            .collect();
        children.sort_unstable();
        children
    }

    /// Entry stored at a node id.
    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.nodes.get(id).and_then(|node| node.entry.as_ref())
    }

    /// Reconstructs the full key of a node.
    ///
    /// Values are collected leaf-to-root and reversed once.
    #[must_use]
    pub fn key_of(&self, id: EntryId) -> GroupKey {
        let mut levels = Vec::with_capacity(self.nodes[id].level);
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            if let Some(ref value) = node.value {
                levels.push(value.clone());
            }
            current = node.parent;
        }
        levels.reverse();
        GroupKey::new(levels)
    }

    /// `(key, entry)` pairs in first-seen order, the grand total first.
    pub fn iter(&self) -> impl Iterator<Item = (GroupKey, &Entry)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.entry.as_ref().map(|entry| (self.key_of(id), entry)))
    }

    /// Converts the table to a JSON array of groups.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let groups: Vec<Value> = self
            .iter()
            .map(|(key, entry)| {
                let key_json = serde_json::to_value(&key).unwrap_or(Value::Null);
                match entry {
                    Entry::Ready(acc) => json!({
                        "key": key_json,
                        "level": key.depth(),
                        "rows": acc.count(),
                        "aggregates": acc.to_json(),
                    }),
                    Entry::Failed(marker) => json!({
                        "key": key_json,
                        "level": key.depth(),
                        "error": marker.error.to_string(),
                        "record": marker.record_seq,
                        "skipped": marker.skipped,
                    }),
                }
            })
            .collect();
        Value::Array(groups)
    }
}
