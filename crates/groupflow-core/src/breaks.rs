//! Multi-level group break detection over a sorted stream.

use crate::group_key::GroupKey;

/// Outcome of comparing consecutive group keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakLevel {
    /// Same group at every level.
    None,
    /// The group changed at this 1-based level and everything below it.
    Level(usize),
    /// First record of the stream: every level opens.
    Initial,
}

impl BreakLevel {
    /// Numeric form: 0 for no break, `1..=depth` for a break, `depth + 1` for
    /// the first record.
    #[must_use]
    pub const fn code(self, depth: usize) -> usize {
        match self {
            Self::None => 0,
            Self::Level(level) => level,
            Self::Initial => depth + 1,
        }
    }

    /// Outermost level that opens a new group, if any.
    ///
    /// The first record opens every level, so it reports level 1.
    #[must_use]
    pub const fn opened_level(self) -> Option<usize> {
        match self {
            Self::None => None,
            Self::Level(level) => Some(level),
            Self::Initial => Some(1),
        }
    }

    /// True unless [`BreakLevel::None`].
    #[must_use]
    pub const fn is_break(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Remembers the previous key and reports where each new key breaks.
#[derive(Debug, Clone, Default)]
pub struct GroupBreakDetector {
    previous: Option<GroupKey>,
}

impl GroupBreakDetector {
    /// Creates a detector that has not seen any record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares two keys level by level, outermost first.
    #[must_use]
    pub fn detect(previous: Option<&GroupKey>, current: &GroupKey) -> BreakLevel {
        match previous {
            None => BreakLevel::Initial,
            Some(prev) => prev
                .first_difference(current)
                .map_or(BreakLevel::None, BreakLevel::Level),
        }
    }

    /// Detects the break for `current` and remembers it as the previous key.
    ///
    /// Returns the break, the key it replaced and the key now held.
    pub fn advance(&mut self, current: GroupKey) -> (BreakLevel, Option<GroupKey>, &GroupKey) {
        let level = Self::detect(self.previous.as_ref(), &current);
        let replaced = self.previous.take();
        (level, replaced, self.previous.insert(current))
    }

    /// Last observed key.
    #[must_use]
    pub fn previous(&self) -> Option<&GroupKey> {
        self.previous.as_ref()
    }
}
