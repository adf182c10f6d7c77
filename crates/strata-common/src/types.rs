//! Time and attribute identifiers shared by all strata components.

use serde::{Deserialize, Serialize};

/// A point in trace time (nanoseconds in practice, but the unit is opaque).
pub type Timestamp = i64;

/// End time of an interval that is still ongoing.
pub const OPEN_END: Timestamp = Timestamp::MAX;

/// Handle into the external attribute namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeId(pub u32);

impl AttributeId {
    /// Returns the attribute as an index into a state vector.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for AttributeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Inclusive time range covered by a tree or an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a new time range.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Returns true if `time` is within `[start, end]`.
    pub fn contains(&self, time: Timestamp) -> bool {
        self.start <= time && time <= self.end
    }

    /// Returns true if this range overlaps `[start, end]`.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= end && start <= self.end
    }

    /// Widens this range so that it includes `time`.
    pub fn extend(&mut self, time: Timestamp) {
        self.start = self.start.min(time);
        self.end = self.end.max(time);
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
