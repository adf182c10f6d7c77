//! State intervals stored in the history tree.

use strata_common::{
    AttributeId, Result, SafeReader, SafeWriter, StrataError, Timestamp, Value, OPEN_END,
};

/// Fixed part of a serialized interval: start, end and attribute.
pub const INTERVAL_FIXED_SIZE: usize = 8 + 8 + 4;

/// The value of one attribute over `[start, end)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub start: Timestamp,
    pub end: Timestamp,
    pub attribute: AttributeId,
    pub value: Value,
}

impl Interval {
    /// Creates a closed interval.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        attribute: AttributeId,
        value: impl Into<Value>,
    ) -> Result<Self> {
        if start > end {
            return Err(StrataError::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            attribute,
            value: value.into(),
        })
    }

    /// Creates an interval that is still ongoing.
    pub fn ongoing(start: Timestamp, attribute: AttributeId, value: impl Into<Value>) -> Self {
        Self {
            start,
            end: OPEN_END,
            attribute,
            value: value.into(),
        }
    }

    #[inline]
    pub fn is_ongoing(&self) -> bool {
        self.end == OPEN_END
    }

    /// True for `[t, t)` intervals, which cover no time at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn contains(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.end
    }

    /// True if any point of the interval lies within `[start, end]`.
    #[inline]
    pub fn intersects(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start <= end && self.end > start
    }

    /// Returns a copy of this interval ending at `end`.
    pub fn closed_at(&self, end: Timestamp) -> Result<Self> {
        Self::new(self.start, end, self.attribute, self.value.clone())
    }

    pub fn size_on_disk(&self) -> usize {
        INTERVAL_FIXED_SIZE + self.value.size_on_disk()
    }

    pub fn serialize(&self, w: &mut SafeWriter<'_>) -> Result<()> {
        w.put_i64(self.start)?;
        w.put_i64(self.end)?;
        w.put_u32(self.attribute.0)?;
        self.value.serialize(w)
    }

    pub fn deserialize(r: &mut SafeReader<'_>) -> Result<Self> {
        let start = r.get_i64()?;
        let end = r.get_i64()?;
        let attribute = AttributeId(r.get_u32()?);
        let value = Value::deserialize(r)?;
        Self::new(start, end, attribute, value)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_ongoing() {
            write!(f, "[{}, ...) {} = {}", self.start, self.attribute, self.value)
        } else {
            write!(
                f,
                "[{}, {}) {} = {}",
                self.start, self.end, self.attribute, self.value
            )
        }
    }
}
