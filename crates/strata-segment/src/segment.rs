//! Segments and the orderings used to sort them.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strata_common::{Result, StrataError, Timestamp};

/// A closed time interval `[start, end]`.
///
/// The natural ordering (`Ord`) must be consistent with equality and is used
/// to keep segments with identical bounds apart in the store.
pub trait Segment: Ord + Clone {
    fn start(&self) -> Timestamp;

    fn end(&self) -> Timestamp;

    fn length(&self) -> i64 {
        self.end() - self.start()
    }

    /// True if `time` lies within `[start, end]`.
    fn contains_time(&self, time: Timestamp) -> bool {
        self.start() <= time && time <= self.end()
    }

    /// True if the segment shares at least one point with `[start, end]`.
    fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start() <= end && self.end() >= start
    }
}

/// A segment carrying nothing but its bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BasicSegment {
    start: Timestamp,
    end: Timestamp,
}

impl BasicSegment {
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(StrataError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }
}

impl Segment for BasicSegment {
    #[inline]
    fn start(&self) -> Timestamp {
        self.start
    }

    #[inline]
    fn end(&self) -> Timestamp {
        self.end
    }
}

impl std::fmt::Display for BasicSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Orderings for sorted iteration over segments.
///
/// Each ordering breaks ties on the other bound and finally on the natural
/// ordering, so it is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentComparator {
    ByStart,
    ByStartReversed,
    ByEnd,
    ByEndReversed,
    ByLength,
    ByLengthReversed,
}

impl SegmentComparator {
    pub fn compare<S: Segment>(self, a: &S, b: &S) -> Ordering {
        match self {
            SegmentComparator::ByStart => Self::by_start(a, b),
            SegmentComparator::ByStartReversed => Self::by_start(b, a),
            SegmentComparator::ByEnd => Self::by_end(a, b),
            SegmentComparator::ByEndReversed => Self::by_end(b, a),
            SegmentComparator::ByLength => Self::by_length(a, b),
            SegmentComparator::ByLengthReversed => Self::by_length(b, a),
        }
    }

    pub fn reversed(self) -> Self {
        match self {
            SegmentComparator::ByStart => SegmentComparator::ByStartReversed,
            SegmentComparator::ByStartReversed => SegmentComparator::ByStart,
            SegmentComparator::ByEnd => SegmentComparator::ByEndReversed,
            SegmentComparator::ByEndReversed => SegmentComparator::ByEnd,
            SegmentComparator::ByLength => SegmentComparator::ByLengthReversed,
            SegmentComparator::ByLengthReversed => SegmentComparator::ByLength,
        }
    }

    /// Sorts `segments` in place.
    pub fn sort<S: Segment>(self, segments: &mut [S]) {
        segments.sort_by(|a, b| self.compare(a, b));
    }

    fn by_start<S: Segment>(a: &S, b: &S) -> Ordering {
        a.start()
            .cmp(&b.start())
            .then_with(|| a.end().cmp(&b.end()))
            .then_with(|| a.cmp(b))
    }

    fn by_end<S: Segment>(a: &S, b: &S) -> Ordering {
        a.end()
            .cmp(&b.end())
            .then_with(|| a.start().cmp(&b.start()))
            .then_with(|| a.cmp(b))
    }

    fn by_length<S: Segment>(a: &S, b: &S) -> Ordering {
        a.length()
            .cmp(&b.length())
            .then_with(|| a.start().cmp(&b.start()))
            .then_with(|| a.cmp(b))
    }
}
