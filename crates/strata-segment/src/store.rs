//! Dual-indexed segment store.
//!
//! Segments are kept in two ordered multi-maps, one keyed by start time and
//! one keyed by end time. Segments sharing a key are kept in a set ordered
//! by end time, then by their natural ordering, so identical bounds never
//! collapse two distinct segments while an exact duplicate is stored only
//! once.
//!
//! A point or range query is the intersection of a head scan of the start
//! index and a tail scan of the end index. Only one of the two scans is run:
//! the one whose side of the query is shorter, with the other condition
//! applied as a filter.

use crate::segment::{Segment, SegmentComparator};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use strata_common::Timestamp;
use tracing::debug;

/// Segments sharing one key, ordered by `(end, segment)`.
type Bucket<S> = BTreeSet<(Timestamp, S)>;

struct Indices<S> {
    by_start: BTreeMap<Timestamp, Bucket<S>>,
    by_end: BTreeMap<Timestamp, Bucket<S>>,
    len: usize,
}

impl<S: Segment> Indices<S> {
    fn new() -> Self {
        Self {
            by_start: BTreeMap::new(),
            by_end: BTreeMap::new(),
            len: 0,
        }
    }

    fn insert(&mut self, segment: S) -> bool {
        if !self
            .by_start
            .entry(segment.start())
            .or_default()
            .insert((segment.end(), segment.clone()))
        {
            return false;
        }
        self.by_end
            .entry(segment.end())
            .or_default()
            .insert((segment.end(), segment));
        self.len += 1;
        true
    }

    fn contains(&self, segment: &S) -> bool {
        self.by_start
            .get(&segment.start())
            .is_some_and(|set| set.contains(&(segment.end(), segment.clone())))
    }

    fn in_start_order(&self) -> impl Iterator<Item = &S> {
        self.by_start.values().flatten().map(|(_, segment)| segment)
    }

    /// True when scanning the start index up to `head_end` touches less of
    /// the time span than scanning the end index from `tail_start`.
    fn prefer_start_index(&self, head_end: Timestamp, tail_start: Timestamp) -> bool {
        match (self.by_start.keys().next(), self.by_end.keys().next_back()) {
            (Some(&first_start), Some(&last_end)) => {
                head_end.saturating_sub(first_start) <= last_end.saturating_sub(tail_start)
            }
            _ => true,
        }
    }

    /// Segments with `start <= end` and `segment.end >= start`.
    fn intersecting(&self, start: Timestamp, end: Timestamp) -> Vec<S> {
        if self.prefer_start_index(end, start) {
            self.by_start
                .range(..=end)
                .flat_map(|(_, set)| set.iter().map(|(_, segment)| segment))
                .filter(|s| s.end() >= start)
                .cloned()
                .collect()
        } else {
            let mut found: Vec<S> = self
                .by_end
                .range(start..)
                .flat_map(|(_, set)| set.iter().map(|(_, segment)| segment))
                .filter(|s| s.start() <= end)
                .cloned()
                .collect();
            found.sort_by(start_order);
            found
        }
    }
}

fn start_order<S: Segment>(a: &S, b: &S) -> std::cmp::Ordering {
    a.start()
        .cmp(&b.start())
        .then_with(|| a.end().cmp(&b.end()))
        .then_with(|| a.cmp(b))
}

/// In-memory collection of closed segments answering intersection queries.
///
/// All mutation takes the write lock and all queries take the read lock.
/// Results are copies taken under the lock: they do not observe segments
/// added after the call returns. Removal of individual segments is not
/// supported; `clear` empties the store.
pub struct SegmentStore<S: Segment> {
    inner: RwLock<Indices<S>>,
}

impl<S: Segment> SegmentStore<S> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices::new()),
        }
    }

    /// Builds a store from segments in any order.
    pub fn from_segments(segments: impl IntoIterator<Item = S>) -> Self {
        let store = Self::new();
        store.add_all(segments);
        store
    }

    /// Adds a segment. Returns false if an equal segment is already stored.
    pub fn add(&self, segment: S) -> bool {
        self.inner.write().insert(segment)
    }

    /// Adds every segment, returning how many were new.
    pub fn add_all(&self, segments: impl IntoIterator<Item = S>) -> usize {
        let mut inner = self.inner.write();
        segments
            .into_iter()
            .map(|segment| inner.insert(segment))
            .filter(|added| *added)
            .count()
    }

    pub fn size(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn contains(&self, segment: &S) -> bool {
        self.inner.read().contains(segment)
    }

    pub fn contains_all<'a>(&self, segments: impl IntoIterator<Item = &'a S>) -> bool
    where
        S: 'a,
    {
        let inner = self.inner.read();
        segments.into_iter().all(|segment| inner.contains(segment))
    }

    /// All segments by start time, ties by end time and then natural order.
    pub fn to_vec(&self) -> Vec<S> {
        self.inner.read().in_start_order().cloned().collect()
    }

    /// Iterates over a snapshot of the store in start order.
    pub fn iter(&self) -> std::vec::IntoIter<S> {
        self.to_vec().into_iter()
    }

    /// All segments sorted by `comparator`.
    pub fn iter_sorted(&self, comparator: SegmentComparator) -> std::vec::IntoIter<S> {
        let mut segments = self.to_vec();
        comparator.sort(&mut segments);
        segments.into_iter()
    }

    /// Segments with `start <= time <= end`, in start order.
    pub fn intersecting_at(&self, time: Timestamp) -> Vec<S> {
        self.inner.read().intersecting(time, time)
    }

    /// Segments sharing at least one point with `[start, end]`, in start
    /// order. Bounds given in reverse are swapped.
    pub fn intersecting_range(&self, start: Timestamp, end: Timestamp) -> Vec<S> {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        self.inner.read().intersecting(start, end)
    }

    pub fn intersecting_at_sorted(&self, time: Timestamp, comparator: SegmentComparator) -> Vec<S> {
        let mut found = self.intersecting_at(time);
        comparator.sort(&mut found);
        found
    }

    pub fn intersecting_range_sorted(
        &self,
        start: Timestamp,
        end: Timestamp,
        comparator: SegmentComparator,
    ) -> Vec<S> {
        let mut found = self.intersecting_range(start, end);
        comparator.sort(&mut found);
        found
    }

    /// Removes every segment.
    pub fn clear(&self) {
        *self.inner.write() = Indices::new();
    }

    /// Releases the store's contents. The store stays usable and empty.
    pub fn dispose(&self) {
        let mut inner = self.inner.write();
        debug!(segments = inner.len, "disposing segment store");
        *inner = Indices::new();
    }
}

impl<S: Segment> Default for SegmentStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Segment> FromIterator<S> for SegmentStore<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::from_segments(iter)
    }
}

impl<S: Segment> Extend<S> for SegmentStore<S> {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.add_all(iter);
    }
}

impl<S: Segment + std::fmt::Debug> std::fmt::Debug for SegmentStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentStore")
            .field("size", &self.size())
            .finish()
    }
}
