//! Sampling front-end feeding a checkpoint index while a source is scanned.

use crate::checkpoint::{Checkpoint, Location};
use crate::index::CheckpointIndex;
use strata_common::{Result, TimeRange, Timestamp};
use tracing::info;

/// Records one checkpoint every `checkpoint_interval` events.
///
/// Events are numbered from zero in the order they are observed, so the
/// event of rank `r` is sampled when `r % interval == 0`. Seeking to any
/// rank therefore never needs to read more than `interval - 1` events past
/// the checkpoint it starts from.
pub struct CheckpointIndexer<L> {
    index: CheckpointIndex<L>,
    interval: u64,
    events: u64,
}

impl<L: Location> CheckpointIndexer<L> {
    /// Wraps an index. An index that already holds data continues from its
    /// recorded event count.
    pub fn new(index: CheckpointIndex<L>) -> Self {
        let interval = index.config().checkpoint_interval;
        let events = index.nb_events();
        Self {
            index,
            interval,
            events,
        }
    }

    /// Registers the next event, found at `location` with `timestamp`, and
    /// widens the index time range to cover it. Returns true if a checkpoint
    /// was recorded for it.
    pub fn observe(&mut self, timestamp: Timestamp, location: L) -> Result<bool> {
        let rank = self.events;
        let sampled = rank % self.interval == 0;
        if sampled {
            self.index
                .insert(&Checkpoint::new(timestamp, rank, location))?;
        }

        let range = match self.index.time_range() {
            Some(mut range) => {
                range.extend(timestamp);
                range
            }
            None => TimeRange::new(timestamp, timestamp),
        };
        self.index.set_time_range(range);
        self.events += 1;
        self.index.set_nb_events(self.events);
        Ok(sampled)
    }

    /// Number of events observed so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    pub fn index(&self) -> &CheckpointIndex<L> {
        &self.index
    }

    /// Flushes the index and hands it back for seeking.
    pub fn finish(self) -> Result<CheckpointIndex<L>> {
        self.index.flush()?;
        info!(
            events = self.events,
            checkpoints = self.index.size(),
            "checkpoint indexing finished"
        );
        Ok(self.index)
    }
}
