//! Bounded cache of deserialized nodes.

use crate::replacer::{ClockReplacer, Replacer};
use crate::slot::{Slot, SlotId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sysinfo::System;
use tracing::debug;

/// Smallest cache created by `auto_sized`.
const MIN_AUTO_SLOTS: usize = 256;

/// Largest cache created by `auto_sized`.
const MAX_AUTO_SLOTS: usize = 16 * 1024;

/// Upper bound on the memory `auto_sized` budgets for cached blocks.
const MAX_AUTO_BYTES: usize = 256 * 1024 * 1024;

/// Node cache keyed by sequence number.
///
/// Values are handed out as `Arc<V>`, so an evicted node stays alive for
/// readers still holding it. Only immutable values belong here; the caller
/// is responsible for never caching a node that can still change.
pub struct NodeCache<V> {
    capacity: usize,
    inner: Mutex<CacheInner<V>>,
    replacer: ClockReplacer,
    hits: AtomicU64,
    misses: AtomicU64,
}

struct CacheInner<V> {
    /// Grows one slot at a time up to `capacity`.
    slots: Vec<Option<Slot<V>>>,
    table: HashMap<u32, SlotId>,
    free_list: Vec<SlotId>,
}

impl<V> NodeCache<V> {
    /// Creates a cache holding at most `capacity` values (at least one).
    /// Slots are allocated as values arrive, not up front.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                slots: Vec::new(),
                table: HashMap::new(),
                free_list: Vec::new(),
            }),
            replacer: ClockReplacer::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized to 5% of available memory (at most 256 MiB)
    /// for blocks of `block_size` bytes, clamped to 256..=16384 slots.
    pub fn auto_sized(block_size: usize) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = (available_bytes / 20).min(MAX_AUTO_BYTES);
        let capacity = (target_bytes / block_size.max(1)).clamp(MIN_AUTO_SLOTS, MAX_AUTO_SLOTS);
        debug!(capacity, block_size, "auto-sized node cache");

        Self::new(capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.inner.lock().table.contains_key(&seq)
    }

    /// Looks up a value, counting a hit or a miss.
    pub fn get(&self, seq: u32) -> Option<Arc<V>> {
        let inner = self.inner.lock();
        match inner.table.get(&seq) {
            Some(&slot) => {
                self.replacer.record_access(slot);
                self.hits.fetch_add(1, Ordering::Relaxed);
                inner.slots[slot.index()]
                    .as_ref()
                    .map(|entry| Arc::clone(&entry.value))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Caches `value` under `seq`, evicting if the cache is full.
    ///
    /// If `seq` is already cached the existing value wins and is returned.
    pub fn insert(&self, seq: u32, value: Arc<V>) -> Arc<V> {
        let mut inner = self.inner.lock();
        if let Some(&slot) = inner.table.get(&seq) {
            if let Some(entry) = &inner.slots[slot.index()] {
                return Arc::clone(&entry.value);
            }
        }

        let slot = match inner.free_list.pop() {
            Some(slot) => slot,
            None if inner.slots.len() < self.capacity => {
                inner.slots.push(None);
                SlotId((inner.slots.len() - 1) as u32)
            }
            None => match self.replacer.evict() {
                Some(victim) => {
                    if let Some(old) = inner.slots[victim.index()].take() {
                        inner.table.remove(&old.seq);
                        debug!(seq = old.seq, %victim, "evicted node from cache");
                    }
                    victim
                }
                // Every slot is evictable once filled, so this only happens
                // if the replacer and the table disagree
                None => return value,
            },
        };

        inner.slots[slot.index()] = Some(Slot::new(seq, Arc::clone(&value)));
        inner.table.insert(seq, slot);
        self.replacer.set_evictable(slot, true);
        value
    }

    /// Returns the cached value or loads it with `load` and caches it.
    ///
    /// `load` runs without the cache lock held, so two readers missing on the
    /// same sequence number may both load it; the first insert wins.
    pub fn get_or_load<E, F>(&self, seq: u32, load: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(seq) {
            return Ok(value);
        }
        let value = Arc::new(load()?);
        Ok(self.insert(seq, value))
    }

    /// Drops a value from the cache. Returns true if it was present.
    pub fn remove(&self, seq: u32) -> bool {
        let mut inner = self.inner.lock();
        match inner.table.remove(&seq) {
            Some(slot) => {
                inner.slots[slot.index()] = None;
                self.replacer.remove(slot);
                inner.free_list.push(slot);
                true
            }
            None => false,
        }
    }

    /// Drops every cached value.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let occupied: Vec<SlotId> = inner.table.drain().map(|(_, slot)| slot).collect();
        for slot in occupied {
            inner.slots[slot.index()] = None;
            self.replacer.remove(slot);
            inner.free_list.push(slot);
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Fraction of lookups served from the cache (0.0 before any lookup).
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
