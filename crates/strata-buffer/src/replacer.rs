//! Replacement policies for the node cache.

use crate::slot::SlotId;
use parking_lot::Mutex;
use std::collections::HashSet;

/// Trait for slot replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given slot was read.
    fn record_access(&self, slot: SlotId);

    /// Adds or removes a slot from the eviction candidates.
    fn set_evictable(&self, slot: SlotId, evictable: bool);

    /// Selects a victim slot and removes it from the candidates.
    ///
    /// Returns None if no slot is evictable.
    fn evict(&self) -> Option<SlotId>;

    /// Forgets a slot entirely.
    fn remove(&self, slot: SlotId);

    /// Returns the number of evictable slots.
    fn size(&self) -> usize;
}

/// Second-chance clock replacement.
///
/// The hand sweeps the slots in order. A candidate whose reference bit is
/// set has the bit cleared and is skipped once; the first candidate found
/// with a clear bit is the victim. Two sweeps always find one.
pub struct ClockReplacer {
    inner: Mutex<ClockInner>,
}

struct ClockInner {
    num_slots: usize,
    /// Reference bits, grown as slots are first touched.
    referenced: Vec<bool>,
    candidates: HashSet<SlotId>,
    hand: usize,
}

impl ClockReplacer {
    pub fn new(num_slots: usize) -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                num_slots,
                referenced: Vec::new(),
                candidates: HashSet::new(),
                hand: 0,
            }),
        }
    }

    /// Returns the total number of slots tracked.
    pub fn capacity(&self) -> usize {
        self.inner.lock().num_slots
    }
}

impl Replacer for ClockReplacer {
    fn record_access(&self, slot: SlotId) {
        let mut inner = self.inner.lock();
        let idx = slot.index();
        if idx >= inner.num_slots {
            return;
        }
        if idx >= inner.referenced.len() {
            inner.referenced.resize(idx + 1, false);
        }
        inner.referenced[idx] = true;
    }

    fn set_evictable(&self, slot: SlotId, evictable: bool) {
        let mut inner = self.inner.lock();
        if slot.index() >= inner.num_slots {
            return;
        }
        if evictable {
            inner.candidates.insert(slot);
        } else {
            inner.candidates.remove(&slot);
        }
    }

    fn evict(&self) -> Option<SlotId> {
        let mut inner = self.inner.lock();
        if inner.candidates.is_empty() {
            return None;
        }

        let num_slots = inner.num_slots;
        for _ in 0..(2 * num_slots) {
            let hand = inner.hand;
            inner.hand = (hand + 1) % num_slots;

            let slot = SlotId(hand as u32);
            if !inner.candidates.contains(&slot) {
                continue;
            }
            if let Some(bit) = inner.referenced.get_mut(hand) {
                if *bit {
                    *bit = false;
                    continue;
                }
            }
            inner.candidates.remove(&slot);
            return Some(slot);
        }
        None
    }

    fn remove(&self, slot: SlotId) {
        let mut inner = self.inner.lock();
        if slot.index() < inner.num_slots {
            inner.candidates.remove(&slot);
            if let Some(bit) = inner.referenced.get_mut(slot.index()) {
                *bit = false;
            }
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().candidates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replacer_with(num_slots: usize, evictable: &[u32]) -> ClockReplacer {
        let replacer = ClockReplacer::new(num_slots);
        for &slot in evictable {
            replacer.set_evictable(SlotId(slot), true);
        }
        replacer
    }

    #[test]
    fn test_empty_replacer() {
        let replacer = ClockReplacer::new(4);
        assert_eq!(replacer.capacity(), 4);
        assert_eq!(replacer.size(), 0);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_evicts_in_hand_order_without_references() {
        let replacer = replacer_with(4, &[0, 1, 2, 3]);
        assert_eq!(replacer.evict(), Some(SlotId(0)));
        assert_eq!(replacer.evict(), Some(SlotId(1)));
        assert_eq!(replacer.evict(), Some(SlotId(2)));
        assert_eq!(replacer.size(), 1);
    }

    #[test]
    fn test_referenced_slot_gets_second_chance() {
        let replacer = replacer_with(3, &[0, 1, 2]);
        replacer.record_access(SlotId(0));
        replacer.record_access(SlotId(1));

        assert_eq!(replacer.evict(), Some(SlotId(2)));
        // Bits of 0 and 1 were cleared by the sweep
        assert_eq!(replacer.evict(), Some(SlotId(0)));
    }

    #[test]
    fn test_all_referenced_still_evicts() {
        let replacer = replacer_with(3, &[0, 1, 2]);
        for slot in 0..3 {
            replacer.record_access(SlotId(slot));
        }
        assert_eq!(replacer.evict(), Some(SlotId(0)));
        assert_eq!(replacer.size(), 2);
    }

    #[test]
    fn test_non_evictable_slots_are_skipped() {
        let replacer = replacer_with(3, &[0, 1, 2]);
        replacer.set_evictable(SlotId(0), false);
        assert_eq!(replacer.size(), 2);
        assert_eq!(replacer.evict(), Some(SlotId(1)));
    }

    #[test]
    fn test_remove_clears_reference() {
        let replacer = replacer_with(2, &[0, 1]);
        replacer.record_access(SlotId(1));
        replacer.remove(SlotId(0));
        assert_eq!(replacer.size(), 1);

        // Slot 1 is re-added without its old reference bit
        replacer.remove(SlotId(1));
        replacer.set_evictable(SlotId(1), true);
        assert_eq!(replacer.evict(), Some(SlotId(1)));
    }

    #[test]
    fn test_out_of_range_slots_ignored() {
        let replacer = ClockReplacer::new(2);
        replacer.set_evictable(SlotId(10), true);
        replacer.record_access(SlotId(10));
        replacer.remove(SlotId(10));
        assert_eq!(replacer.size(), 0);
    }
}
