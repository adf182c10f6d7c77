//! Cache slots.

use std::sync::Arc;

/// Index of a slot in the node cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u32);

impl SlotId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// One occupied cache entry: a sealed node and the sequence number it was
/// read from.
pub(crate) struct Slot<V> {
    pub(crate) seq: u32,
    pub(crate) value: Arc<V>,
}

impl<V> Slot<V> {
    pub(crate) fn new(seq: u32, value: Arc<V>) -> Self {
        Self { seq, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_display() {
        assert_eq!(SlotId(3).to_string(), "slot:3");
        assert_eq!(SlotId(3).index(), 3);
    }

    #[test]
    fn test_slot_shares_value() {
        let value = Arc::new(String::from("leaf"));
        let slot = Slot::new(4, Arc::clone(&value));
        assert_eq!(slot.seq, 4);
        assert!(Arc::ptr_eq(&slot.value, &value));
        assert_eq!(Arc::strong_count(&value), 2);
    }
}
