//! Node caching for strata.
//!
//! This crate provides a bounded in-memory cache of deserialized nodes with:
//! - Fixed slot count, configured or sized from available memory
//! - Clock (second-chance) eviction
//! - Shared `Arc` handles so eviction never invalidates a reader's node
//! - Hit and miss counters

mod cache;
mod replacer;
mod slot;

pub use cache::NodeCache;
pub use replacer::{ClockReplacer, Replacer};
pub use slot::SlotId;
