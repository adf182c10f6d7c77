//! In-memory segment store for strata.
//!
//! Holds arbitrary collections of closed time segments, inserted in any
//! order, and answers point and range intersection queries from two
//! ordered indices (by start and by end).

mod segment;
mod store;

pub use segment::{BasicSegment, Segment, SegmentComparator};
pub use store::SegmentStore;
