//! Checkpoint index for strata.
//!
//! Maps a sparse sample of positions in a sequential source (timestamp,
//! rank) to producer-defined locations, so a reader can seek close to any
//! event and scan forward from there.

mod checkpoint;
mod constants;
mod header;
mod index;
mod indexer;

pub use checkpoint::{Checkpoint, Location};
pub use constants::{HEADER_RECORD, HEADER_SIZE, INDEX_MAGIC, INDEX_VERSION, RECORD_FIXED_SIZE};
pub use header::IndexHeader;
pub use index::CheckpointIndex;
pub use indexer::CheckpointIndexer;
