//! Checkpoint index file layout constants.

/// Magic bytes identifying a checkpoint index file.
pub const INDEX_MAGIC: [u8; 4] = *b"SCKP";

/// Current format version.
pub const INDEX_VERSION: u32 = 1;

/// Index header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Offset of the header checksum.
pub(crate) const HEADER_CHECKSUM_OFFSET: usize = 60;

/// Fixed part of every record: timestamp (8) + rank (8).
pub const RECORD_FIXED_SIZE: usize = 16;

/// Record index reported for errors found in the header.
pub const HEADER_RECORD: u64 = u64::MAX;
