//! Checkpoints and the locations they point to.

use crate::constants::RECORD_FIXED_SIZE;
use serde::{Deserialize, Serialize};
use strata_common::{Result, SafeReader, SafeWriter, StrataError, Timestamp};

/// A position in the source stream, defined by the producer.
///
/// Every location of one index is stored in the same fixed number of bytes
/// (the index's checkpoint size); shorter encodings are zero padded.
pub trait Location: Clone + Send + Sync {
    fn size_on_disk(&self) -> usize;

    fn serialize(&self, w: &mut SafeWriter<'_>) -> Result<()>;

    fn deserialize(r: &mut SafeReader<'_>) -> Result<Self>;
}

/// A byte offset into the source.
impl Location for u64 {
    fn size_on_disk(&self) -> usize {
        8
    }

    fn serialize(&self, w: &mut SafeWriter<'_>) -> Result<()> {
        w.put_u64(*self)
    }

    fn deserialize(r: &mut SafeReader<'_>) -> Result<Self> {
        r.get_u64()
    }
}

/// A sampled position: the event of the given rank and timestamp starts at
/// `location`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint<L> {
    pub timestamp: Timestamp,
    pub rank: u64,
    pub location: L,
}

impl<L: Location> Checkpoint<L> {
    pub fn new(timestamp: Timestamp, rank: u64, location: L) -> Self {
        Self {
            timestamp,
            rank,
            location,
        }
    }

    /// Size of one record holding a location of `checkpoint_size` bytes.
    pub fn record_size(checkpoint_size: usize) -> usize {
        RECORD_FIXED_SIZE + checkpoint_size
    }

    /// Encodes the checkpoint into `buf`, which must be exactly one record.
    pub fn serialize(&self, buf: &mut [u8], checkpoint_size: usize) -> Result<()> {
        let location_size = self.location.size_on_disk();
        if location_size > checkpoint_size {
            return Err(StrataError::SerializationOverflow {
                needed: location_size,
                available: checkpoint_size,
            });
        }

        let mut w = SafeWriter::new(buf);
        w.put_i64(self.timestamp)?;
        w.put_u64(self.rank)?;
        let mut location = w.sub_writer(checkpoint_size)?;
        self.location.serialize(&mut location)?;
        let padding = location.remaining();
        location.put_zeros(padding)
    }

    pub fn deserialize(buf: &[u8], checkpoint_size: usize) -> Result<Self> {
        let mut r = SafeReader::new(buf);
        let timestamp = r.get_i64()?;
        let rank = r.get_u64()?;
        let mut location = r.sub_reader(checkpoint_size)?;
        let location = L::deserialize(&mut location)?;
        Ok(Self {
            timestamp,
            rank,
            location,
        })
    }
}
