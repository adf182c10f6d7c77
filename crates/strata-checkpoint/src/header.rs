//! Checkpoint index file header.

use crate::constants::{HEADER_CHECKSUM_OFFSET, HEADER_RECORD, HEADER_SIZE, INDEX_MAGIC, INDEX_VERSION};
use strata_common::{Result, SafeReader, SafeWriter, SearchKey, StrataError, TimeRange};

/// Header at the beginning of the index file.
///
/// Layout (64 bytes):
/// - magic: 4 bytes ("SCKP")
/// - version: 4 bytes
/// - checkpoint_size: 4 bytes
/// - search_key: 4 bytes
/// - record_count: 8 bytes
/// - event_count: 8 bytes
/// - time_start: 8 bytes
/// - time_end: 8 bytes
/// - reserved: 12 bytes
/// - checksum: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u32,
    pub checkpoint_size: u32,
    pub search_key: SearchKey,
    pub record_count: u64,
    pub event_count: u64,
    /// `None` until the first checkpoint or explicit range is recorded.
    pub time_range: Option<TimeRange>,
}

impl IndexHeader {
    pub fn new(checkpoint_size: u32, search_key: SearchKey) -> Self {
        Self {
            version: INDEX_VERSION,
            checkpoint_size,
            search_key,
            record_count: 0,
            event_count: 0,
            time_range: None,
        }
    }

    pub fn to_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut data = [0u8; HEADER_SIZE];
        // An empty range is stored as start > end
        let range = self
            .time_range
            .unwrap_or(TimeRange::new(i64::MAX, i64::MIN));
        {
            let mut w = SafeWriter::new(&mut data);
            w.put_slice(&INDEX_MAGIC)?;
            w.put_u32(self.version)?;
            w.put_u32(self.checkpoint_size)?;
            w.put_u32(search_key_to_u32(self.search_key))?;
            w.put_u64(self.record_count)?;
            w.put_u64(self.event_count)?;
            w.put_i64(range.start)?;
            w.put_i64(range.end)?;
        }
        let checksum = crc32fast::hash(&data[..HEADER_CHECKSUM_OFFSET]);
        data[HEADER_CHECKSUM_OFFSET..].copy_from_slice(&checksum.to_le_bytes());
        Ok(data)
    }

    /// Parses and validates a header.
    ///
    /// Damage is reported as `CorruptRecord`, a different format version as
    /// `StaleIndex`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| StrataError::CorruptRecord {
            index: HEADER_RECORD,
            reason: format!("header: {reason}"),
        };
        if data.len() < HEADER_SIZE {
            return Err(corrupt(format!("{} bytes, expected {HEADER_SIZE}", data.len())));
        }

        let mut r = SafeReader::new(&data[..HEADER_SIZE]);
        if r.get_slice(4)? != INDEX_MAGIC {
            return Err(corrupt("invalid magic bytes".to_string()));
        }
        let version = r.get_u32()?;
        let checkpoint_size = r.get_u32()?;
        let search_key = r.get_u32()?;
        let record_count = r.get_u64()?;
        let event_count = r.get_u64()?;
        let start = r.get_i64()?;
        let end = r.get_i64()?;

        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[HEADER_CHECKSUM_OFFSET..HEADER_SIZE]);
        if crc32fast::hash(&data[..HEADER_CHECKSUM_OFFSET]) != u32::from_le_bytes(checksum) {
            return Err(corrupt("checksum mismatch".to_string()));
        }
        if version != INDEX_VERSION {
            return Err(StrataError::StaleIndex(format!(
                "format version {version} (expected {INDEX_VERSION})"
            )));
        }
        let search_key = search_key_from_u32(search_key)
            .ok_or_else(|| corrupt(format!("unknown search key {search_key}")))?;

        Ok(Self {
            version,
            checkpoint_size,
            search_key,
            record_count,
            event_count,
            time_range: (start <= end).then(|| TimeRange::new(start, end)),
        })
    }
}

fn search_key_to_u32(key: SearchKey) -> u32 {
    match key {
        SearchKey::Timestamp => 0,
        SearchKey::Rank => 1,
    }
}

fn search_key_from_u32(value: u32) -> Option<SearchKey> {
    match value {
        0 => Some(SearchKey::Timestamp),
        1 => Some(SearchKey::Rank),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let mut header = IndexHeader::new(8, SearchKey::Rank);
        header.record_count = 12;
        header.event_count = 12_000;
        header.time_range = Some(TimeRange::new(-3, 99));

        let bytes = header.to_bytes().unwrap();
        assert_eq!(&bytes[0..4], b"SCKP");
        assert_eq!(IndexHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_empty_time_range() {
        let header = IndexHeader::new(8, SearchKey::Timestamp);
        let decoded = IndexHeader::from_bytes(&header.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.time_range, None);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = IndexHeader::new(8, SearchKey::Timestamp).to_bytes().unwrap();
        bytes[0] = b'X';
        let err = IndexHeader::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            StrataError::CorruptRecord {
                index: HEADER_RECORD,
                ..
            }
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = IndexHeader::new(8, SearchKey::Timestamp).to_bytes().unwrap();
        bytes[20] ^= 0x01;
        assert!(matches!(
            IndexHeader::from_bytes(&bytes),
            Err(StrataError::CorruptRecord { .. })
        ));
    }

    #[test]
    fn test_version_mismatch_is_stale() {
        let mut header = IndexHeader::new(8, SearchKey::Timestamp);
        header.version = INDEX_VERSION + 1;
        let bytes = header.to_bytes().unwrap();
        assert!(matches!(
            IndexHeader::from_bytes(&bytes),
            Err(StrataError::StaleIndex(_))
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(matches!(
            IndexHeader::from_bytes(&[0u8; 10]),
            Err(StrataError::CorruptRecord { .. })
        ));
    }
}
