//! Flat on-disk checkpoint index.
//!
//! The file is a header followed by fixed-size records in insertion order.
//! Records are appended as they arrive; the header (record count, event
//! count, time range) is rewritten on `flush`. A file whose header does not
//! account for every record it contains was not flushed and is treated as
//! corrupt on open.

use crate::checkpoint::{Checkpoint, Location};
use crate::constants::{HEADER_RECORD, HEADER_SIZE};
use crate::header::IndexHeader;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::{
    CheckpointIndexConfig, Result, SearchKey, StrataError, TimeRange, Timestamp,
};
use tracing::{debug, info, warn};

/// Writer-side bookkeeping.
struct IndexMeta {
    event_count: u64,
    time_range: Option<TimeRange>,
    last: Option<(u64, Timestamp)>,
}

/// Sparse `(timestamp, rank, location)` samples of a sequential source.
pub struct CheckpointIndex<L> {
    config: CheckpointIndexConfig,
    record_size: usize,
    file: Mutex<File>,
    meta: Mutex<IndexMeta>,
    count: AtomicU64,
    created_from_scratch: bool,
    _location: PhantomData<fn() -> L>,
}

impl<L: Location> CheckpointIndex<L> {
    /// Creates an empty index, truncating any existing file.
    pub fn create(config: CheckpointIndexConfig) -> Result<Self> {
        config.validate()?;
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&config.path)?;
        let header = IndexHeader::new(config.checkpoint_size as u32, config.search_key);
        file.write_all(&header.to_bytes()?)?;
        if config.fsync_enabled {
            file.sync_all()?;
        }

        info!(path = ?config.path, checkpoint_size = config.checkpoint_size, "created checkpoint index");
        Ok(Self {
            record_size: Checkpoint::<L>::record_size(config.checkpoint_size),
            config,
            file: Mutex::new(file),
            meta: Mutex::new(IndexMeta {
                event_count: 0,
                time_range: None,
                last: None,
            }),
            count: AtomicU64::new(0),
            created_from_scratch: true,
            _location: PhantomData,
        })
    }

    /// Opens an existing index.
    ///
    /// Fails with `StaleIndex` when the file was built with a different
    /// checkpoint size or search key, or from a different number of events
    /// than `expected_events`; with `CorruptRecord` when its length does not
    /// match its header.
    pub fn open(config: CheckpointIndexConfig, expected_events: Option<u64>) -> Result<Self> {
        config.validate()?;
        let mut file = OpenOptions::new().read(true).write(true).open(&config.path)?;

        let len = file.metadata()?.len();
        if len < HEADER_SIZE as u64 {
            return Err(StrataError::CorruptRecord {
                index: HEADER_RECORD,
                reason: format!("file of {len} bytes has no header"),
            });
        }
        let mut bytes = [0u8; HEADER_SIZE];
        file.read_exact(&mut bytes)?;
        let header = IndexHeader::from_bytes(&bytes)?;

        if header.checkpoint_size as usize != config.checkpoint_size {
            return Err(StrataError::StaleIndex(format!(
                "checkpoint size {} (expected {})",
                header.checkpoint_size, config.checkpoint_size
            )));
        }
        if header.search_key != config.search_key {
            return Err(StrataError::StaleIndex(format!(
                "search key {:?} (expected {:?})",
                header.search_key, config.search_key
            )));
        }
        if let Some(expected) = expected_events {
            if header.event_count != expected {
                return Err(StrataError::StaleIndex(format!(
                    "built from {} events (expected {expected})",
                    header.event_count
                )));
            }
        }

        let record_size = Checkpoint::<L>::record_size(config.checkpoint_size);
        let expected_len = HEADER_SIZE as u64 + header.record_count * record_size as u64;
        if len != expected_len {
            return Err(StrataError::CorruptRecord {
                index: header.record_count,
                reason: format!("file is {len} bytes, header accounts for {expected_len}"),
            });
        }

        let index = Self {
            record_size,
            config,
            file: Mutex::new(file),
            meta: Mutex::new(IndexMeta {
                event_count: header.event_count,
                time_range: header.time_range,
                last: None,
            }),
            count: AtomicU64::new(header.record_count),
            created_from_scratch: false,
            _location: PhantomData,
        };
        if let Some(last) = header.record_count.checked_sub(1) {
            let checkpoint = index.get(last)?;
            index.meta.lock().last = Some((checkpoint.rank, checkpoint.timestamp));
        }

        info!(
            path = ?index.config.path,
            records = header.record_count,
            events = header.event_count,
            "opened checkpoint index"
        );
        Ok(index)
    }

    /// Opens the index if it is valid and current, otherwise discards it and
    /// creates an empty one. `is_created_from_scratch()` tells which happened.
    pub fn open_or_create(config: CheckpointIndexConfig, expected_events: Option<u64>) -> Result<Self> {
        if config.path.exists() {
            match Self::open(config.clone(), expected_events) {
                Ok(index) => return Ok(index),
                Err(e) if e.requires_rebuild() => {
                    warn!(path = ?config.path, error = %e, "discarding checkpoint index, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
        Self::create(config)
    }

    pub fn config(&self) -> &CheckpointIndexConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of checkpoints stored.
    pub fn size(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// True if this instance started from an empty file rather than reusing
    /// an existing index.
    pub fn is_created_from_scratch(&self) -> bool {
        self.created_from_scratch
    }

    /// Appends a checkpoint. Ranks must be strictly increasing.
    pub fn insert(&self, checkpoint: &Checkpoint<L>) -> Result<()> {
        let mut meta = self.meta.lock();
        if let Some((last_rank, last_time)) = meta.last {
            if checkpoint.rank <= last_rank {
                return Err(StrataError::OutOfOrderInsert {
                    previous: i64::try_from(last_rank).unwrap_or(i64::MAX),
                    attempted: i64::try_from(checkpoint.rank).unwrap_or(i64::MAX),
                });
            }
            if checkpoint.timestamp < last_time {
                warn!(
                    rank = checkpoint.rank,
                    timestamp = checkpoint.timestamp,
                    previous = last_time,
                    "checkpoint timestamp goes backwards"
                );
            }
        }

        let mut record = vec![0u8; self.record_size];
        checkpoint.serialize(&mut record, self.config.checkpoint_size)?;

        let count = self.count.load(Ordering::Acquire);
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.record_offset(count)))?;
            file.write_all(&record)?;
        }

        meta.last = Some((checkpoint.rank, checkpoint.timestamp));
        let time = checkpoint.timestamp;
        meta.time_range = Some(match meta.time_range {
            Some(mut range) => {
                range.extend(time);
                range
            }
            None => TimeRange::new(time, time),
        });
        self.count.store(count + 1, Ordering::Release);
        Ok(())
    }

    /// Reads the checkpoint at position `index`.
    pub fn get(&self, index: u64) -> Result<Checkpoint<L>> {
        let count = self.size();
        if index >= count {
            return Err(StrataError::InvalidParameter {
                name: "index".to_string(),
                value: format!("{index} (size {count})"),
            });
        }

        let mut record = vec![0u8; self.record_size];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(self.record_offset(index)))?;
            file.read_exact(&mut record)?;
        }
        Checkpoint::deserialize(&record, self.config.checkpoint_size).map_err(|e| {
            StrataError::CorruptRecord {
                index,
                reason: e.to_string(),
            }
        })
    }

    fn record_offset(&self, index: u64) -> u64 {
        HEADER_SIZE as u64 + index * self.record_size as u64
    }

    /// Index of the last record for which `before` holds, assuming `before`
    /// is true for a prefix of the records.
    fn last_matching(&self, before: impl Fn(&Checkpoint<L>) -> bool) -> Result<Option<Checkpoint<L>>> {
        let (mut lo, mut hi) = (0u64, self.size());
        let mut found = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let checkpoint = self.get(mid)?;
            if before(&checkpoint) {
                lo = mid + 1;
                found = Some(checkpoint);
            } else {
                hi = mid;
            }
        }
        Ok(found)
    }

    /// Last checkpoint with `rank <= target`.
    pub fn seek_rank(&self, rank: u64) -> Result<Option<Checkpoint<L>>> {
        self.last_matching(|c| c.rank <= rank)
    }

    /// Last checkpoint strictly before `timestamp`.
    ///
    /// Several events can share a timestamp, so a checkpoint at exactly
    /// `timestamp` may already be past the first of them.
    pub fn seek_time(&self, timestamp: Timestamp) -> Result<Option<Checkpoint<L>>> {
        self.last_matching(|c| c.timestamp < timestamp)
    }

    /// Rank of the closest checkpoint preceding `target` under the configured
    /// search key. `None` means the source must be read from its beginning.
    pub fn binary_search(&self, target: &Checkpoint<L>) -> Result<Option<u64>> {
        let found = match self.config.search_key {
            SearchKey::Rank => self.seek_rank(target.rank)?,
            SearchKey::Timestamp => self.seek_time(target.timestamp)?,
        };
        debug!(
            key = ?self.config.search_key,
            target_rank = target.rank,
            target_time = target.timestamp,
            found = ?found.as_ref().map(|c| c.rank),
            "checkpoint search"
        );
        Ok(found.map(|c| c.rank))
    }

    pub fn nb_events(&self) -> u64 {
        self.meta.lock().event_count
    }

    pub fn set_nb_events(&self, count: u64) {
        self.meta.lock().event_count = count;
    }

    pub fn time_range(&self) -> Option<TimeRange> {
        self.meta.lock().time_range
    }

    pub fn set_time_range(&self, range: TimeRange) {
        self.meta.lock().time_range = Some(range);
    }

    /// Writes the header so the file accounts for every record.
    pub fn flush(&self) -> Result<()> {
        let header = {
            let meta = self.meta.lock();
            IndexHeader {
                record_count: self.size(),
                event_count: meta.event_count,
                time_range: meta.time_range,
                ..IndexHeader::new(self.config.checkpoint_size as u32, self.config.search_key)
            }
        };

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes()?)?;
        if self.config.fsync_enabled {
            file.sync_all()?;
        }
        debug!(records = header.record_count, events = header.event_count, "flushed checkpoint index");
        Ok(())
    }

    /// Removes the backing file.
    pub fn delete(self) -> Result<()> {
        let path = self.config.path.clone();
        drop(self.file);
        std::fs::remove_file(&path)?;
        info!(path = ?path, "deleted checkpoint index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path, search_key: SearchKey) -> CheckpointIndexConfig {
        CheckpointIndexConfig {
            path: dir.join("test.idx"),
            checkpoint_size: 8,
            checkpoint_interval: 10,
            search_key,
            fsync_enabled: false,
        }
    }

    /// Checkpoints at ranks 0, 10, 20, ... with timestamp 100 * n and
    /// location 1000 * n.
    fn create_test_index(dir: &Path, search_key: SearchKey, count: u64) -> CheckpointIndex<u64> {
        let index = CheckpointIndex::create(test_config(dir, search_key)).unwrap();
        for n in 0..count {
            index
                .insert(&Checkpoint::new(n as i64 * 100, n * 10, n * 1000))
                .unwrap();
        }
        index
    }

    #[test]
    fn test_create_empty() {
        let dir = tempdir().unwrap();
        let index = CheckpointIndex::<u64>::create(test_config(dir.path(), SearchKey::Rank)).unwrap();
        assert!(index.is_empty());
        assert!(index.is_created_from_scratch());
        assert_eq!(index.time_range(), None);
        assert_eq!(index.seek_rank(5).unwrap(), None);
        assert_eq!(std::fs::metadata(index.path()).unwrap().len(), HEADER_SIZE as u64);
    }

    #[test]
    fn test_insert_and_get() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Rank, 5);
        assert_eq!(index.size(), 5);
        assert_eq!(index.get(3).unwrap(), Checkpoint::new(300, 30, 3000));
        assert!(matches!(
            index.get(5),
            Err(StrataError::InvalidParameter { .. })
        ));
        assert_eq!(index.time_range(), Some(TimeRange::new(0, 400)));
    }

    #[test]
    fn test_rank_must_increase() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Rank, 3);
        let err = index.insert(&Checkpoint::new(500, 20, 0)).unwrap_err();
        assert!(matches!(
            err,
            StrataError::OutOfOrderInsert {
                previous: 20,
                attempted: 20
            }
        ));
        assert_eq!(index.size(), 3);
    }

    #[test]
    fn test_timestamp_regression_is_accepted() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Rank, 3);
        index.insert(&Checkpoint::new(50, 30, 3000)).unwrap();
        assert_eq!(index.size(), 4);
        assert_eq!(index.time_range(), Some(TimeRange::new(0, 200)));
    }

    #[test]
    fn test_binary_search_by_rank() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Rank, 10);
        let target = |rank| Checkpoint::new(0, rank, 0u64);

        assert_eq!(index.binary_search(&target(0)).unwrap(), Some(0));
        assert_eq!(index.binary_search(&target(9)).unwrap(), Some(0));
        assert_eq!(index.binary_search(&target(10)).unwrap(), Some(10));
        assert_eq!(index.binary_search(&target(57)).unwrap(), Some(50));
        assert_eq!(index.binary_search(&target(1_000)).unwrap(), Some(90));
    }

    #[test]
    fn test_binary_search_by_time() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Timestamp, 10);
        let target = |time| Checkpoint::new(time, 0, 0u64);

        assert_eq!(index.binary_search(&target(0)).unwrap(), None);
        assert_eq!(index.binary_search(&target(1)).unwrap(), Some(0));
        // A checkpoint exactly at the target is not early enough
        assert_eq!(index.binary_search(&target(300)).unwrap(), Some(20));
        assert_eq!(index.binary_search(&target(301)).unwrap(), Some(30));
        assert_eq!(index.binary_search(&target(i64::MAX)).unwrap(), Some(90));

        let found = index.seek_time(450).unwrap().unwrap();
        assert_eq!(found.location, 4000);
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), SearchKey::Rank);
        {
            let index = create_test_index(dir.path(), SearchKey::Rank, 7);
            index.set_nb_events(70);
            index.flush().unwrap();
        }

        let index = CheckpointIndex::<u64>::open(config, Some(70)).unwrap();
        assert!(!index.is_created_from_scratch());
        assert_eq!(index.size(), 7);
        assert_eq!(index.nb_events(), 70);
        assert_eq!(index.time_range(), Some(TimeRange::new(0, 600)));
        assert_eq!(index.get(6).unwrap().location, 6000);

        // Appending continues after the last stored rank
        assert!(index.insert(&Checkpoint::new(700, 60, 0)).is_err());
        index.insert(&Checkpoint::new(700, 70, 7000)).unwrap();
        assert_eq!(index.size(), 8);
    }

    #[test]
    fn test_open_stale_event_count() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), SearchKey::Rank);
        {
            let index = create_test_index(dir.path(), SearchKey::Rank, 2);
            index.set_nb_events(20);
            index.flush().unwrap();
        }
        let err = CheckpointIndex::<u64>::open(config.clone(), Some(21)).err().unwrap();
        assert!(matches!(err, StrataError::StaleIndex(_)));

        let mut other_key = config.clone();
        other_key.search_key = SearchKey::Timestamp;
        let err = CheckpointIndex::<u64>::open(other_key, None).err().unwrap();
        assert!(matches!(err, StrataError::StaleIndex(_)));

        let mut other_size = config;
        other_size.checkpoint_size = 16;
        let err = CheckpointIndex::<u64>::open(other_size, None).err().unwrap();
        assert!(matches!(err, StrataError::StaleIndex(_)));
    }

    #[test]
    fn test_unflushed_records_are_corrupt() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), SearchKey::Rank);
        {
            let index = create_test_index(dir.path(), SearchKey::Rank, 4);
            index.flush().unwrap();
            index.insert(&Checkpoint::new(400, 40, 4000)).unwrap();
        }
        let err = CheckpointIndex::<u64>::open(config.clone(), None).err().unwrap();
        assert!(matches!(err, StrataError::CorruptRecord { index: 4, .. }));

        let rebuilt = CheckpointIndex::<u64>::open_or_create(config, None).unwrap();
        assert!(rebuilt.is_created_from_scratch());
        assert!(rebuilt.is_empty());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), SearchKey::Rank);
        assert!(matches!(
            CheckpointIndex::<u64>::open(config.clone(), None),
            Err(StrataError::Io(_))
        ));
        let index = CheckpointIndex::<u64>::open_or_create(config, None).unwrap();
        assert!(index.is_created_from_scratch());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let index = create_test_index(dir.path(), SearchKey::Rank, 1);
        let path = index.path().to_path_buf();
        index.delete().unwrap();
        assert!(!path.exists());
    }
}
