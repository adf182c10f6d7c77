//! Checkpoint index integration tests.
//!
//! A synthetic trace (timestamps with duplicates, byte-offset locations) is
//! indexed through the sampling indexer, then sought by rank and by time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

use strata_checkpoint::{Checkpoint, CheckpointIndex, CheckpointIndexer};
use strata_common::{CheckpointIndexConfig, SearchKey, StrataError, Timestamp};

/// One event of the synthetic trace.
#[derive(Debug, Clone, Copy)]
struct Event {
    timestamp: Timestamp,
    offset: u64,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn synthetic_trace(seed: u64, count: usize) -> Vec<Event> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut timestamp = 1_000;
    let mut offset = 0;
    (0..count)
        .map(|_| {
            // Roughly a third of the events share the previous timestamp
            timestamp += rng.gen_range(0..3);
            let event = Event { timestamp, offset };
            offset += rng.gen_range(16..256);
            event
        })
        .collect()
}

fn config(dir: &Path, interval: u64, search_key: SearchKey) -> CheckpointIndexConfig {
    CheckpointIndexConfig {
        path: dir.join("trace.idx"),
        checkpoint_size: 8,
        checkpoint_interval: interval,
        search_key,
        fsync_enabled: false,
    }
}

fn build_index(config: CheckpointIndexConfig, trace: &[Event]) -> CheckpointIndex<u64> {
    let index = CheckpointIndex::create(config).unwrap();
    let mut indexer = CheckpointIndexer::new(index);
    for event in trace {
        indexer.observe(event.timestamp, event.offset).unwrap();
    }
    indexer.finish().unwrap()
}

// =============================================================================
// Seek bounds
// =============================================================================

#[test]
fn test_rank_seek_scans_less_than_interval() {
    const INTERVAL: u64 = 50;

    init_tracing();
    let dir = tempdir().unwrap();
    let trace = synthetic_trace(1, 5_000);
    let index = build_index(config(dir.path(), INTERVAL, SearchKey::Rank), &trace);
    assert_eq!(index.size(), 100);
    assert_eq!(index.nb_events(), 5_000);

    let mut rng = StdRng::seed_from_u64(2);
    for _ in 0..500 {
        let target = rng.gen_range(0..trace.len() as u64);
        let start = index
            .binary_search(&Checkpoint::new(0, target, 0))
            .unwrap()
            .unwrap();
        assert!(start <= target);
        assert!(target - start < INTERVAL, "scanned {} events", target - start);

        let checkpoint = index.seek_rank(target).unwrap().unwrap();
        assert_eq!(checkpoint.location, trace[checkpoint.rank as usize].offset);
    }
}

#[test]
fn test_time_seek_finds_first_event() {
    const INTERVAL: u64 = 32;

    let dir = tempdir().unwrap();
    let trace = synthetic_trace(3, 4_000);
    let index = build_index(config(dir.path(), INTERVAL, SearchKey::Timestamp), &trace);

    let first = trace.first().unwrap().timestamp;
    let last = trace.last().unwrap().timestamp;
    let range = index.time_range().unwrap();
    assert_eq!((range.start, range.end), (first, last));

    for target in (first - 2)..=(last + 2) {
        let start = index
            .binary_search(&Checkpoint::new(target, 0, 0))
            .unwrap()
            .unwrap_or(0) as usize;

        // Scan forward to the first event at or after the target
        let mut scanned = 0u64;
        let mut rank = start;
        while rank < trace.len() && trace[rank].timestamp < target {
            rank += 1;
            scanned += 1;
        }

        let expected = trace
            .iter()
            .position(|e| e.timestamp >= target)
            .unwrap_or(trace.len());
        assert_eq!(rank, expected, "target {target}");
        assert!(scanned <= INTERVAL, "target {target}: scanned {scanned}");
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_reopen_skips_reindexing() {
    init_tracing();
    let dir = tempdir().unwrap();
    let trace = synthetic_trace(5, 1_000);
    let config = config(dir.path(), 100, SearchKey::Rank);
    drop(build_index(config.clone(), &trace));

    let index = CheckpointIndex::<u64>::open_or_create(config.clone(), Some(1_000)).unwrap();
    assert!(!index.is_created_from_scratch());
    assert_eq!(index.size(), 10);
    assert_eq!(index.get(9).unwrap().location, trace[900].offset);
    drop(index);

    // The source grew: the index must be rebuilt
    let index = CheckpointIndex::<u64>::open_or_create(config.clone(), Some(1_001)).unwrap();
    assert!(index.is_created_from_scratch());
    assert!(index.is_empty());
    assert_eq!(index.time_range(), None);
    index.delete().unwrap();
    assert!(!config.path.exists());
}

#[test]
fn test_corrupt_header_is_rebuilt() {
    let dir = tempdir().unwrap();
    let trace = synthetic_trace(9, 300);
    let config = config(dir.path(), 10, SearchKey::Rank);
    drop(build_index(config.clone(), &trace));

    let mut bytes = std::fs::read(&config.path).unwrap();
    bytes[17] ^= 0xFF;
    std::fs::write(&config.path, &bytes).unwrap();

    let err = CheckpointIndex::<u64>::open(config.clone(), None).err().unwrap();
    assert!(matches!(err, StrataError::CorruptRecord { .. }));
    assert!(err.requires_rebuild());

    let index = CheckpointIndex::<u64>::open_or_create(config, None).unwrap();
    assert!(index.is_created_from_scratch());
}

// =============================================================================
// Concurrency
// =============================================================================

/// Readers seeking and reading the newest record while one writer appends
/// only ever see complete records the writer has started to insert.
#[test]
fn test_concurrent_readers_during_append() {
    const RECORDS: u64 = 2_000;
    const STRIDE: u64 = 10;

    init_tracing();
    let dir = tempdir().unwrap();
    let index = Arc::new(
        CheckpointIndex::<u64>::create(config(dir.path(), STRIDE, SearchKey::Rank)).unwrap(),
    );
    // Rank of the checkpoint being inserted, published before the append
    let writing = Arc::new(AtomicU64::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4u64)
        .map(|seed| {
            let index = Arc::clone(&index);
            let writing = Arc::clone(&writing);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut reads = 0u64;
                while !done.load(Ordering::Acquire) || reads == 0 {
                    let size = index.size();
                    if size == 0 {
                        continue;
                    }

                    let newest = index.get(size - 1).unwrap();
                    assert_eq!(newest.rank, (size - 1) * STRIDE);
                    assert_eq!(newest.location, newest.rank * 100);
                    assert_eq!(newest.timestamp, (newest.rank / 2) as Timestamp);
                    assert!(newest.rank <= writing.load(Ordering::Acquire));

                    let target = rng.gen_range(0..=newest.rank + STRIDE);
                    let start = index
                        .binary_search(&Checkpoint::new(0, target, 0))
                        .unwrap()
                        .unwrap();
                    assert_eq!(start % STRIDE, 0);
                    assert!(start <= target);
                    assert!(start <= writing.load(Ordering::Acquire));
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for i in 0..RECORDS {
        let rank = i * STRIDE;
        writing.store(rank, Ordering::Release);
        index
            .insert(&Checkpoint::new((rank / 2) as Timestamp, rank, rank * 100))
            .unwrap();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(index.size(), RECORDS);
    assert_eq!(index.seek_rank(u64::MAX).unwrap().unwrap().rank, (RECORDS - 1) * STRIDE);
}
