//! Configuration structures for strata.

use crate::error::{Result, StrataError};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default node block size (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default branching factor of the history tree.
pub const DEFAULT_MAX_CHILDREN: usize = 50;

/// Smallest block able to hold the tree footer record plus headroom.
pub const MIN_BLOCK_SIZE: usize = 96;

/// Default sampling interval of the checkpoint indexer, in events.
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 1000;

/// Configuration of one history tree instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTreeConfig {
    /// Backing file.
    pub path: PathBuf,
    /// Bytes per node block.
    pub block_size: usize,
    /// Branching factor.
    pub max_children: usize,
    /// Version of the producing logic; a mismatch on open means the tree is stale.
    pub provider_version: u32,
    /// Earliest time the tree may contain.
    pub tree_start: Timestamp,
    /// Node cache capacity in nodes (0 = size from available memory).
    pub cache_capacity: usize,
    /// Enable fsync after sealing nodes and on close.
    pub fsync_enabled: bool,
}

impl Default for HistoryTreeConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./state_history.ht"),
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            tree_start: 0,
            cache_capacity: 0,
            fsync_enabled: true,
        }
    }
}

impl HistoryTreeConfig {
    /// Creates a configuration for `path` with default layout parameters.
    pub fn new(path: impl Into<PathBuf>, provider_version: u32, tree_start: Timestamp) -> Self {
        Self {
            path: path.into(),
            provider_version,
            tree_start,
            ..Default::default()
        }
    }

    /// Checks the layout parameters.
    ///
    /// Branch header fitting is checked by the node layer, which owns the
    /// header format.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(StrataError::ConfigError(format!(
                "block size {} is below the minimum of {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.block_size > u32::MAX as usize {
            return Err(StrataError::InvalidParameter {
                name: "block_size".to_string(),
                value: self.block_size.to_string(),
            });
        }
        if self.max_children < 2 {
            return Err(StrataError::InvalidParameter {
                name: "max_children".to_string(),
                value: self.max_children.to_string(),
            });
        }
        Ok(())
    }
}

/// Key used to order checkpoints during a binary search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchKey {
    /// Order by timestamp.
    #[default]
    Timestamp,
    /// Order by event rank.
    Rank,
}

/// Configuration of one checkpoint index instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointIndexConfig {
    /// Backing file.
    pub path: PathBuf,
    /// Bytes reserved for the serialized location in each record.
    pub checkpoint_size: usize,
    /// Number of events between two checkpoints.
    pub checkpoint_interval: u64,
    /// Ordering key used by `binary_search`.
    pub search_key: SearchKey,
    /// Enable fsync on flush.
    pub fsync_enabled: bool,
}

impl Default for CheckpointIndexConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./checkpoint.idx"),
            checkpoint_size: 8,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            search_key: SearchKey::Timestamp,
            fsync_enabled: true,
        }
    }
}

impl CheckpointIndexConfig {
    /// Creates a configuration for `path` with a location size of `checkpoint_size` bytes.
    pub fn new(path: impl Into<PathBuf>, checkpoint_size: usize) -> Self {
        Self {
            path: path.into(),
            checkpoint_size,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_size == 0 || self.checkpoint_size > u32::MAX as usize {
            return Err(StrataError::InvalidParameter {
                name: "checkpoint_size".to_string(),
                value: self.checkpoint_size.to_string(),
            });
        }
        if self.checkpoint_interval == 0 {
            return Err(StrataError::InvalidParameter {
                name: "checkpoint_interval".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
