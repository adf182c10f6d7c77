//! Block-level file I/O for the history tree.
//!
//! Block `i` of the file holds node `i`. Once the tree is closed, one more
//! block is appended whose last `FOOTER_SIZE` bytes hold the footer record,
//! so a finished file is always `(node_count + 1) * block_size` bytes long.

use crate::constants::{FOOTER_MAGIC, FOOTER_SIZE, FORMAT_VERSION, NO_PARENT};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use strata_common::{Result, SafeReader, SafeWriter, StrataError, Timestamp};

/// Footer record written when the tree is closed.
///
/// Layout (72 bytes, little-endian):
/// - magic: 4 bytes ("SHTF")
/// - format_version: 4 bytes
/// - provider_version: 4 bytes
/// - block_size: 4 bytes
/// - max_children: 4 bytes
/// - node_count: 4 bytes
/// - root_seq: 4 bytes
/// - height: 4 bytes
/// - tree_start: 8 bytes
/// - tree_end: 8 bytes
/// - event_count: 8 bytes
/// - interval_count: 8 bytes
/// - checksum: 4 bytes
/// - reserved: 4 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFooter {
    pub format_version: u32,
    pub provider_version: u32,
    pub block_size: u32,
    pub max_children: u32,
    pub node_count: u32,
    pub root_seq: u32,
    pub height: u32,
    pub tree_start: Timestamp,
    pub tree_end: Timestamp,
    pub event_count: u64,
    pub interval_count: u64,
}

impl TreeFooter {
    /// Bytes covered by the checksum.
    const CHECKED_SIZE: usize = 64;

    fn write_fields(&self, w: &mut SafeWriter<'_>) -> Result<()> {
        w.put_slice(&FOOTER_MAGIC)?;
        w.put_u32(self.format_version)?;
        w.put_u32(self.provider_version)?;
        w.put_u32(self.block_size)?;
        w.put_u32(self.max_children)?;
        w.put_u32(self.node_count)?;
        w.put_u32(self.root_seq)?;
        w.put_u32(self.height)?;
        w.put_i64(self.tree_start)?;
        w.put_i64(self.tree_end)?;
        w.put_u64(self.event_count)?;
        w.put_u64(self.interval_count)
    }

    pub fn to_bytes(&self) -> Result<[u8; FOOTER_SIZE]> {
        let mut data = [0u8; FOOTER_SIZE];
        let mut w = SafeWriter::new(&mut data);
        self.write_fields(&mut w)?;
        w.put_u32(0)?;
        w.put_u32(0)?;
        let checksum = crc32fast::hash(&data[..Self::CHECKED_SIZE]);
        data[Self::CHECKED_SIZE..Self::CHECKED_SIZE + 4].copy_from_slice(&checksum.to_le_bytes());
        Ok(data)
    }

    /// Parses and validates a footer record.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let corrupt = |reason: &str| StrataError::CorruptNode {
            seq: NO_PARENT,
            reason: format!("footer: {reason}"),
        };

        if data.len() != FOOTER_SIZE {
            return Err(corrupt("wrong record size"));
        }
        let mut r = SafeReader::new(data);
        if r.get_slice(4)? != FOOTER_MAGIC {
            return Err(corrupt("invalid magic bytes"));
        }
        let footer = Self {
            format_version: r.get_u32()?,
            provider_version: r.get_u32()?,
            block_size: r.get_u32()?,
            max_children: r.get_u32()?,
            node_count: r.get_u32()?,
            root_seq: r.get_u32()?,
            height: r.get_u32()?,
            tree_start: r.get_i64()?,
            tree_end: r.get_i64()?,
            event_count: r.get_u64()?,
            interval_count: r.get_u64()?,
        };
        let stored = r.get_u32()?;
        if crc32fast::hash(&data[..Self::CHECKED_SIZE]) != stored {
            return Err(corrupt("checksum mismatch"));
        }
        if footer.format_version != FORMAT_VERSION {
            return Err(StrataError::StaleTree(format!(
                "format version {} (current {FORMAT_VERSION})",
                footer.format_version
            )));
        }
        if (footer.block_size as usize) < FOOTER_SIZE {
            return Err(corrupt("block size smaller than footer"));
        }
        if footer.node_count == 0 || footer.root_seq >= footer.node_count {
            return Err(corrupt("root outside of node range"));
        }
        Ok(footer)
    }
}

/// Handle on one history tree file.
pub struct TreeFile {
    path: PathBuf,
    block_size: usize,
    fsync_enabled: bool,
    file: Mutex<File>,
}

impl TreeFile {
    /// Creates an empty file, truncating any previous content.
    pub fn create(path: &Path, block_size: usize, fsync_enabled: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            block_size,
            fsync_enabled,
            file: Mutex::new(file),
        })
    }

    /// Opens a closed tree file and returns its footer.
    pub fn open(path: &Path, fsync_enabled: bool) -> Result<(Self, TreeFooter)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len < FOOTER_SIZE as u64 {
            return Err(StrataError::CorruptNode {
                seq: NO_PARENT,
                reason: format!("file of {len} bytes has no footer"),
            });
        }

        file.seek(SeekFrom::Start(len - FOOTER_SIZE as u64))?;
        let mut record = [0u8; FOOTER_SIZE];
        file.read_exact(&mut record)?;
        let footer = TreeFooter::from_bytes(&record)?;

        let expected = (footer.node_count as u64 + 1) * footer.block_size as u64;
        if len != expected {
            return Err(StrataError::CorruptNode {
                seq: NO_PARENT,
                reason: format!(
                    "file is {len} bytes, expected {expected} for {} nodes",
                    footer.node_count
                ),
            });
        }

        let tree_file = Self {
            path: path.to_path_buf(),
            block_size: footer.block_size as usize,
            fsync_enabled,
            file: Mutex::new(file),
        };
        Ok((tree_file, footer))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn offset(&self, seq: u32) -> u64 {
        seq as u64 * self.block_size as u64
    }

    /// Reads the block of node `seq`.
    pub fn read_block(&self, seq: u32) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        let offset = self.offset(seq);
        if offset + self.block_size as u64 > file.metadata()?.len() {
            return Err(StrataError::NodeNotFound { seq });
        }
        file.seek(SeekFrom::Start(offset))?;
        let mut block = vec![0u8; self.block_size];
        file.read_exact(&mut block)?;
        Ok(block)
    }

    /// Writes the block of node `seq`.
    pub fn write_block(&self, seq: u32, block: &[u8]) -> Result<()> {
        if block.len() != self.block_size {
            return Err(StrataError::Internal(format!(
                "block of {} bytes written to a file of {} byte blocks",
                block.len(),
                self.block_size
            )));
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.offset(seq)))?;
        file.write_all(block)?;
        Ok(())
    }

    /// Writes the footer block after the last node and trims anything past it.
    pub fn write_footer(&self, footer: &TreeFooter) -> Result<()> {
        let mut block = vec![0u8; self.block_size];
        let record = footer.to_bytes()?;
        block[self.block_size - FOOTER_SIZE..].copy_from_slice(&record);

        let mut file = self.file.lock();
        let offset = self.offset(footer.node_count);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block)?;
        file.set_len(offset + self.block_size as u64)?;
        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Flushes written blocks to disk if fsync is enabled.
    pub fn sync(&self) -> Result<()> {
        if self.fsync_enabled {
            self.file.lock().sync_data()?;
        }
        Ok(())
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    /// Closes the handle and removes the file.
    pub fn delete(self) -> Result<()> {
        let Self { path, file, .. } = self;
        drop(file);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
