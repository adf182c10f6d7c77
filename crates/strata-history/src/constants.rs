//! On-disk layout constants of the history tree file.

/// Node type discriminant of leaf nodes.
pub(crate) const NODE_TYPE_LEAF: u8 = 1;

/// Node type discriminant of branch nodes.
pub(crate) const NODE_TYPE_BRANCH: u8 = 2;

/// Parent sequence number stored for the root.
pub(crate) const NO_PARENT: u32 = u32::MAX;

/// Common node header:
/// type (1) + sequence (4) + parent (4) + start (8) + end (8)
/// + interval count (4) + checksum (4).
pub const COMMON_HEADER_SIZE: usize = 33;

/// Offset of the checksum field inside the common header.
pub(crate) const CHECKSUM_OFFSET: usize = 29;

/// Branch header prefix: child count (4).
pub(crate) const BRANCH_COUNT_SIZE: usize = 4;

/// One child entry in the branch header: sequence (4) + start (8).
pub(crate) const BRANCH_ENTRY_SIZE: usize = 12;

/// Size of the footer record at the end of the trailing block.
pub const FOOTER_SIZE: usize = 72;

/// Magic bytes identifying a history tree file.
pub(crate) const FOOTER_MAGIC: [u8; 4] = *b"SHTF";

/// Version of the node and footer layout.
pub const FORMAT_VERSION: u32 = 1;
