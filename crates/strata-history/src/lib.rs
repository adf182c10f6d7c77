//! Disk-resident history tree for Strata.
//!
//! This crate provides:
//! - State intervals and their on-disk encoding
//! - Fixed-size leaf and branch nodes with checksummed blocks
//! - The tree file with its trailing footer
//! - The history tree: ordered insertion, sealing, point and range queries

mod constants;
mod file;
mod interval;
mod node;
mod tree;

pub use constants::{COMMON_HEADER_SIZE, FOOTER_SIZE, FORMAT_VERSION};
pub use file::{TreeFile, TreeFooter};
pub use interval::{Interval, INTERVAL_FIXED_SIZE};
pub use node::{BranchNode, ChildRef, LeafNode, Node, NodeCore, NodeLayout, NodeType};
pub use tree::{HistoryTree, OpenExpectations};
