//! History tree nodes and their block format.
//!
//! Every node occupies exactly one block of `block_size` bytes:
//!
//! ```text
//! +-------------------------------+  0
//! | common header (33 bytes)      |
//! |   type u8, seq u32,           |
//! |   parent u32, start i64,      |
//! |   end i64, count u32, crc u32 |
//! +-------------------------------+  33
//! | branch header (branch only)   |
//! |   child count u32,            |
//! |   max_children x (seq, start) |
//! +-------------------------------+
//! | intervals, sorted by end      |
//! +-------------------------------+
//! | zero padding                  |
//! +-------------------------------+  block_size
//! ```
//!
//! The branch header always reserves room for `max_children` entries, so the
//! interval area of a branch never moves as children are added. The CRC32
//! covers the whole block with the checksum field zeroed.

use crate::constants::{
    BRANCH_COUNT_SIZE, BRANCH_ENTRY_SIZE, CHECKSUM_OFFSET, COMMON_HEADER_SIZE, NODE_TYPE_BRANCH,
    NODE_TYPE_LEAF, NO_PARENT,
};
use crate::interval::Interval;
use strata_common::{HistoryTreeConfig, Result, SafeReader, SafeWriter, StrataError, Timestamp};

/// Block geometry shared by every node of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLayout {
    pub block_size: usize,
    pub max_children: usize,
}

impl NodeLayout {
    pub fn new(block_size: usize, max_children: usize) -> Result<Self> {
        if max_children < 2 {
            return Err(StrataError::InvalidParameter {
                name: "max_children".to_string(),
                value: max_children.to_string(),
            });
        }
        let layout = Self {
            block_size,
            max_children,
        };
        if layout.header_size(NodeType::Branch) >= block_size {
            return Err(StrataError::ConfigError(format!(
                "branch header for {max_children} children does not fit a {block_size} byte block"
            )));
        }
        Ok(layout)
    }

    pub fn from_config(config: &HistoryTreeConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.block_size, config.max_children)
    }

    /// Total header size of a node of the given type.
    pub fn header_size(&self, node_type: NodeType) -> usize {
        match node_type {
            NodeType::Leaf => COMMON_HEADER_SIZE,
            NodeType::Branch => {
                COMMON_HEADER_SIZE + BRANCH_COUNT_SIZE + self.max_children * BRANCH_ENTRY_SIZE
            }
        }
    }

    /// Bytes available for intervals in an empty node of the given type.
    pub fn payload_capacity(&self, node_type: NodeType) -> usize {
        self.block_size - self.header_size(node_type)
    }

    /// Largest interval that fits an empty node of either type.
    pub fn max_interval_size(&self) -> usize {
        self.payload_capacity(NodeType::Branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Leaf,
    Branch,
}

impl NodeType {
    fn to_u8(self) -> u8 {
        match self {
            NodeType::Leaf => NODE_TYPE_LEAF,
            NodeType::Branch => NODE_TYPE_BRANCH,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            NODE_TYPE_LEAF => Some(NodeType::Leaf),
            NODE_TYPE_BRANCH => Some(NodeType::Branch),
            _ => None,
        }
    }
}

/// Entry of a branch node: a child and the time it starts covering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    pub seq: u32,
    pub start: Timestamp,
}

/// Fields shared by every node type.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCore {
    layout: NodeLayout,
    sequence: u32,
    parent: Option<u32>,
    start: Timestamp,
    end: Timestamp,
    /// Sorted by end time; ties keep insertion order.
    intervals: Vec<Interval>,
    interval_bytes: usize,
}

impl NodeCore {
    fn new(layout: NodeLayout, sequence: u32, parent: Option<u32>, start: Timestamp) -> Self {
        Self {
            layout,
            sequence,
            parent,
            start,
            end: start,
            intervals: Vec::new(),
            interval_bytes: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    core: NodeCore,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    core: NodeCore,
    children: Vec<ChildRef>,
}

/// A history tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(LeafNode),
    Branch(BranchNode),
}

impl Node {
    pub fn new_leaf(layout: NodeLayout, sequence: u32, parent: Option<u32>, start: Timestamp) -> Self {
        Node::Leaf(LeafNode {
            core: NodeCore::new(layout, sequence, parent, start),
        })
    }

    pub fn new_branch(
        layout: NodeLayout,
        sequence: u32,
        parent: Option<u32>,
        start: Timestamp,
    ) -> Self {
        Node::Branch(BranchNode {
            core: NodeCore::new(layout, sequence, parent, start),
            children: Vec::with_capacity(layout.max_children),
        })
    }

    #[inline]
    fn core(&self) -> &NodeCore {
        match self {
            Node::Leaf(leaf) => &leaf.core,
            Node::Branch(branch) => &branch.core,
        }
    }

    #[inline]
    fn core_mut(&mut self) -> &mut NodeCore {
        match self {
            Node::Leaf(leaf) => &mut leaf.core,
            Node::Branch(branch) => &mut branch.core,
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::Leaf(_) => NodeType::Leaf,
            Node::Branch(_) => NodeType::Branch,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn layout(&self) -> NodeLayout {
        self.core().layout
    }

    pub fn sequence(&self) -> u32 {
        self.core().sequence
    }

    pub fn parent(&self) -> Option<u32> {
        self.core().parent
    }

    pub fn set_parent(&mut self, parent: Option<u32>) {
        self.core_mut().parent = parent;
    }

    pub fn start(&self) -> Timestamp {
        self.core().start
    }

    /// Latest time covered so far.
    pub fn end(&self) -> Timestamp {
        self.core().end
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.core().intervals
    }

    pub fn interval_count(&self) -> usize {
        self.core().intervals.len()
    }

    /// Bytes left in the interval area.
    pub fn free_space(&self) -> usize {
        let core = self.core();
        core.layout.payload_capacity(self.node_type()) - core.interval_bytes
    }

    /// Interval area usage in percent.
    pub fn usage(&self) -> u32 {
        let capacity = self.core().layout.payload_capacity(self.node_type());
        (self.core().interval_bytes * 100 / capacity) as u32
    }

    pub fn fits(&self, interval: &Interval) -> bool {
        interval.size_on_disk() <= self.free_space()
    }

    /// Adds an interval, keeping the end-time order.
    pub fn add_interval(&mut self, interval: Interval) -> Result<()> {
        if interval.start < self.start() {
            return Err(StrataError::TimeOutOfRange {
                time: interval.start,
                start: self.start(),
                end: self.end(),
            });
        }
        if !self.fits(&interval) {
            return Err(StrataError::NodeFull);
        }

        let core = self.core_mut();
        core.interval_bytes += interval.size_on_disk();
        core.end = core.end.max(interval.end);
        let pos = core.intervals.partition_point(|i| i.end <= interval.end);
        core.intervals.insert(pos, interval);
        Ok(())
    }

    /// Seals the node at `end`.
    pub fn close(&mut self, end: Timestamp) -> Result<()> {
        let core = self.core_mut();
        if end < core.start {
            return Err(StrataError::InvalidInterval {
                start: core.start,
                end,
            });
        }
        core.end = end;
        Ok(())
    }

    /// Intervals covering `time`. With `inclusive_end`, intervals ending
    /// exactly at `time` also match.
    pub fn intervals_at(
        &self,
        time: Timestamp,
        inclusive_end: bool,
    ) -> impl Iterator<Item = &Interval> + '_ {
        let intervals = &self.core().intervals;
        let first = if inclusive_end {
            intervals.partition_point(|i| i.end < time)
        } else {
            intervals.partition_point(|i| i.end <= time)
        };
        intervals[first..].iter().filter(move |i| i.start <= time)
    }

    /// Intervals with at least one point in `[start, end]`.
    pub fn intervals_in(
        &self,
        start: Timestamp,
        end: Timestamp,
    ) -> impl Iterator<Item = &Interval> + '_ {
        let intervals = &self.core().intervals;
        let first = intervals.partition_point(|i| i.end <= start);
        intervals[first..].iter().filter(move |i| i.start <= end)
    }

    /// Children of a branch node, empty for leaves.
    pub fn children(&self) -> &[ChildRef] {
        match self {
            Node::Leaf(_) => &[],
            Node::Branch(branch) => &branch.children,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn is_full_of_children(&self) -> bool {
        self.child_count() >= self.layout().max_children
    }

    /// Registers a new rightmost child.
    pub fn add_child(&mut self, seq: u32, start: Timestamp) -> Result<()> {
        let branch = match self {
            Node::Branch(branch) => branch,
            Node::Leaf(leaf) => {
                return Err(StrataError::Internal(format!(
                    "cannot add child {seq} to leaf {}",
                    leaf.core.sequence
                )));
            }
        };
        if branch.children.len() >= branch.core.layout.max_children {
            return Err(StrataError::NodeFull);
        }
        if let Some(last) = branch.children.last() {
            if start <= last.start {
                return Err(StrataError::Internal(format!(
                    "child {seq} starts at {start}, not after previous child {} at {}",
                    last.seq, last.start
                )));
            }
        }
        branch.children.push(ChildRef { seq, start });
        Ok(())
    }

    /// Returns the last child starting at or before `time`.
    pub fn search_child(&self, time: Timestamp) -> Option<u32> {
        let children = self.children();
        let idx = children.partition_point(|c| c.start <= time);
        if idx == 0 {
            None
        } else {
            Some(children[idx - 1].seq)
        }
    }

    /// Children whose time slot `[child.start, next.start)` meets `[start, end]`.
    pub fn children_in(&self, start: Timestamp, end: Timestamp) -> Vec<u32> {
        let children = self.children();
        children
            .iter()
            .enumerate()
            .filter(|(i, child)| {
                let slot_end = children.get(i + 1).map_or(Timestamp::MAX, |next| next.start);
                child.start <= end && slot_end > start
            })
            .map(|(_, child)| child.seq)
            .collect()
    }

    /// Serializes the node into exactly `block_size` bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let core = self.core();
        let layout = core.layout;
        let mut block = vec![0u8; layout.block_size];
        {
            let mut w = SafeWriter::new(&mut block);
            w.put_u8(self.node_type().to_u8())?;
            w.put_u32(core.sequence)?;
            w.put_u32(core.parent.unwrap_or(NO_PARENT))?;
            w.put_i64(core.start)?;
            w.put_i64(core.end)?;
            w.put_u32(core.intervals.len() as u32)?;
            // Checksum, filled in below
            w.put_u32(0)?;

            if let Node::Branch(branch) = self {
                w.put_u32(branch.children.len() as u32)?;
                for child in &branch.children {
                    w.put_u32(child.seq)?;
                    w.put_i64(child.start)?;
                }
                let unused = layout.max_children - branch.children.len();
                w.put_zeros(unused * BRANCH_ENTRY_SIZE)?;
            }

            for interval in &core.intervals {
                interval.serialize(&mut w)?;
            }
        }

        let checksum = crc32fast::hash(&block);
        block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        Ok(block)
    }

    /// Rebuilds a node from its block. Shape and checksum errors are
    /// reported as `CorruptNode`.
    pub fn deserialize(block: &[u8], layout: NodeLayout) -> Result<Self> {
        let corrupt = |seq: u32, reason: String| StrataError::CorruptNode { seq, reason };

        if block.len() != layout.block_size {
            return Err(corrupt(
                NO_PARENT,
                format!("block is {} bytes, expected {}", block.len(), layout.block_size),
            ));
        }

        let mut r = SafeReader::new(block);
        let type_byte = r.get_u8()?;
        let sequence = r.get_u32()?;
        let parent = r.get_u32()?;
        let start = r.get_i64()?;
        let end = r.get_i64()?;
        let interval_count = r.get_u32()? as usize;
        let stored_checksum = r.get_u32()?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(&block[CHECKSUM_OFFSET + 4..]);
        if hasher.finalize() != stored_checksum {
            return Err(corrupt(sequence, "checksum mismatch".to_string()));
        }

        let node_type = NodeType::from_u8(type_byte)
            .ok_or_else(|| corrupt(sequence, format!("unknown node type {type_byte}")))?;
        let parent = (parent != NO_PARENT).then_some(parent);

        let mut node = match node_type {
            NodeType::Leaf => Node::new_leaf(layout, sequence, parent, start),
            NodeType::Branch => {
                let mut node = Node::new_branch(layout, sequence, parent, start);
                let child_count = r.get_u32()? as usize;
                if child_count > layout.max_children {
                    return Err(corrupt(
                        sequence,
                        format!("{child_count} children exceed maximum {}", layout.max_children),
                    ));
                }
                for _ in 0..child_count {
                    let seq = r.get_u32()?;
                    let child_start = r.get_i64()?;
                    node.add_child(seq, child_start)
                        .map_err(|e| corrupt(sequence, e.to_string()))?;
                }
                r.skip((layout.max_children - child_count) * BRANCH_ENTRY_SIZE)?;
                node
            }
        };

        let mut previous_end = Timestamp::MIN;
        for _ in 0..interval_count {
            let interval =
                Interval::deserialize(&mut r).map_err(|e| corrupt(sequence, e.to_string()))?;
            if interval.end < previous_end {
                return Err(corrupt(sequence, "intervals out of end order".to_string()));
            }
            previous_end = interval.end;
            node.add_interval(interval)
                .map_err(|e| corrupt(sequence, e.to_string()))?;
        }

        // The header end may exceed the latest interval end once sealed
        node.core_mut().end = end;
        Ok(node)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.node_type() {
            NodeType::Leaf => "leaf",
            NodeType::Branch => "branch",
        };
        write!(
            f,
            "{kind} {} [{}, {}] parent={} intervals={} usage={}%",
            self.sequence(),
            self.start(),
            self.end(),
            self.parent().map_or_else(|| "-".to_string(), |p| p.to_string()),
            self.interval_count(),
            self.usage(),
        )?;
        if !self.children().is_empty() {
            let children: Vec<String> = self
                .children()
                .iter()
                .map(|c| format!("{}@{}", c.seq, c.start))
                .collect();
            write!(f, " children=[{}]", children.join(", "))?;
        }
        Ok(())
    }
}
