//! The history tree.
//!
//! A single writer feeds intervals in non-decreasing start order; any number
//! of readers query concurrently. The rightmost node of every level (the
//! latest branch) lives in memory and is mutated by the writer. Every other
//! node is sealed: written once to its block and never modified again, so
//! readers can load it from the cache or the file without holding the tree
//! lock.
//!
//! Closed intervals are committed to nodes in end-time order once the write
//! frontier (latest start seen) has reached their end. Until then they stay
//! in a pending set that queries also consult. Committing in end order keeps
//! every node created after an interval was committed starting at or after
//! that interval's end, which is what makes a single root-to-leaf descent
//! sufficient for a point query.

use crate::constants::{FORMAT_VERSION, NO_PARENT};
use crate::file::{TreeFile, TreeFooter};
use crate::interval::Interval;
use crate::node::{Node, NodeLayout};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_buffer::NodeCache;
use strata_common::{
    AttributeId, HistoryTreeConfig, Result, StrataError, TimeRange, Timestamp, Value,
};
use tracing::{debug, info, warn};

/// What an existing tree file must match to be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenExpectations {
    pub provider_version: u32,
    /// Number of events the tree was built from, if known.
    pub event_count: Option<u64>,
}

/// Mutable tree state, guarded by the tree lock.
struct TreeState {
    /// Rightmost node of each level, root first.
    latest_branch: Vec<Node>,
    node_count: u32,
    root_seq: u32,
    height: u32,
    tree_end: Timestamp,
    /// Latest start time accepted.
    frontier: Timestamp,
    ongoing: HashMap<AttributeId, Interval>,
    /// Closed intervals waiting to be committed, keyed by (end, arrival).
    pending: BTreeMap<(Timestamp, u64), Interval>,
    arrivals: u64,
    interval_count: u64,
    finalized: bool,
}

impl TreeState {
    fn next_sequence(&mut self) -> u32 {
        let seq = self.node_count;
        self.node_count += 1;
        seq
    }

    /// Queues a closed interval. Empty intervals cover no time and are dropped.
    fn queue(&mut self, interval: Interval) {
        if interval.is_empty() {
            return;
        }
        self.pending.insert((interval.end, self.arrivals), interval);
        self.arrivals += 1;
    }
}

/// Disk-resident interval tree answering "what holds at time t".
pub struct HistoryTree {
    config: HistoryTreeConfig,
    layout: NodeLayout,
    file: TreeFile,
    cache: NodeCache<Node>,
    state: RwLock<TreeState>,
    event_count: AtomicU64,
}

impl HistoryTree {
    /// Creates an empty tree, truncating any existing file at `config.path`.
    pub fn create(config: HistoryTreeConfig) -> Result<Self> {
        let layout = NodeLayout::from_config(&config)?;
        let file = TreeFile::create(&config.path, layout.block_size, config.fsync_enabled)?;
        let cache = Self::make_cache(config.cache_capacity, layout.block_size);

        let root = Node::new_leaf(layout, 0, None, config.tree_start);
        let state = TreeState {
            latest_branch: vec![root],
            node_count: 1,
            root_seq: 0,
            height: 1,
            tree_end: config.tree_start,
            frontier: config.tree_start,
            ongoing: HashMap::new(),
            pending: BTreeMap::new(),
            arrivals: 0,
            interval_count: 0,
            finalized: false,
        };

        debug!(path = ?config.path, block_size = layout.block_size, max_children = layout.max_children, "created history tree");
        Ok(Self {
            config,
            layout,
            file,
            cache,
            state: RwLock::new(state),
            event_count: AtomicU64::new(0),
        })
    }

    /// Opens a closed tree, checking it against `expectations`.
    ///
    /// A provider version or event count mismatch is reported as
    /// `StaleTree`; damaged files as `CorruptNode`.
    pub fn open(path: impl AsRef<Path>, expectations: &OpenExpectations) -> Result<Self> {
        Self::open_inner(path.as_ref(), expectations, 0)
    }

    /// Opens the tree at `config.path` if it is valid and current, otherwise
    /// discards it and creates an empty one.
    ///
    /// Callers can tell the two apart with `is_finalized()`.
    pub fn open_or_create(config: HistoryTreeConfig, expected_events: Option<u64>) -> Result<Self> {
        if config.path.exists() {
            let expectations = OpenExpectations {
                provider_version: config.provider_version,
                event_count: expected_events,
            };
            match Self::open_inner(&config.path, &expectations, config.cache_capacity) {
                Ok(tree) => return Ok(tree),
                Err(e) if e.requires_rebuild() => {
                    warn!(path = ?config.path, error = %e, "discarding history tree, rebuilding");
                }
                Err(e) => return Err(e),
            }
        }
        Self::create(config)
    }

    fn open_inner(
        path: &Path,
        expectations: &OpenExpectations,
        cache_capacity: usize,
    ) -> Result<Self> {
        let (file, footer) = TreeFile::open(path, false)?;

        if footer.provider_version != expectations.provider_version {
            return Err(StrataError::StaleTree(format!(
                "provider version {} (expected {})",
                footer.provider_version, expectations.provider_version
            )));
        }
        if let Some(expected) = expectations.event_count {
            if footer.event_count != expected {
                return Err(StrataError::StaleTree(format!(
                    "built from {} events (expected {expected})",
                    footer.event_count
                )));
            }
        }

        let layout = NodeLayout::new(footer.block_size as usize, footer.max_children as usize)
            .map_err(|e| StrataError::CorruptNode {
                seq: NO_PARENT,
                reason: format!("footer layout: {e}"),
            })?;
        let config = HistoryTreeConfig {
            path: path.to_path_buf(),
            block_size: layout.block_size,
            max_children: layout.max_children,
            provider_version: footer.provider_version,
            tree_start: footer.tree_start,
            cache_capacity,
            fsync_enabled: false,
        };
        let cache = Self::make_cache(cache_capacity, layout.block_size);

        let state = TreeState {
            latest_branch: Vec::new(),
            node_count: footer.node_count,
            root_seq: footer.root_seq,
            height: footer.height,
            tree_end: footer.tree_end,
            frontier: footer.tree_end,
            ongoing: HashMap::new(),
            pending: BTreeMap::new(),
            arrivals: 0,
            interval_count: footer.interval_count,
            finalized: true,
        };

        let tree = Self {
            config,
            layout,
            file,
            cache,
            state: RwLock::new(state),
            event_count: AtomicU64::new(footer.event_count),
        };

        let root = tree.read_node(footer.root_seq)?;
        if root.parent().is_some() {
            return Err(StrataError::CorruptNode {
                seq: footer.root_seq,
                reason: "root node has a parent".to_string(),
            });
        }

        info!(
            path = ?path,
            nodes = footer.node_count,
            height = footer.height,
            start = footer.tree_start,
            end = footer.tree_end,
            "opened history tree"
        );
        Ok(tree)
    }

    fn make_cache(capacity: usize, block_size: usize) -> NodeCache<Node> {
        if capacity == 0 {
            NodeCache::auto_sized(block_size)
        } else {
            NodeCache::new(capacity)
        }
    }

    pub fn config(&self) -> &HistoryTreeConfig {
        &self.config
    }

    pub fn layout(&self) -> NodeLayout {
        self.layout
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Adds an interval.
    ///
    /// Start times must be non-decreasing across calls. An interval for an
    /// attribute that has an ongoing interval closes the ongoing one at the
    /// new start.
    pub fn insert(&self, interval: Interval) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.finalized {
            return Err(StrataError::TreeClosed);
        }
        if interval.start > interval.end {
            return Err(StrataError::InvalidInterval {
                start: interval.start,
                end: interval.end,
            });
        }
        if interval.start < self.config.tree_start {
            return Err(StrataError::TimeOutOfRange {
                time: interval.start,
                start: self.config.tree_start,
                end: state.tree_end,
            });
        }
        if interval.start < state.frontier {
            return Err(StrataError::OutOfOrderInsert {
                previous: state.frontier,
                attempted: interval.start,
            });
        }
        interval.value.check_encodable()?;
        let size = interval.size_on_disk();
        if size > self.layout.max_interval_size() {
            return Err(StrataError::SerializationOverflow {
                needed: size,
                available: self.layout.max_interval_size(),
            });
        }

        state.frontier = interval.start;
        if let Some(previous) = state.ongoing.remove(&interval.attribute) {
            let closed = previous.closed_at(interval.start)?;
            state.queue(closed);
        }
        if interval.is_ongoing() {
            state.ongoing.insert(interval.attribute, interval);
        } else {
            state.queue(interval);
        }

        self.commit_ready(state)
    }

    /// Sets `attribute` to `value` from `time` on.
    pub fn modify(&self, attribute: AttributeId, time: Timestamp, value: impl Into<Value>) -> Result<()> {
        self.insert(Interval::ongoing(time, attribute, value))
    }

    /// Records how many source events the tree has consumed.
    pub fn set_event_count(&self, count: u64) {
        self.event_count.store(count, Ordering::Release);
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Acquire)
    }

    /// Finishes the tree at `end_time`: closes ongoing intervals, commits
    /// everything pending, seals the latest branch and writes the footer.
    pub fn close(&self, end_time: Timestamp) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.finalized {
            return Err(StrataError::TreeClosed);
        }
        if end_time < state.frontier {
            return Err(StrataError::OutOfOrderInsert {
                previous: state.frontier,
                attempted: end_time,
            });
        }
        state.frontier = end_time;

        let mut ongoing: Vec<Interval> = state.ongoing.drain().map(|(_, i)| i).collect();
        ongoing.sort_by_key(|i| i.attribute);
        for interval in ongoing {
            let closed = interval.closed_at(end_time)?;
            state.queue(closed);
        }
        while let Some((_, interval)) = state.pending.pop_first() {
            self.commit(state, interval)?;
        }

        state.tree_end = state.tree_end.max(end_time);
        let tree_end = state.tree_end;
        for node in state.latest_branch.iter_mut().rev() {
            node.close(tree_end)?;
            self.file.write_block(node.sequence(), &node.serialize()?)?;
        }

        let footer = TreeFooter {
            format_version: FORMAT_VERSION,
            provider_version: self.config.provider_version,
            block_size: self.layout.block_size as u32,
            max_children: self.layout.max_children as u32,
            node_count: state.node_count,
            root_seq: state.root_seq,
            height: state.height,
            tree_start: self.config.tree_start,
            tree_end,
            event_count: self.event_count(),
            interval_count: state.interval_count,
        };
        self.file.write_footer(&footer)?;

        for node in state.latest_branch.drain(..) {
            self.cache.insert(node.sequence(), Arc::new(node));
        }
        state.finalized = true;

        info!(
            nodes = footer.node_count,
            height = footer.height,
            intervals = footer.interval_count,
            end = tree_end,
            "closed history tree"
        );
        Ok(())
    }

    /// Commits pending intervals whose end the frontier has reached.
    fn commit_ready(&self, state: &mut TreeState) -> Result<()> {
        while let Some(entry) = state.pending.first_entry() {
            if entry.key().0 > state.frontier {
                break;
            }
            let interval = entry.remove();
            self.commit(state, interval)?;
        }
        Ok(())
    }

    /// Stores an interval in the deepest latest-branch node starting at or
    /// before it, splitting until there is room.
    fn commit(&self, state: &mut TreeState, interval: Interval) -> Result<()> {
        loop {
            let mut level = state.latest_branch.len() - 1;
            while state.latest_branch[level].start() > interval.start {
                level = level.checked_sub(1).ok_or_else(|| {
                    StrataError::Internal(format!(
                        "no node of the latest branch starts before {}",
                        interval.start
                    ))
                })?;
            }

            let target = &mut state.latest_branch[level];
            if target.fits(&interval) {
                state.tree_end = state.tree_end.max(interval.end);
                target.add_interval(interval)?;
                state.interval_count += 1;
                return Ok(());
            }
            self.add_sibling(state, level)?;
        }
    }

    /// Replaces the latest-branch node at `level` and everything below it
    /// with fresh nodes starting at the current tree end.
    fn add_sibling(&self, state: &mut TreeState, mut level: usize) -> Result<()> {
        while level > 0 && state.latest_branch[level - 1].is_full_of_children() {
            level -= 1;
        }
        if level == 0 {
            return self.grow_root(state);
        }

        let split = state.tree_end;
        self.seal_branch(state, level, split)?;

        for i in level..state.latest_branch.len() {
            let parent = state.latest_branch[i - 1].sequence();
            let seq = state.next_sequence();
            let node = if state.latest_branch[i].is_leaf() {
                Node::new_leaf(self.layout, seq, Some(parent), split)
            } else {
                Node::new_branch(self.layout, seq, Some(parent), split)
            };
            state.latest_branch[i - 1].add_child(seq, split)?;
            let sealed = std::mem::replace(&mut state.latest_branch[i], node);
            self.cache.insert(sealed.sequence(), Arc::new(sealed));
        }

        debug!(level, split, nodes = state.node_count, "split latest branch");
        Ok(())
    }

    /// Seals the whole latest branch under a new root, one level higher.
    fn grow_root(&self, state: &mut TreeState) -> Result<()> {
        let split = state.tree_end;
        let depth = state.latest_branch.len();

        let root_seq = state.next_sequence();
        let mut new_root = Node::new_branch(self.layout, root_seq, None, self.config.tree_start);
        let old_root = &mut state.latest_branch[0];
        old_root.set_parent(Some(root_seq));
        new_root.add_child(old_root.sequence(), old_root.start())?;

        self.seal_branch(state, 0, split)?;

        let mut branch = Vec::with_capacity(depth + 1);
        branch.push(new_root);
        for level in 1..=depth {
            let seq = state.next_sequence();
            let parent = &mut branch[level - 1];
            let parent_seq = parent.sequence();
            parent.add_child(seq, split)?;
            let node = if level == depth {
                Node::new_leaf(self.layout, seq, Some(parent_seq), split)
            } else {
                Node::new_branch(self.layout, seq, Some(parent_seq), split)
            };
            branch.push(node);
        }

        let sealed = std::mem::replace(&mut state.latest_branch, branch);
        for node in sealed {
            self.cache.insert(node.sequence(), Arc::new(node));
        }
        state.root_seq = root_seq;
        state.height = depth as u32 + 1;

        info!(root = root_seq, height = state.height, split, "history tree grew a new root");
        Ok(())
    }

    /// Closes and writes latest-branch nodes from the leaf up to `from`.
    fn seal_branch(&self, state: &mut TreeState, from: usize, split: Timestamp) -> Result<()> {
        for node in state.latest_branch[from..].iter_mut().rev() {
            node.close(split)?;
            self.file.write_block(node.sequence(), &node.serialize()?)?;
            debug!(seq = node.sequence(), start = node.start(), end = split, usage = node.usage(), "sealed node");
        }
        self.file.sync()
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    fn check_time(&self, state: &TreeState, time: Timestamp) -> Result<()> {
        if time < self.config.tree_start || (state.finalized && time > state.tree_end) {
            return Err(StrataError::TimeOutOfRange {
                time,
                start: self.config.tree_start,
                end: state.tree_end,
            });
        }
        Ok(())
    }

    /// Returns a sealed node from the cache, reading it on a miss.
    fn load_sealed(&self, seq: u32) -> Result<Arc<Node>> {
        self.cache.get_or_load(seq, || {
            let block = self.file.read_block(seq)?;
            Node::deserialize(&block, self.layout)
        })
    }

    /// Collects every interval covering `time` into `out`.
    fn collect_at(&self, time: Timestamp, out: &mut Vec<Interval>) -> Result<()> {
        let mut next = {
            let state = self.state.read();
            out.extend(state.ongoing.values().filter(|i| i.contains(time)).cloned());
            out.extend(state.pending.values().filter(|i| i.contains(time)).cloned());

            if state.latest_branch.is_empty() {
                Some(state.root_seq)
            } else {
                let mut sealed_child = None;
                for (level, node) in state.latest_branch.iter().enumerate() {
                    out.extend(node.intervals_at(time, false).cloned());
                    let Some(child) = node.search_child(time) else {
                        break;
                    };
                    let in_memory = state.latest_branch.get(level + 1).map(Node::sequence);
                    if in_memory != Some(child) {
                        sealed_child = Some(child);
                        break;
                    }
                }
                sealed_child
            }
        };

        while let Some(seq) = next {
            let node = self.load_sealed(seq)?;
            out.extend(node.intervals_at(time, false).cloned());
            next = node.search_child(time);
        }
        Ok(())
    }

    /// Returns every interval covering `time`, ordered by attribute.
    ///
    /// Intervals are half-open, except that once the tree is closed its end
    /// time is inclusive: querying exactly at the tree end also returns the
    /// intervals that end there.
    pub fn query_at(&self, time: Timestamp) -> Result<Vec<Interval>> {
        let inclusive_end = {
            let state = self.state.read();
            self.check_time(&state, time)?;
            state.finalized && time == state.tree_end && time > self.config.tree_start
        };

        let mut out = Vec::new();
        self.collect_at(time, &mut out)?;
        if inclusive_end {
            let mut last = Vec::new();
            self.collect_at(time - 1, &mut last)?;
            out.extend(last.into_iter().filter(|i| i.end == time));
        }
        out.sort_by_key(|i| (i.attribute, i.start));
        Ok(out)
    }

    /// Returns the interval of `attribute` covering `time`, if any.
    pub fn query_attribute(&self, attribute: AttributeId, time: Timestamp) -> Result<Option<Interval>> {
        Ok(self
            .query_at(time)?
            .into_iter()
            .find(|i| i.attribute == attribute))
    }

    /// Returns the full state at `time` as a vector indexed by attribute.
    /// Attributes at or beyond `attribute_count` are ignored.
    pub fn query_full(&self, time: Timestamp, attribute_count: usize) -> Result<Vec<Option<Interval>>> {
        let mut state = vec![None; attribute_count];
        for interval in self.query_at(time)? {
            let idx = interval.attribute.index();
            if idx < attribute_count && state[idx].is_none() {
                state[idx] = Some(interval);
            }
        }
        Ok(state)
    }

    /// Returns every interval with at least one point in `[start, end]`,
    /// ordered by start time.
    pub fn query_range(&self, start: Timestamp, end: Timestamp) -> Result<Vec<Interval>> {
        if start > end {
            return Err(StrataError::InvalidInterval { start, end });
        }

        let mut out = Vec::new();
        let mut stack = Vec::new();
        {
            let state = self.state.read();
            if end < self.config.tree_start || (state.finalized && start > state.tree_end) {
                return Err(StrataError::TimeOutOfRange {
                    time: if end < self.config.tree_start { end } else { start },
                    start: self.config.tree_start,
                    end: state.tree_end,
                });
            }

            out.extend(
                state
                    .ongoing
                    .values()
                    .filter(|i| i.intersects(start, end))
                    .cloned(),
            );
            out.extend(
                state
                    .pending
                    .values()
                    .filter(|i| i.intersects(start, end))
                    .cloned(),
            );

            if state.latest_branch.is_empty() {
                stack.push(state.root_seq);
            }
            for (level, node) in state.latest_branch.iter().enumerate() {
                out.extend(node.intervals_in(start, end).cloned());
                let in_memory = state.latest_branch.get(level + 1).map(Node::sequence);
                let mut descend = false;
                for child in node.children_in(start, end) {
                    if Some(child) == in_memory {
                        descend = true;
                    } else {
                        stack.push(child);
                    }
                }
                if !descend {
                    break;
                }
            }
        }

        while let Some(seq) = stack.pop() {
            let node = self.load_sealed(seq)?;
            out.extend(node.intervals_in(start, end).cloned());
            stack.extend(node.children_in(start, end));
        }

        out.sort_by_key(|i| (i.start, i.end, i.attribute));
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_finalized(&self) -> bool {
        self.state.read().finalized
    }

    pub fn node_count(&self) -> u32 {
        self.state.read().node_count
    }

    /// Number of levels, 1 for a single leaf.
    pub fn depth(&self) -> u32 {
        self.state.read().height
    }

    /// Intervals committed to nodes. Ongoing and pending intervals are not
    /// counted until they are committed.
    pub fn interval_count(&self) -> u64 {
        self.state.read().interval_count
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::new(self.config.tree_start, self.state.read().tree_end)
    }

    pub fn root_sequence(&self) -> u32 {
        self.state.read().root_seq
    }

    pub fn file_size(&self) -> Result<u64> {
        self.file.file_size()
    }

    pub fn cache_hit_ratio(&self) -> f64 {
        self.cache.hit_ratio()
    }

    /// Returns a node by sequence number. Latest-branch nodes are served from
    /// memory, never from the file or the cache.
    pub fn read_node(&self, seq: u32) -> Result<Arc<Node>> {
        {
            let state = self.state.read();
            if seq >= state.node_count {
                return Err(StrataError::NodeNotFound { seq });
            }
            if let Some(node) = state.latest_branch.iter().find(|n| n.sequence() == seq) {
                return Ok(Arc::new(node.clone()));
            }
        }
        self.load_sealed(seq)
    }

    /// Snapshot of the latest branch, root first. Empty once closed.
    pub fn latest_branch(&self) -> Vec<Node> {
        self.state.read().latest_branch.clone()
    }

    /// Walks the whole tree checking parent links, child start times and
    /// interval containment. Meant for a tree with no active writer.
    pub fn check_integrity(&self) -> Result<()> {
        let (root_seq, node_count) = {
            let state = self.state.read();
            (state.root_seq, state.node_count)
        };

        let mut visited = 0u32;
        let mut stack: Vec<(u32, Option<u32>, Option<Timestamp>)> = vec![(root_seq, None, None)];
        while let Some((seq, parent, start)) = stack.pop() {
            let node = self.read_node(seq)?;
            visited += 1;
            let corrupt = |reason: String| StrataError::CorruptNode { seq, reason };

            if node.sequence() != seq {
                return Err(corrupt(format!("block holds node {}", node.sequence())));
            }
            if node.parent() != parent {
                return Err(corrupt(format!(
                    "parent is {:?}, expected {:?}",
                    node.parent(),
                    parent
                )));
            }
            if let Some(start) = start {
                if node.start() != start {
                    return Err(corrupt(format!(
                        "starts at {}, parent records {start}",
                        node.start()
                    )));
                }
            }
            if let Some(bad) = node
                .intervals()
                .iter()
                .find(|i| i.start < node.start() || i.end > node.end())
            {
                return Err(corrupt(format!(
                    "interval {bad} outside of [{}, {}]",
                    node.start(),
                    node.end()
                )));
            }
            for child in node.children() {
                stack.push((child.seq, Some(seq), Some(child.start)));
            }
        }

        if visited != node_count {
            return Err(StrataError::CorruptNode {
                seq: root_seq,
                reason: format!("reached {visited} of {node_count} nodes from the root"),
            });
        }
        Ok(())
    }

    /// Pre-order listing of every node, indented by depth.
    pub fn dump(&self) -> Result<String> {
        let (root_seq, header) = {
            let state = self.state.read();
            (
                state.root_seq,
                format!(
                    "history tree: {} nodes, depth {}, range [{}, {}]{}\n",
                    state.node_count,
                    state.height,
                    self.config.tree_start,
                    state.tree_end,
                    if state.finalized { ", closed" } else { "" }
                ),
            )
        };

        let mut out = header;
        let mut stack = vec![(root_seq, 0usize)];
        while let Some((seq, depth)) = stack.pop() {
            let node = self.read_node(seq)?;
            out.push_str(&"  ".repeat(depth));
            out.push_str(&node.to_string());
            out.push('\n');
            for child in node.children().iter().rev() {
                stack.push((child.seq, depth + 1));
            }
        }
        Ok(out)
    }

    /// Removes the backing file.
    pub fn delete_file(self) -> Result<()> {
        self.file.delete()
    }
}
