//! Quad-tree nodes.
//!
//! The tree topology lives once in a shared [`NodeArena`]: bounds, child
//! lists, parent links and record ids, addressed by [`NodeId`]. Nothing in
//! the arena changes after it is built. Every traversal works on its own
//! [`NodeGraphCopy`], which pairs the shared arena with private visited and
//! cleared flags, so concurrent traversals never observe each other.

use std::sync::Arc;

use memmap2::Mmap;

use super::qix_types::{ByteOrder, NodeId, RecordId};
use crate::envelope::Envelope;

/// Where a node's record ids live inside the arena's [`IdStore`].
///
/// For owned ids `start` is an element index, for mapped ids it is a byte
/// position in the memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IdSpan {
    pub start: usize,
    pub len: usize,
}

/// Backing storage for record ids.
pub(crate) enum IdStore {
    /// Ids produced by the in-memory builder
    Owned(Vec<RecordId>),
    /// Ids left in a `.qix` memory map, decoded on access
    Mapped {
        map: Mmap,
        order: ByteOrder,
        one_based: bool,
    },
}

impl IdStore {
    fn id_at(&self, span: &IdSpan, index: usize) -> RecordId {
        match self {
            IdStore::Owned(ids) => ids[span.start + index],
            IdStore::Mapped {
                map,
                order,
                one_based,
            } => {
                let pos = span.start + index * 4;
                let raw = order.read_i32(&map[pos..pos + 4]) as RecordId;
                if *one_based {
                    raw.wrapping_sub(1)
                } else {
                    raw
                }
            }
        }
    }
}

/// A node of the immutable tree.
#[derive(Debug, Clone)]
pub struct IndexNode {
    pub(crate) bounds: Envelope,
    pub(crate) ids: IdSpan,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl IndexNode {
    pub fn bounds(&self) -> &Envelope {
        &self.bounds
    }

    pub fn id_count(&self) -> usize {
        self.ids.len
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Non-owning back reference; `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

/// Immutable node storage shared by a tree and all of its traversals.
/// The root is always node 0.
pub struct NodeArena {
    nodes: Vec<IndexNode>,
    ids: IdStore,
    record_count: u32,
    max_depth: u32,
}

impl NodeArena {
    pub(crate) fn from_parts(
        nodes: Vec<IndexNode>,
        ids: IdStore,
        record_count: u32,
        max_depth: u32,
    ) -> Self {
        debug_assert!(!nodes.is_empty(), "arena needs a root node");
        Self {
            nodes,
            ids,
            record_count,
            max_depth,
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node: NodeId) -> &IndexNode {
        &self.nodes[node]
    }

    pub fn bounds(&self, node: NodeId) -> &Envelope {
        &self.nodes[node].bounds
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node].children
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].parent
    }

    pub fn id_count(&self, node: NodeId) -> usize {
        self.nodes[node].ids.len
    }

    /// The `index`-th record id stored at `node`.
    pub fn id_at(&self, node: NodeId, index: usize) -> RecordId {
        let span = &self.nodes[node].ids;
        assert!(index < span.len, "id index {} out of bounds", index);
        self.ids.id_at(span, index)
    }

    /// All record ids stored at `node`, in stored order.
    pub fn ids(&self, node: NodeId) -> impl Iterator<Item = RecordId> + '_ {
        let span = self.nodes[node].ids;
        (0..span.len).map(move |i| self.ids.id_at(&span, i))
    }

    /// Total number of ids over all nodes.
    pub fn total_ids(&self) -> usize {
        self.nodes.iter().map(|n| n.ids.len).sum()
    }

    /// Number of levels, counting the root as level 1.
    pub fn depth(&self) -> u32 {
        // nodes are stored in pre-order, so a parent always precedes its children
        let mut levels = vec![0u32; self.nodes.len()];
        let mut deepest = 0;
        for (index, node) in self.nodes.iter().enumerate() {
            levels[index] = node.parent.map_or(1, |p| levels[p] + 1);
            deepest = deepest.max(levels[index]);
        }
        deepest
    }

    /// Record count stored with the index.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Maximum depth stored with the index.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}

/// Compact per-node flag set.
#[derive(Debug, Clone)]
struct NodeBits {
    words: Vec<u64>,
}

impl NodeBits {
    fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }
}

/// A private, mutable view over a shared [`NodeArena`].
///
/// Holds the visited flags, the cleared-ids flags and the id cursor of the
/// node being drained. Creating one allocates fresh state; two copies never
/// share mutable data.
pub struct NodeGraphCopy {
    arena: Arc<NodeArena>,
    visited: NodeBits,
    cleared: NodeBits,
    cursor: Option<(NodeId, usize)>,
}

impl NodeGraphCopy {
    pub fn new(arena: Arc<NodeArena>) -> Self {
        let len = arena.len();
        Self {
            arena,
            visited: NodeBits::new(len),
            cleared: NodeBits::new(len),
            cursor: None,
        }
    }

    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.arena
    }

    pub fn root(&self) -> NodeId {
        self.arena.root()
    }

    pub fn bounds_intersects(&self, node: NodeId, envelope: &Envelope) -> bool {
        self.arena.bounds(node).intersects(envelope)
    }

    /// Ids of `node` not yet taken by [`NodeGraphCopy::next_id`] in this copy.
    pub fn remaining_id_count(&self, node: NodeId) -> usize {
        if self.cleared.get(node) {
            return 0;
        }
        let total = self.arena.id_count(node);
        match self.cursor {
            Some((current, taken)) if current == node => total - taken,
            _ => total,
        }
    }

    /// Takes the next id of `node`. One node is drained at a time: moving
    /// the cursor to another node starts that node from its first id.
    pub fn next_id(&mut self, node: NodeId) -> Option<RecordId> {
        if self.remaining_id_count(node) == 0 {
            return None;
        }
        let taken = match self.cursor {
            Some((current, taken)) if current == node => taken,
            _ => 0,
        };
        let id = self.arena.id_at(node, taken);
        self.cursor = Some((node, taken + 1));
        Some(id)
    }

    /// Drops whatever ids `node` has left in this copy.
    pub fn clear_ids(&mut self, node: NodeId) {
        self.cleared.set(node);
        if matches!(self.cursor, Some((current, _)) if current == node) {
            self.cursor = None;
        }
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.arena.children(node)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.parent(node)
    }

    pub fn is_visited(&self, node: NodeId) -> bool {
        self.visited.get(node)
    }

    pub fn mark_visited(&mut self, node: NodeId) {
        self.visited.set(node);
    }
}

impl Clone for NodeGraphCopy {
    /// Duplicates the traversal state; the arena stays shared.
    fn clone(&self) -> Self {
        Self {
            arena: Arc::clone(&self.arena),
            visited: self.visited.clone(),
            cleared: self.cleared.clone(),
            cursor: self.cursor,
        }
    }
}
