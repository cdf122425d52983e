//! Offline quad-tree construction.
//!
//! Entries are pushed down from the root into the first quadrant that fully
//! contains them, up to the configured depth. Quadrants are created lazily
//! the first time a node is entered, then the tree is trimmed and flattened
//! into a [`NodeArena`] in pre-order.

use std::path::Path;
use std::sync::Arc;

use super::node::{IdSpan, IdStore, IndexNode, NodeArena};
use super::qix_storage::QixWriter;
use super::qix_types::{NodeId, QixError, QixResult, RecordId};
use super::tree::IndexTree;
use crate::config::QuadTreeConfig;
use crate::envelope::Envelope;
use crate::offset_store::RecordOffsetStore;

/// Node of the tree while it is being built.
struct BuildNode {
    bounds: Envelope,
    ids: Vec<RecordId>,
    children: Vec<BuildNode>,
}

impl BuildNode {
    fn new(bounds: Envelope) -> Self {
        Self {
            bounds,
            ids: Vec::new(),
            children: Vec::new(),
        }
    }

    fn insert(&mut self, id: RecordId, bounds: &Envelope, depth_left: u32, ratio: f64) {
        if depth_left > 1 && self.children.is_empty() {
            self.children = quadrants(&self.bounds, ratio)
                .into_iter()
                .map(BuildNode::new)
                .collect();
        }

        if let Some(child) = self.children.iter_mut().find(|c| c.bounds.contains(bounds)) {
            child.insert(id, bounds, depth_left - 1, ratio);
            return;
        }
        self.ids.push(id);
    }

    /// Removes empty subtrees and collapses single-child chains. Returns
    /// true when this node ended up with neither ids nor children.
    fn trim(&mut self) -> bool {
        self.children.retain_mut(|child| !child.trim());

        if self.children.len() == 1 && self.ids.is_empty() {
            if let Some(only) = self.children.pop() {
                *self = only;
            }
        }
        self.children.is_empty() && self.ids.is_empty()
    }

    fn flatten(
        self,
        parent: Option<NodeId>,
        nodes: &mut Vec<IndexNode>,
        ids: &mut Vec<RecordId>,
    ) -> NodeId {
        let node_id = nodes.len();
        nodes.push(IndexNode {
            bounds: self.bounds,
            ids: IdSpan {
                start: ids.len(),
                len: self.ids.len(),
            },
            children: Vec::with_capacity(self.children.len()),
            parent,
        });
        ids.extend_from_slice(&self.ids);

        for child in self.children {
            let child_id = child.flatten(Some(node_id), nodes, ids);
            nodes[node_id].children.push(child_id);
        }
        node_id
    }
}

/// Splits `bounds` in two along its longer side. Each half covers `ratio`
/// of that side, so halves overlap when `ratio` is above one half.
fn halves(bounds: &Envelope, ratio: f64) -> [Envelope; 2] {
    let width = bounds.width();
    let height = bounds.height();
    if width > height {
        [
            Envelope::new(bounds.min_x, bounds.min_y, bounds.min_x + width * ratio, bounds.max_y),
            Envelope::new(bounds.max_x - width * ratio, bounds.min_y, bounds.max_x, bounds.max_y),
        ]
    } else {
        [
            Envelope::new(bounds.min_x, bounds.min_y, bounds.max_x, bounds.min_y + height * ratio),
            Envelope::new(bounds.min_x, bounds.max_y - height * ratio, bounds.max_x, bounds.max_y),
        ]
    }
}

fn quadrants(bounds: &Envelope, ratio: f64) -> [Envelope; 4] {
    let [first, second] = halves(bounds, ratio);
    let [a, b] = halves(&first, ratio);
    let [c, d] = halves(&second, ratio);
    [a, b, c, d]
}

/// Collects `(record id, bounds)` entries and builds a read-only quad-tree.
///
/// # Examples
///
/// ```rust,ignore
/// use std::sync::Arc;
/// use nitrite_quadtree::{Envelope, MemoryOffsetStore, QuadTreeBuilder, QuadTreeConfig};
///
/// let mut builder = QuadTreeBuilder::new(QuadTreeConfig::default());
/// builder.insert(0, Envelope::new(0.0, 0.0, 1.0, 1.0))?;
/// builder.insert(1, Envelope::new(5.0, 5.0, 6.0, 6.0))?;
///
/// let store = Arc::new(MemoryOffsetStore::sequential(2, 56));
/// let tree = builder.build(store)?;
/// assert_eq!(tree.search(Envelope::new(0.0, 0.0, 2.0, 2.0))?.size()?, 1);
/// ```
pub struct QuadTreeBuilder {
    config: QuadTreeConfig,
    bounds: Option<Envelope>,
    entries: Vec<(RecordId, Envelope)>,
}

impl QuadTreeBuilder {
    pub fn new(config: QuadTreeConfig) -> Self {
        Self {
            config,
            bounds: None,
            entries: Vec::new(),
        }
    }

    /// Sets the extent of the root node, usually the dataset bounds from the
    /// geometry file header. The root still grows to cover every entry.
    pub fn with_bounds(mut self, bounds: Envelope) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.config
    }

    /// Queues one record. Records with null bounds cannot be indexed.
    pub fn insert(&mut self, id: RecordId, bounds: Envelope) -> QixResult<()> {
        if bounds.is_null() {
            return Err(QixError::InvalidOperation(format!(
                "Record {} has empty bounds",
                id
            )));
        }
        self.entries.push((id, bounds));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds the node arena for everything inserted so far.
    pub fn build_arena(&self) -> QixResult<NodeArena> {
        self.config.validate()?;

        let mut root_bounds = self.bounds.unwrap_or_default();
        for (_, bounds) in &self.entries {
            root_bounds.expand_to_include(bounds);
        }

        let max_depth = self.config.effective_max_depth(self.entries.len());
        let ratio = self.config.split_ratio();
        let mut root = BuildNode::new(root_bounds);
        for (id, bounds) in &self.entries {
            root.insert(*id, bounds, max_depth, ratio);
        }
        // an empty root survives trimming
        root.trim();

        let mut nodes = Vec::new();
        let mut ids = Vec::with_capacity(self.entries.len());
        root.flatten(None, &mut nodes, &mut ids);

        log::debug!(
            "Built quad-tree: {} entries, {} nodes, max depth {}",
            self.entries.len(),
            nodes.len(),
            max_depth
        );

        Ok(NodeArena::from_parts(
            nodes,
            IdStore::Owned(ids),
            self.entries.len() as u32,
            max_depth,
        ))
    }

    /// Builds an in-memory tree backed by `store`.
    pub fn build(&self, store: Arc<dyn RecordOffsetStore>) -> QixResult<IndexTree> {
        let arena = self.build_arena()?;
        IndexTree::new(Arc::new(arena), store, self.config.clone())
    }

    /// Builds the tree and writes it as a `.qix` file in the configured byte
    /// order.
    pub fn write_to(&self, path: impl AsRef<Path>) -> QixResult<()> {
        let arena = self.build_arena()?;
        QixWriter::write(path, &arena, self.config.byte_order())
    }
}
