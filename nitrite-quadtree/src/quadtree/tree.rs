//! IndexTree implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::node::{NodeArena, NodeGraphCopy};
use super::qix_storage::QixFile;
use super::qix_types::{NodeId, QixError, QixResult, QuadTreeStats};
use super::range_collection::RangeCollection;
use super::range_iterator::RangeIterator;
use crate::config::QuadTreeConfig;
use crate::envelope::Envelope;
use crate::offset_store::RecordOffsetStore;

/// A read-only quad-tree over record bounding boxes.
///
/// Cloning is cheap and every clone refers to the same tree. The topology is
/// shared by all queries; each iterator works on a private
/// [`NodeGraphCopy`]. Closing any clone closes the tree for all of them,
/// force-closes iterators that are still open and releases the offset store.
#[derive(Clone)]
pub struct IndexTree {
    inner: Arc<IndexTreeInner>,
}

struct IndexTreeInner {
    arena: Arc<NodeArena>,
    store: Arc<dyn RecordOffsetStore>,
    config: QuadTreeConfig,
    registry: Mutex<IteratorRegistry>,
    path: Option<PathBuf>,
}

/// Live iterators, keyed by handle id. Also guards the closed flag so that
/// registration and shutdown never interleave.
struct IteratorRegistry {
    closed: bool,
    next_handle: u64,
    live: HashMap<u64, Arc<IteratorHandle>>,
}

/// Tree-side view of one open iterator.
pub(crate) struct IteratorHandle {
    id: u64,
    closed: AtomicBool,
}

impl IteratorHandle {
    fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn force_close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Ties an iterator to the tree that created it. Released when the
/// iterator closes.
pub(crate) struct Registration {
    tree: IndexTree,
    handle: Arc<IteratorHandle>,
}

impl Registration {
    pub(crate) fn handle(&self) -> &IteratorHandle {
        &self.handle
    }

    pub(crate) fn release(self) {
        self.handle.force_close();
        self.tree.unregister(self.handle.id);
    }
}

impl IndexTree {
    /// Wraps an already built arena.
    pub fn new(
        arena: Arc<NodeArena>,
        store: Arc<dyn RecordOffsetStore>,
        config: QuadTreeConfig,
    ) -> QixResult<Self> {
        Self::with_path(arena, store, config, None)
    }

    /// Loads a `.qix` file. Only the topology is read; record ids stay in
    /// the memory map until a query needs them.
    pub fn open(
        path: impl AsRef<Path>,
        store: Arc<dyn RecordOffsetStore>,
        config: QuadTreeConfig,
    ) -> QixResult<Self> {
        let path = path.as_ref();
        let arena = QixFile::open(path)?.load()?;
        Self::with_path(Arc::new(arena), store, config, Some(path.to_path_buf()))
    }

    fn with_path(
        arena: Arc<NodeArena>,
        store: Arc<dyn RecordOffsetStore>,
        config: QuadTreeConfig,
        path: Option<PathBuf>,
    ) -> QixResult<Self> {
        config.validate()?;
        if store.is_closed() {
            return Err(QixError::Closed);
        }
        if arena.record_count() > store.record_count() {
            log::warn!(
                "Index expects {} records but the offset store holds {}",
                arena.record_count(),
                store.record_count()
            );
        }

        Ok(Self {
            inner: Arc::new(IndexTreeInner {
                arena,
                store,
                config,
                registry: Mutex::new(IteratorRegistry {
                    closed: false,
                    next_handle: 0,
                    live: HashMap::new(),
                }),
                path,
            }),
        })
    }

    /// Check if tree is closed
    fn check_closed(&self) -> QixResult<()> {
        if self.inner.registry.lock().closed {
            Err(QixError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.arena.root()
    }

    pub fn arena(&self) -> &Arc<NodeArena> {
        &self.inner.arena
    }

    pub fn store(&self) -> &Arc<dyn RecordOffsetStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &QuadTreeConfig {
        &self.inner.config
    }

    /// Path of the `.qix` file, for trees loaded from disk.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    /// Fresh traversal state over the shared topology.
    pub fn create_copy(&self) -> QixResult<NodeGraphCopy> {
        self.check_closed()?;
        Ok(NodeGraphCopy::new(Arc::clone(&self.inner.arena)))
    }

    /// Creates an iterator over the records intersecting `envelope` and
    /// registers it, so that [`IndexTree::close`] can force-close it.
    pub fn create_iterator(
        &self,
        envelope: &Envelope,
        store: Arc<dyn RecordOffsetStore>,
    ) -> QixResult<RangeIterator> {
        let handle = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return Err(QixError::Closed);
            }
            let id = registry.next_handle;
            registry.next_handle += 1;
            let handle = Arc::new(IteratorHandle::new(id));
            registry.live.insert(id, Arc::clone(&handle));
            handle
        };

        let copy = NodeGraphCopy::new(Arc::clone(&self.inner.arena));
        let iterator = RangeIterator::new(copy, store, *envelope, self.inner.config.batch_size());
        Ok(iterator.attach(Registration {
            tree: self.clone(),
            handle,
        }))
    }

    /// Range query view over this tree's own offset store.
    pub fn search(&self, envelope: Envelope) -> QixResult<RangeCollection> {
        self.check_closed()?;
        log::debug!("Range search for {}", envelope);
        Ok(RangeCollection::new(
            self.clone(),
            Arc::clone(&self.inner.store),
            envelope,
        ))
    }

    pub(crate) fn unregister(&self, handle_id: u64) {
        self.inner.registry.lock().live.remove(&handle_id);
    }

    /// Shuts the tree down. Safe to call any number of times from any
    /// thread; the offset store is released exactly once and failures are
    /// logged, never returned.
    pub fn close(&self) {
        let mut registry = self.inner.registry.lock();
        if registry.closed {
            return;
        }
        registry.closed = true;

        let stragglers = registry.live.len();
        for (_, handle) in registry.live.drain() {
            handle.force_close();
        }
        if stragglers > 0 {
            log::debug!("Force-closed {} open iterators", stragglers);
        }

        if let Err(e) = self.inner.store.close() {
            log::warn!("Failed to close offset store: {}", e);
        }
        log::debug!("Closed quad-tree index {:?}", self.inner.path);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.registry.lock().closed
    }

    /// Number of iterators created by this tree and not closed yet.
    pub fn open_iterator_count(&self) -> usize {
        self.inner.registry.lock().live.len()
    }

    pub fn stats(&self) -> QuadTreeStats {
        let arena = &self.inner.arena;
        QuadTreeStats {
            node_count: arena.len() as u64,
            id_count: arena.total_ids() as u64,
            depth: arena.depth(),
            record_count: arena.record_count(),
            max_depth: arena.max_depth(),
            open_iterators: self.open_iterator_count() as u64,
        }
    }
}

impl Drop for IndexTreeInner {
    fn drop(&mut self) {
        // Best effort release when the last clone goes away unclosed
        if !self.registry.get_mut().closed {
            if let Err(e) = self.store.close() {
                log::debug!("Offset store already released on drop: {}", e);
            }
        }
    }
}
