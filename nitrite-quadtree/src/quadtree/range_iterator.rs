//! Bounded-batch range traversal.
//!
//! The walk is depth first and iterative: it keeps a single `current` node
//! and moves down to the first unvisited intersecting child or back up
//! through the parent link. Each refill collects at most `batch_size` ids,
//! sorts them and resolves their offsets, so peak memory per iterator does
//! not depend on the size of the dataset.

use std::sync::Arc;

use super::node::NodeGraphCopy;
use super::qix_types::{Data, NodeId, QixError, QixResult, RecordId};
use super::tree::Registration;
use crate::envelope::Envelope;
use crate::offset_store::RecordOffsetStore;

/// Lifecycle of a [`RangeIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IteratorState {
    /// Created, nothing read yet
    Open,
    /// At least one `has_next`/`next_data` call made
    Iterating,
    /// Exhausted, failed or closed
    Closed,
}

/// Lazily yields the [`Data`] of every record stored in a node whose bounds
/// intersect the query envelope.
///
/// The sequence is finite and cannot be restarted. Ids are ascending within
/// one refill batch; there is no order across batches.
///
/// After natural exhaustion `has_next` keeps returning `false` and
/// `next_data` fails with [`QixError::NoSuchElement`]. After an explicit
/// [`RangeIterator::close`], or when the owning tree shuts down, both fail
/// with [`QixError::IllegalState`]. An offset lookup failure is returned
/// once and closes the iterator.
pub struct RangeIterator {
    graph: NodeGraphCopy,
    store: Arc<dyn RecordOffsetStore>,
    envelope: Envelope,
    batch_size: usize,
    current: Option<NodeId>,
    pending_ids: Vec<RecordId>,
    batch: Vec<Data>,
    position: usize,
    state: IteratorState,
    drained: bool,
    fused: bool,
    registration: Option<Registration>,
}

impl RangeIterator {
    /// Creates an iterator over `graph`, starting at its root. The iterator
    /// is not registered with any tree; use
    /// [`IndexTree::create_iterator`](super::tree::IndexTree::create_iterator)
    /// for that.
    pub fn new(
        graph: NodeGraphCopy,
        store: Arc<dyn RecordOffsetStore>,
        envelope: Envelope,
        batch_size: usize,
    ) -> Self {
        let current = Some(graph.root());
        Self {
            graph,
            store,
            envelope,
            batch_size: batch_size.max(1),
            current,
            pending_ids: Vec::new(),
            batch: Vec::new(),
            position: 0,
            state: IteratorState::Open,
            drained: false,
            fused: false,
            registration: None,
        }
    }

    pub(crate) fn attach(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == IteratorState::Closed
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Registry handle of the tree that created this iterator, while open.
    pub fn handle_id(&self) -> Option<u64> {
        self.registration.as_ref().map(|r| r.handle().id())
    }

    /// Checks for another element, refilling the batch when the current one
    /// is used up.
    pub fn has_next(&mut self) -> QixResult<bool> {
        if self.drained {
            return Ok(false);
        }
        self.ensure_open()?;
        self.state = IteratorState::Iterating;

        if self.position < self.batch.len() {
            return Ok(true);
        }

        if let Err(e) = self.refill() {
            log::error!("Range query over {} aborted: {}", self.envelope, e);
            self.close();
            return Err(e);
        }

        if self.batch.is_empty() {
            self.drained = true;
            self.close();
            return Ok(false);
        }
        Ok(true)
    }

    /// Returns the next element.
    pub fn next_data(&mut self) -> QixResult<Data> {
        if !self.has_next()? {
            return Err(QixError::NoSuchElement);
        }
        let data = self.batch[self.position];
        self.position += 1;
        Ok(data)
    }

    /// Stops the iteration and unregisters from the tree. Never fails and
    /// may be called any number of times.
    pub fn close(&mut self) {
        if self.state == IteratorState::Closed {
            return;
        }
        self.state = IteratorState::Closed;
        self.current = None;
        self.batch = Vec::new();
        self.pending_ids = Vec::new();
        self.position = 0;
        if let Some(registration) = self.registration.take() {
            registration.release();
        }
    }

    fn ensure_open(&mut self) -> QixResult<()> {
        if self.state == IteratorState::Closed {
            return Err(QixError::IllegalState("Iterator is closed".into()));
        }
        let revoked = self
            .registration
            .as_ref()
            .is_some_and(|r| r.handle().is_closed());
        if revoked {
            self.close();
            return Err(QixError::IllegalState(
                "Iterator was closed by index shutdown".into(),
            ));
        }
        Ok(())
    }

    /// Walks the copy until `batch_size` ids are collected or the walk
    /// returns above the root, then resolves the collected ids.
    fn refill(&mut self) -> QixResult<()> {
        self.batch.clear();
        self.pending_ids.clear();
        self.position = 0;

        while self.pending_ids.len() < self.batch_size {
            let Some(node) = self.current else {
                break;
            };

            if self.graph.remaining_id_count(node) > 0
                && !self.graph.is_visited(node)
                && self.graph.bounds_intersects(node, &self.envelope)
            {
                if let Some(id) = self.graph.next_id(node) {
                    self.pending_ids.push(id);
                }
                continue;
            }

            // exhausted or outside the query
            self.graph.clear_ids(node);
            let next_child = self
                .graph
                .children(node)
                .iter()
                .copied()
                .find(|&child| {
                    !self.graph.is_visited(child)
                        && self.graph.bounds_intersects(child, &self.envelope)
                });
            match next_child {
                Some(child) => self.current = Some(child),
                None => {
                    self.graph.mark_visited(node);
                    self.current = self.graph.parent(node);
                }
            }
        }

        // ascending ids read the offset file front to back
        self.pending_ids.sort_unstable();
        for &id in &self.pending_ids {
            let offset = self.store.offset_of(id)?;
            self.batch.push(Data::new(id, offset));
        }
        Ok(())
    }
}

impl Iterator for RangeIterator {
    type Item = QixResult<Data>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.has_next() {
            Ok(true) => Some(self.next_data()),
            Ok(false) => None,
            Err(e) => {
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}

impl Drop for RangeIterator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuadTreeConfig;
    use crate::offset_store::MemoryOffsetStore;
    use crate::quadtree::{IndexTree, NodeArena, QuadTreeBuilder};
    use crate::test_support::{
        node_oracle, random_entries, random_query, sample_arena, sample_tree, TestStore,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;
    use std::sync::Barrier;
    use std::thread;

    fn standalone(arena: Arc<NodeArena>, envelope: Envelope, batch: usize) -> RangeIterator {
        let store = Arc::new(MemoryOffsetStore::sequential(arena.record_count(), 10));
        RangeIterator::new(NodeGraphCopy::new(arena), store, envelope, batch)
    }

    fn drain(iterator: &mut RangeIterator) -> Vec<Data> {
        let mut out = Vec::new();
        while iterator.has_next().unwrap() {
            out.push(iterator.next_data().unwrap());
        }
        out
    }

    fn random_tree(
        seed: u64,
        count: u32,
        config: QuadTreeConfig,
    ) -> (IndexTree, Vec<(RecordId, Envelope)>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let entries = random_entries(&mut rng, count);
        let mut builder = QuadTreeBuilder::new(config);
        for (id, bounds) in &entries {
            builder.insert(*id, *bounds).unwrap();
        }
        let tree = builder
            .build(Arc::new(MemoryOffsetStore::sequential(count, 24)))
            .unwrap();
        (tree, entries)
    }

    #[test]
    fn test_sample_query_yields_intersecting_nodes() {
        let arena = Arc::new(sample_arena());
        let mut iterator = standalone(arena, Envelope::new(0.0, 0.0, 1.0, 1.0), 32);
        assert_eq!(iterator.state(), IteratorState::Open);

        let ids: Vec<RecordId> = drain(&mut iterator).iter().map(|d| d.id).collect();
        // root, node 1 and node 2; node 3 lies outside the query
        assert_eq!(ids, vec![0, 1, 2, 4, 6]);
        assert_eq!(iterator.state(), IteratorState::Closed);
    }

    #[test]
    fn test_offsets_resolved_from_store() {
        let arena = Arc::new(sample_arena());
        let mut iterator = standalone(arena, Envelope::new(0.0, 0.0, 10.0, 10.0), 32);
        let data = drain(&mut iterator);
        assert_eq!(data.len(), 7);
        for item in data {
            assert_eq!(item.offset, 100 + item.id as u64 * 10);
        }
    }

    #[test]
    fn test_query_outside_root_is_empty() {
        let arena = Arc::new(sample_arena());
        let mut iterator = standalone(arena, Envelope::new(50.0, 50.0, 60.0, 60.0), 32);
        assert!(!iterator.has_next().unwrap());
        assert!(matches!(iterator.next_data(), Err(QixError::NoSuchElement)));
        assert!(!iterator.has_next().unwrap());
    }

    #[test]
    fn test_coverage_matches_node_oracle_for_any_batch_size() {
        let (tree, entries) = random_tree(42, 2_000, QuadTreeConfig::default());
        let mut rng = StdRng::seed_from_u64(99);

        for _ in 0..20 {
            let query = random_query(&mut rng);
            let expected = node_oracle(tree.arena(), &query);

            for batch in [1, 7, 64, 32768] {
                let copy = tree.create_copy().unwrap();
                let mut iterator = RangeIterator::new(copy, Arc::clone(tree.store()), query, batch);
                let ids: Vec<RecordId> = drain(&mut iterator).iter().map(|d| d.id).collect();

                let unique: BTreeSet<RecordId> = ids.iter().copied().collect();
                assert_eq!(unique.len(), ids.len(), "duplicate ids for batch {}", batch);
                assert_eq!(unique, expected, "batch {}", batch);
            }

            // every record whose own bounds intersect is reported
            for (id, bounds) in &entries {
                if bounds.intersects(&query) {
                    assert!(expected.contains(id));
                }
            }
        }
    }

    #[test]
    fn test_ids_ascending_within_each_batch() {
        let (tree, _) = random_tree(5, 1_500, QuadTreeConfig::default());
        let query = Envelope::new(0.0, 0.0, 1000.0, 1000.0);

        for batch in [3, 50, 256] {
            let copy = tree.create_copy().unwrap();
            let mut iterator = RangeIterator::new(copy, Arc::clone(tree.store()), query, batch);
            let ids: Vec<RecordId> = drain(&mut iterator).iter().map(|d| d.id).collect();
            assert_eq!(ids.len(), 1_500);

            // every batch but the last is full
            for chunk in ids.chunks(batch) {
                assert!(chunk.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn test_close_makes_calls_fail() {
        let tree = sample_tree(QuadTreeConfig::default());
        let mut iterator = tree
            .create_iterator(&Envelope::new(0.0, 0.0, 10.0, 10.0), Arc::clone(tree.store()))
            .unwrap();
        assert!(iterator.handle_id().is_some());
        iterator.next_data().unwrap();
        assert_eq!(iterator.state(), IteratorState::Iterating);

        iterator.close();
        iterator.close();
        assert_eq!(iterator.state(), IteratorState::Closed);
        assert!(iterator.handle_id().is_none());
        assert!(iterator.has_next().unwrap_err().is_illegal_state());
        assert!(iterator.next_data().unwrap_err().is_illegal_state());
        assert_eq!(tree.open_iterator_count(), 0);
    }

    #[test]
    fn test_natural_exhaustion_unregisters() {
        let tree = sample_tree(QuadTreeConfig::default().with_batch_size(2));
        let mut iterator = tree
            .create_iterator(&Envelope::new(0.0, 0.0, 10.0, 10.0), Arc::clone(tree.store()))
            .unwrap();
        assert_eq!(tree.open_iterator_count(), 1);

        assert_eq!(drain(&mut iterator).len(), 7);
        assert!(iterator.is_closed());
        assert_eq!(tree.open_iterator_count(), 0);
        assert!(matches!(iterator.next_data(), Err(QixError::NoSuchElement)));
    }

    #[test]
    fn test_fault_mid_drain_closes_iterator() {
        let store = Arc::new(TestStore::failing_at(7, 5));
        let tree = IndexTree::new(
            Arc::new(sample_arena()),
            store.clone(),
            QuadTreeConfig::default().with_batch_size(2),
        )
        .unwrap();

        let mut iterator = tree
            .create_iterator(&Envelope::new(0.0, 0.0, 10.0, 10.0), store.clone())
            .unwrap();
        let results: Vec<QixResult<Data>> = iterator.by_ref().collect();

        let failure = results.last().unwrap().as_ref().unwrap_err();
        assert!(failure.is_io());
        assert!(results[..results.len() - 1].iter().all(|r| r.is_ok()));
        assert!(iterator.is_closed());
        assert_eq!(tree.open_iterator_count(), 0);
        assert!(iterator.has_next().unwrap_err().is_illegal_state());

        // the tree and other iterators are unaffected
        let mut other = tree
            .create_iterator(&Envelope::new(0.0, 0.0, 1.0, 1.0), store.clone())
            .unwrap();
        assert_eq!(drain(&mut other).len(), 5);
        assert!(!tree.is_closed());
        assert_eq!(store.close_calls(), 0);
    }

    #[test]
    fn test_std_iterator() {
        let tree = sample_tree(QuadTreeConfig::default());
        let iterator = tree
            .create_iterator(&Envelope::new(0.0, 0.0, 10.0, 10.0), Arc::clone(tree.store()))
            .unwrap();
        let ids: Vec<RecordId> = iterator.map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(tree.open_iterator_count(), 0);
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let arena = Arc::new(sample_arena());
        let mut iterator = standalone(arena, Envelope::new(0.0, 0.0, 10.0, 10.0), 0);
        assert_eq!(iterator.batch_size(), 1);
        assert_eq!(drain(&mut iterator).len(), 7);
    }

    #[test]
    fn test_concurrent_iterators_are_isolated() {
        let (tree, _) = random_tree(17, 3_000, QuadTreeConfig::default().with_batch_size(16));
        let queries = [
            Envelope::new(0.0, 0.0, 1000.0, 1000.0),
            Envelope::new(100.0, 100.0, 400.0, 300.0),
            Envelope::new(0.0, 0.0, 1000.0, 1000.0),
            Envelope::new(650.0, 20.0, 990.0, 500.0),
        ];
        let barrier = Arc::new(Barrier::new(queries.len()));

        let handles: Vec<_> = queries
            .iter()
            .map(|query| {
                let mut iterator = tree
                    .create_iterator(query, Arc::clone(tree.store()))
                    .unwrap();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut ids = BTreeSet::new();
                    while iterator.has_next().unwrap() {
                        assert!(ids.insert(iterator.next_data().unwrap().id));
                        // interleave with the other threads
                        if ids.len() % 64 == 0 {
                            thread::yield_now();
                        }
                    }
                    ids
                })
            })
            .collect();

        for (handle, query) in handles.into_iter().zip(queries.iter()) {
            let ids = handle.join().unwrap();
            assert_eq!(ids, node_oracle(tree.arena(), query));
        }
        assert_eq!(tree.open_iterator_count(), 0);
    }
}
