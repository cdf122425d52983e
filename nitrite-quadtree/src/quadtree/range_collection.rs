use std::sync::Arc;

use super::qix_types::{QixResult, RecordId};
use super::range_iterator::RangeIterator;
use super::tree::IndexTree;
use crate::envelope::Envelope;
use crate::offset_store::RecordOffsetStore;

/// Container view over the results of one range query.
///
/// Holds no iteration state: every call to [`RangeCollection::iterator`]
/// starts a fresh traversal, and [`RangeCollection::size`] counts by
/// draining a throwaway iterator each time.
#[derive(Clone)]
pub struct RangeCollection {
    tree: IndexTree,
    store: Arc<dyn RecordOffsetStore>,
    envelope: Envelope,
}

impl RangeCollection {
    pub fn new(tree: IndexTree, store: Arc<dyn RecordOffsetStore>, envelope: Envelope) -> Self {
        Self {
            tree,
            store,
            envelope,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    /// A new iterator over the matching records, registered with the tree.
    pub fn iterator(&self) -> QixResult<RangeIterator> {
        self.tree
            .create_iterator(&self.envelope, Arc::clone(&self.store))
    }

    /// Number of matching records. Walks the whole result every time.
    pub fn size(&self) -> QixResult<usize> {
        self.with_iterator(|iterator| {
            let mut count = 0;
            while iterator.has_next()? {
                iterator.next_data()?;
                count += 1;
            }
            Ok(count)
        })
    }

    pub fn is_empty(&self) -> QixResult<bool> {
        self.with_iterator(|iterator| Ok(!iterator.has_next()?))
    }

    /// Ids of all matching records, in traversal order.
    pub fn ids(&self) -> QixResult<Vec<RecordId>> {
        self.with_iterator(|iterator| {
            let mut ids = Vec::new();
            while iterator.has_next()? {
                ids.push(iterator.next_data()?.id);
            }
            Ok(ids)
        })
    }

    /// Closes the underlying tree.
    pub fn close(&self) {
        self.tree.close();
    }

    /// Runs `f` on a throwaway iterator and closes it afterwards, whether
    /// `f` succeeded or not.
    fn with_iterator<T>(
        &self,
        f: impl FnOnce(&mut RangeIterator) -> QixResult<T>,
    ) -> QixResult<T> {
        let mut iterator = self.iterator()?;
        let result = f(&mut iterator);
        iterator.close();
        result
    }
}

impl std::fmt::Debug for RangeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeCollection")
            .field("envelope", &self.envelope)
            .finish()
    }
}
