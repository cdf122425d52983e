//! Read-only quad-tree index over record bounding boxes.
//!
//! The tree is built once, offline, either with [`QuadTreeBuilder`] or by
//! loading a `.qix` file, and never changes afterwards. Queries walk the
//! shared topology through private traversal copies:
//! - Node topology stored once in an arena, addressed by index
//! - Parent links for iterative depth-first traversal without a stack
//! - Bounded refill batches, so memory per query does not grow with the data
//! - A registry of live iterators that tree shutdown force-closes

pub mod qix_constants;
pub mod qix_types;
pub mod node;
pub mod qix_storage;
mod builder;
mod tree;
mod range_iterator;
mod range_collection;

pub use qix_types::{
    ByteOrder, Data, FileHeader, IndexHeader, NodeId, NodeRecordHead, QixError, QixResult,
    QuadTreeStats, RecordId,
};
pub use qix_constants::DEFAULT_BATCH_SIZE;
pub use node::{IndexNode, NodeArena, NodeGraphCopy};
pub use qix_storage::{QixFile, QixWriter};
pub use builder::QuadTreeBuilder;
pub use tree::IndexTree;
pub use range_iterator::{IteratorState, RangeIterator};
pub use range_collection::RangeCollection;
