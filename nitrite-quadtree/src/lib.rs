//! # Nitrite Quadtree - Read-only Spatial Index for Shapefile Data
//!
//! This crate answers range queries ("every record whose bounding box
//! intersects an envelope") over a quad-tree built once, offline, without
//! loading the whole index or the dataset into memory.
//!
//! ## Features
//!
//! - **Disk-Backed**: `.qix` index files and `.shx` offset files are memory-mapped
//! - **Bounded Memory**: each query buffers at most one batch of ids
//! - **Isolated Queries**: any number of iterators walk the same tree concurrently
//! - **Clean Shutdown**: closing a tree force-closes its open iterators and releases the offset store once
//! - **Offline Builder**: build a tree from `(id, bounds)` pairs and write it as `.qix`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nitrite_quadtree::{Envelope, IndexTree, QuadTreeConfig, ShxOffsetStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(ShxOffsetStore::open("streams.shx")?);
//! let tree = IndexTree::open("streams.qix", store, QuadTreeConfig::default())?;
//!
//! let query = Envelope::from_coords(585000.0, 610000.0, 4910000.0, 4930000.0);
//! let results = tree.search(query)?;
//! println!("{} records", results.size()?);
//!
//! for data in results.iterator()? {
//!     let data = data?;
//!     println!("record {} at byte {}", data.record_number(), data.offset);
//! }
//!
//! tree.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Building an Index
//!
//! ```rust,ignore
//! use nitrite_quadtree::{Envelope, QuadTreeBuilder, QuadTreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = QuadTreeBuilder::new(QuadTreeConfig::default());
//! builder.insert(0, Envelope::new(0.0, 0.0, 10.0, 10.0))?;
//! builder.insert(1, Envelope::new(20.0, 20.0, 30.0, 30.0))?;
//! builder.write_to("points.qix")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod envelope;
pub mod offset_store;
pub mod quadtree;

#[cfg(test)]
mod test_support;

pub use config::QuadTreeConfig;
pub use envelope::Envelope;
pub use offset_store::{MemoryOffsetStore, RecordOffsetStore, ShxOffsetStore};
pub use quadtree::{
    ByteOrder, Data, IndexNode, IndexTree, IteratorState, NodeArena, NodeGraphCopy, NodeId,
    QixError, QixFile, QixResult, QixWriter, QuadTreeBuilder, QuadTreeStats, RangeCollection,
    RangeIterator, RecordId, DEFAULT_BATCH_SIZE,
};
