use crate::quadtree::qix_constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_LEAF_SIZE, DEFAULT_SPLIT_RATIO, MIN_DERIVED_DEPTH,
};
use crate::quadtree::{ByteOrder, QixError, QixResult};

/// Tuning parameters for building and querying a quad-tree index.
///
/// Purpose: keeps every knob of the index in one cloneable value that is
/// handed to the builder, the `.qix` writer and the tree itself.
///
/// Defaults:
/// - Batch size: 32768 record ids per traversal refill
/// - Max depth: derived from the record count (see [`QuadTreeConfig::effective_max_depth`])
/// - Leaf size: 16 records, only used to derive the depth
/// - Split ratio: 0.55, so sibling quadrants overlap slightly
/// - Byte order: big endian when writing `.qix` files
///
/// Usage: start from `QuadTreeConfig::default()` and chain the `with_*`
/// setters, then call [`QuadTreeConfig::validate`] (the builder and the
/// tree constructors do this for you).
#[derive(Debug, Clone, PartialEq)]
pub struct QuadTreeConfig {
    batch_size: usize,
    max_depth: Option<u32>,
    leaf_size: usize,
    split_ratio: f64,
    byte_order: ByteOrder,
}

impl QuadTreeConfig {
    /// Creates a configuration with default values.
    #[inline]
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_depth: None,
            leaf_size: DEFAULT_LEAF_SIZE,
            split_ratio: DEFAULT_SPLIT_RATIO,
            byte_order: ByteOrder::BigEndian,
        }
    }

    /// Returns the maximum number of ids collected per refill.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Sets the maximum number of ids collected per refill.
    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Returns the explicit maximum depth, if any.
    #[inline]
    pub fn max_depth(&self) -> Option<u32> {
        self.max_depth
    }

    /// Fixes the maximum depth of the built tree. The root counts as level 1.
    #[inline]
    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    #[inline]
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Sets the number of records per leaf used to derive the depth.
    #[inline]
    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size;
        self
    }

    #[inline]
    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    /// Sets the fraction of the longer side each half covers on a split.
    #[inline]
    pub fn with_split_ratio(mut self, split_ratio: f64) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Sets the byte order used when writing `.qix` files.
    #[inline]
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Maximum depth to build for `record_count` records.
    ///
    /// Without an explicit depth, grows the depth until a fully developed
    /// tree offers one leaf per `leaf_size` records, and never goes below
    /// ten levels.
    pub fn effective_max_depth(&self, record_count: usize) -> u32 {
        if let Some(depth) = self.max_depth {
            return depth;
        }
        let leaf_size = self.leaf_size.max(1);
        let mut depth = 1u32;
        let mut nodes = 1usize;
        while nodes.saturating_mul(leaf_size) < record_count {
            depth += 1;
            nodes = nodes.saturating_mul(4);
        }
        depth.max(MIN_DERIVED_DEPTH)
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> QixResult<()> {
        if self.batch_size == 0 {
            return Err(QixError::InvalidOperation(
                "Batch size must be greater than zero".into(),
            ));
        }
        if self.max_depth == Some(0) {
            return Err(QixError::InvalidOperation(
                "Max depth must be at least 1".into(),
            ));
        }
        if !(self.split_ratio > 0.0 && self.split_ratio <= 1.0) {
            return Err(QixError::InvalidOperation(format!(
                "Split ratio must be in (0, 1], got {}",
                self.split_ratio
            )));
        }
        Ok(())
    }
}

impl Default for QuadTreeConfig {
    fn default() -> Self {
        Self::new()
    }
}
