//! Constants for the quad-tree index and its on-disk formats.

/// Maximum number of record ids collected per traversal refill
pub const DEFAULT_BATCH_SIZE: usize = 32768;

/// Records per leaf used when the builder derives a maximum depth
pub const DEFAULT_LEAF_SIZE: usize = 16;

/// Lower bound for a derived maximum depth
pub const MIN_DERIVED_DEPTH: u32 = 10;

/// Fraction of a node's longer side covered by each half when splitting.
/// Halves overlap so records straddling the midline can still descend.
pub const DEFAULT_SPLIT_RATIO: f64 = 0.55;

/// Magic bytes at the start of a `.qix` file
pub const QIX_SIGNATURE: [u8; 3] = *b"SQT";

/// `.qix` format version
pub const QIX_VERSION: u8 = 1;

/// Size of the signature/byte-order/version block
pub const QIX_INDEX_HEADER_LEN: usize = 8;

/// Index header plus record count and max depth
pub const QIX_FILE_HEADER_LEN: usize = 16;

/// subtree length + 4 coordinates + id count
pub const QIX_NODE_HEAD_LEN: usize = 40;

/// Size of a single serialized id or count field
pub const QIX_INT_LEN: usize = 4;

/// Byte-order markers stored in the index header
pub const ORDER_LEGACY_BIG: i8 = -2;
pub const ORDER_LEGACY_LITTLE: i8 = -1;
pub const ORDER_NATIVE: i8 = 0;
pub const ORDER_LITTLE: i8 = 1;
pub const ORDER_BIG: i8 = 2;

/// `.shx` header size in bytes
pub const SHX_HEADER_LEN: usize = 100;

/// `.shx` record size: offset + content length, both in 16-bit words
pub const SHX_RECORD_LEN: usize = 8;

/// Shapefile file code stored big-endian at the start of a `.shx`
pub const SHX_FILE_CODE: i32 = 9994;
