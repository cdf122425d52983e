//! Core types shared across the quad-tree index:
//! - Error types and result types
//! - Query result tuples
//! - Byte order handling and fixed-width header records
//! - Statistics structures

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use super::qix_constants::{
    ORDER_BIG, ORDER_LEGACY_BIG, ORDER_LEGACY_LITTLE, ORDER_LITTLE, ORDER_NATIVE, QIX_SIGNATURE,
    QIX_VERSION,
};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading or querying a quad-tree index
#[derive(Debug, Error)]
pub enum QixError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid index format: {0}")]
    Format(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("No more elements")]
    NoSuchElement,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Index is closed")]
    Closed,
}

impl QixError {
    /// Returns true for failures of the backing files (unavailable, truncated or corrupted).
    pub fn is_io(&self) -> bool {
        matches!(self, QixError::Io(_) | QixError::Format(_))
    }

    /// Returns true for programmer errors such as using a closed iterator.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, QixError::IllegalState(_))
    }
}

/// Result type for quad-tree operations
pub type QixResult<T> = Result<T, QixError>;

/// Record id as stored in the index (0-based position in the geometry file)
pub type RecordId = u32;

/// Index of a node inside a [`NodeArena`](super::node::NodeArena)
pub type NodeId = usize;

// ============================================================================
// Query Results
// ============================================================================

/// A single range query hit: the record id and the byte offset of the
/// record in the geometry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Data {
    pub id: RecordId,
    pub offset: u64,
}

impl Data {
    pub fn new(id: RecordId, offset: u64) -> Self {
        Self { id, offset }
    }

    /// 1-based record number as used by shapefile record headers.
    pub fn record_number(&self) -> u32 {
        self.id + 1
    }
}

// ============================================================================
// Byte Order
// ============================================================================

/// Byte order of the integer and floating point fields in a `.qix` file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// Byte order of the running platform
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Decodes the header marker. The second value is true for legacy files,
    /// which store 1-based record ids.
    pub fn from_marker(marker: i8) -> QixResult<(ByteOrder, bool)> {
        match marker {
            ORDER_BIG => Ok((ByteOrder::BigEndian, false)),
            ORDER_LITTLE => Ok((ByteOrder::LittleEndian, false)),
            ORDER_NATIVE => Ok((ByteOrder::native(), false)),
            ORDER_LEGACY_BIG => Ok((ByteOrder::BigEndian, true)),
            ORDER_LEGACY_LITTLE => Ok((ByteOrder::LittleEndian, true)),
            other => Err(QixError::Format(format!("Unknown byte order marker {}", other))),
        }
    }

    /// Header marker written for this byte order
    pub fn marker(self) -> i8 {
        match self {
            ByteOrder::BigEndian => ORDER_BIG,
            ByteOrder::LittleEndian => ORDER_LITTLE,
        }
    }

    pub(crate) fn read_i32(self, bytes: &[u8]) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        match self {
            ByteOrder::BigEndian => i32::from_be_bytes(raw),
            ByteOrder::LittleEndian => i32::from_le_bytes(raw),
        }
    }

    pub(crate) fn put_i32(self, value: i32, out: &mut Vec<u8>) {
        match self {
            ByteOrder::BigEndian => out.extend_from_slice(&value.to_be_bytes()),
            ByteOrder::LittleEndian => out.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Decodes a fixed-width record (no length prefixes, fixed-size integers).
    pub(crate) fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> QixResult<T> {
        let decoded = match self {
            ByteOrder::BigEndian => bincode::serde::decode_from_slice(
                bytes,
                bincode::config::standard()
                    .with_big_endian()
                    .with_fixed_int_encoding(),
            ),
            ByteOrder::LittleEndian => bincode::serde::decode_from_slice(
                bytes,
                bincode::config::standard()
                    .with_little_endian()
                    .with_fixed_int_encoding(),
            ),
        };
        decoded
            .map(|(value, _)| value)
            .map_err(|e| QixError::Serialization(e.to_string()))
    }

    /// Encodes a fixed-width record in this byte order.
    pub(crate) fn encode<T: Serialize>(self, value: &T) -> QixResult<Vec<u8>> {
        let encoded = match self {
            ByteOrder::BigEndian => bincode::serde::encode_to_vec(
                value,
                bincode::config::standard()
                    .with_big_endian()
                    .with_fixed_int_encoding(),
            ),
            ByteOrder::LittleEndian => bincode::serde::encode_to_vec(
                value,
                bincode::config::standard()
                    .with_little_endian()
                    .with_fixed_int_encoding(),
            ),
        };
        encoded.map_err(|e| QixError::Serialization(e.to_string()))
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        ByteOrder::BigEndian
    }
}

// ============================================================================
// Fixed-width Records
// ============================================================================

/// The 8-byte block at the start of every `.qix` file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHeader {
    pub signature: [u8; 3],
    pub byte_order: i8,
    pub version: u8,
    pub reserved: [u8; 3],
}

impl IndexHeader {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            signature: QIX_SIGNATURE,
            byte_order: order.marker(),
            version: QIX_VERSION,
            reserved: [0; 3],
        }
    }

    pub fn validate(&self) -> QixResult<()> {
        if self.signature != QIX_SIGNATURE {
            return Err(QixError::Format("Invalid file format (bad signature)".into()));
        }
        if self.version != QIX_VERSION {
            return Err(QixError::Format(format!(
                "Unsupported file format version {}",
                self.version
            )));
        }
        Ok(())
    }
}

/// Dataset-level fields that follow the index header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub record_count: i32,
    pub max_depth: i32,
}

/// Leading fixed-width part of a serialized node. It is followed by
/// `id_count` ids, the child count and then the child records, whose total
/// byte length is `subtree_len`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRecordHead {
    pub subtree_len: i32,
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub id_count: i32,
}

// ============================================================================
// Statistics
// ============================================================================

/// Shape of a loaded tree plus live query state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadTreeStats {
    pub node_count: u64,
    pub id_count: u64,
    pub depth: u32,
    pub record_count: u32,
    pub max_depth: u32,
    pub open_iterators: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quadtree::qix_constants::{QIX_INDEX_HEADER_LEN, QIX_NODE_HEAD_LEN};

    #[test]
    fn test_marker_round_trip() {
        for order in [ByteOrder::BigEndian, ByteOrder::LittleEndian] {
            let (decoded, legacy) = ByteOrder::from_marker(order.marker()).unwrap();
            assert_eq!(decoded, order);
            assert!(!legacy);
        }
    }

    #[test]
    fn test_legacy_markers() {
        assert_eq!(
            ByteOrder::from_marker(-2).unwrap(),
            (ByteOrder::BigEndian, true)
        );
        assert_eq!(
            ByteOrder::from_marker(-1).unwrap(),
            (ByteOrder::LittleEndian, true)
        );
        assert!(matches!(
            ByteOrder::from_marker(7),
            Err(QixError::Format(_))
        ));
    }

    #[test]
    fn test_fixed_width_encoding_sizes() {
        let header = IndexHeader::new(ByteOrder::BigEndian);
        let bytes = ByteOrder::BigEndian.encode(&header).unwrap();
        assert_eq!(bytes.len(), QIX_INDEX_HEADER_LEN);
        assert_eq!(&bytes[..3], b"SQT");
        assert_eq!(bytes[3], 2);

        let head = NodeRecordHead {
            subtree_len: 0,
            min_x: 1.0,
            min_y: 2.0,
            max_x: 3.0,
            max_y: 4.0,
            id_count: 5,
        };
        let bytes = ByteOrder::LittleEndian.encode(&head).unwrap();
        assert_eq!(bytes.len(), QIX_NODE_HEAD_LEN);
        assert_eq!(&bytes[36..40], &5i32.to_le_bytes());
    }

    #[test]
    fn test_big_endian_layout_matches_manual_encoding() {
        let header = FileHeader {
            record_count: 116,
            max_depth: 10,
        };
        let bytes = ByteOrder::BigEndian.encode(&header).unwrap();
        let mut expected = Vec::new();
        ByteOrder::BigEndian.put_i32(116, &mut expected);
        ByteOrder::BigEndian.put_i32(10, &mut expected);
        assert_eq!(bytes, expected);

        let decoded: FileHeader = ByteOrder::BigEndian.decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(ByteOrder::BigEndian.read_i32(&bytes[4..]), 10);
    }

    #[test]
    fn test_header_validation() {
        assert!(IndexHeader::new(ByteOrder::LittleEndian).validate().is_ok());

        let mut bad = IndexHeader::new(ByteOrder::BigEndian);
        bad.signature = *b"XYZ";
        assert!(matches!(bad.validate(), Err(QixError::Format(_))));

        let mut future = IndexHeader::new(ByteOrder::BigEndian);
        future.version = 9;
        assert!(future.validate().is_err());
    }

    #[test]
    fn test_data_record_number() {
        let data = Data::new(0, 100);
        assert_eq!(data.record_number(), 1);
        let json = serde_json::to_string(&data).unwrap();
        let back: Data = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_error_classification() {
        let io = QixError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(io.is_io());
        assert!(!io.is_illegal_state());
        assert!(QixError::Format("bad".into()).is_io());
        assert!(QixError::IllegalState("closed".into()).is_illegal_state());
        assert_eq!(QixError::NoSuchElement.to_string(), "No more elements");
    }
}
