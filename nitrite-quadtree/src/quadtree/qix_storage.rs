//! Storage layer for `.qix` quad-tree index files.
//!
//! Reading maps the file read-only and walks the node records once to build
//! the [`NodeArena`] topology. Record ids are never copied out of the map;
//! they are decoded when a traversal drains the node that owns them.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::node::{IdSpan, IdStore, IndexNode, NodeArena};
use super::qix_constants::{QIX_FILE_HEADER_LEN, QIX_INDEX_HEADER_LEN, QIX_INT_LEN, QIX_NODE_HEAD_LEN};
use super::qix_types::{
    ByteOrder, FileHeader, IndexHeader, NodeId, NodeRecordHead, QixError, QixResult,
};
use crate::envelope::Envelope;

/// A mapped `.qix` file whose header has been validated.
pub struct QixFile {
    map: Mmap,
    path: PathBuf,
    order: ByteOrder,
    one_based: bool,
    header: FileHeader,
}

/// Position and decoded head of one serialized node.
struct NodeRecord {
    head: NodeRecordHead,
    ids_start: usize,
    child_count: usize,
    children_start: usize,
}

impl NodeRecord {
    /// First byte after the whole record, children included.
    fn end(&self) -> usize {
        self.children_start + self.head.subtree_len as usize
    }
}

impl QixFile {
    /// Maps the file and reads its header. Node records are not touched yet.
    pub fn open(path: impl AsRef<Path>) -> QixResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the map is read-only and index files are not rewritten in place.
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < QIX_FILE_HEADER_LEN {
            return Err(QixError::Format(format!(
                "Index file too short: {} bytes",
                map.len()
            )));
        }

        // the marker decides the byte order of everything else, so the
        // signature block is decoded with a fixed one first
        let index_header: IndexHeader =
            ByteOrder::BigEndian.decode(&map[..QIX_INDEX_HEADER_LEN])?;
        index_header.validate()?;
        let (order, one_based) = ByteOrder::from_marker(index_header.byte_order)?;

        let header: FileHeader = order.decode(&map[QIX_INDEX_HEADER_LEN..QIX_FILE_HEADER_LEN])?;
        if header.record_count < 0 || header.max_depth < 0 {
            return Err(QixError::Format(format!(
                "Invalid header: {} records, max depth {}",
                header.record_count, header.max_depth
            )));
        }

        log::debug!(
            "Opened index {:?}: {:?}, {} records, max depth {}",
            path,
            order,
            header.record_count,
            header.max_depth
        );

        Ok(Self {
            map,
            path: path.to_path_buf(),
            order,
            one_based,
            header,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// True for legacy files that store 1-based record ids.
    pub fn is_legacy(&self) -> bool {
        self.one_based
    }

    pub fn record_count(&self) -> u32 {
        self.header.record_count as u32
    }

    pub fn max_depth(&self) -> u32 {
        self.header.max_depth as u32
    }

    /// Builds the node topology. The map moves into the arena and stays
    /// alive as long as any tree or traversal references it.
    pub fn load(self) -> QixResult<NodeArena> {
        let mut nodes: Vec<IndexNode> = Vec::new();
        let mut pending: Vec<(usize, Option<NodeId>)> = vec![(QIX_FILE_HEADER_LEN, None)];

        while let Some((pos, parent)) = pending.pop() {
            let record = self.read_record(pos)?;
            let node_id = nodes.len();
            nodes.push(IndexNode {
                bounds: Envelope::new(
                    record.head.min_x,
                    record.head.min_y,
                    record.head.max_x,
                    record.head.max_y,
                ),
                ids: IdSpan {
                    start: record.ids_start,
                    len: record.head.id_count as usize,
                },
                children: Vec::with_capacity(record.child_count),
                parent,
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(node_id);
            }

            let mut child_positions = Vec::with_capacity(record.child_count);
            let mut child_pos = record.children_start;
            for _ in 0..record.child_count {
                let child = self.read_record(child_pos)?;
                child_positions.push(child_pos);
                child_pos = child.end();
            }
            if child_pos != record.end() {
                return Err(QixError::Format(format!(
                    "Children of node at {} span {} bytes, header declares {}",
                    pos,
                    child_pos - record.children_start,
                    record.head.subtree_len
                )));
            }

            // reversed so siblings come off the stack in file order
            for child_pos in child_positions.into_iter().rev() {
                pending.push((child_pos, Some(node_id)));
            }
        }

        log::debug!("Loaded {} nodes from {:?}", nodes.len(), self.path);

        let record_count = self.record_count();
        let max_depth = self.max_depth();
        let ids = IdStore::Mapped {
            map: self.map,
            order: self.order,
            one_based: self.one_based,
        };
        Ok(NodeArena::from_parts(nodes, ids, record_count, max_depth))
    }

    fn read_record(&self, pos: usize) -> QixResult<NodeRecord> {
        let len = self.map.len();
        let truncated = |what: &str| {
            QixError::Format(format!("Truncated node at {}: missing {}", pos, what))
        };

        let head_end = pos.checked_add(QIX_NODE_HEAD_LEN).ok_or_else(|| truncated("head"))?;
        if head_end > len {
            return Err(truncated("head"));
        }
        let head: NodeRecordHead = self.order.decode(&self.map[pos..head_end])?;
        if head.id_count < 0 || head.subtree_len < 0 {
            return Err(QixError::Format(format!(
                "Corrupted node at {}: {} ids, subtree length {}",
                pos, head.id_count, head.subtree_len
            )));
        }

        let ids_end = head_end + head.id_count as usize * QIX_INT_LEN;
        if ids_end + QIX_INT_LEN > len {
            return Err(truncated("ids"));
        }
        let child_count = self.order.read_i32(&self.map[ids_end..]);
        if child_count < 0 {
            return Err(QixError::Format(format!(
                "Corrupted node at {}: {} children",
                pos, child_count
            )));
        }

        let record = NodeRecord {
            head,
            ids_start: head_end,
            child_count: child_count as usize,
            children_start: ids_end + QIX_INT_LEN,
        };
        if record.end() > len {
            return Err(truncated("children"));
        }
        Ok(record)
    }
}

/// Serializes a [`NodeArena`] into the `.qix` format.
pub struct QixWriter;

impl QixWriter {
    /// Writes `arena` to `path` in the given byte order, replacing any
    /// existing file.
    pub fn write(path: impl AsRef<Path>, arena: &NodeArena, order: ByteOrder) -> QixResult<()> {
        let path = path.as_ref();
        let subtree_lens = Self::subtree_lengths(arena)?;

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&order.encode(&IndexHeader::new(order))?)?;
        out.write_all(&order.encode(&FileHeader {
            record_count: to_i32(arena.record_count() as usize, "record count")?,
            max_depth: to_i32(arena.max_depth() as usize, "max depth")?,
        })?)?;

        let mut buffer = Vec::new();
        let mut pending = vec![arena.root()];
        while let Some(node) = pending.pop() {
            let bounds = arena.bounds(node);
            let head = NodeRecordHead {
                subtree_len: subtree_lens[node],
                min_x: bounds.min_x,
                min_y: bounds.min_y,
                max_x: bounds.max_x,
                max_y: bounds.max_y,
                id_count: to_i32(arena.id_count(node), "id count")?,
            };

            buffer.clear();
            buffer.extend_from_slice(&order.encode(&head)?);
            for id in arena.ids(node) {
                order.put_i32(id as i32, &mut buffer);
            }
            let children = arena.children(node);
            order.put_i32(to_i32(children.len(), "child count")?, &mut buffer);
            out.write_all(&buffer)?;

            pending.extend(children.iter().rev().copied());
        }

        out.flush()?;
        log::debug!("Wrote {} nodes to {:?}", arena.len(), path);
        Ok(())
    }

    /// Byte length of every node's serialized children, indexed by node.
    fn subtree_lengths(arena: &NodeArena) -> QixResult<Vec<i32>> {
        let mut record_lens = vec![0usize; arena.len()];
        let mut subtree_lens = vec![0i32; arena.len()];

        // parents precede their children, so a reverse sweep is bottom-up
        for node in (0..arena.len()).rev() {
            let children: usize = arena.children(node).iter().map(|&c| record_lens[c]).sum();
            subtree_lens[node] = to_i32(children, "subtree length")?;
            record_lens[node] =
                QIX_NODE_HEAD_LEN + arena.id_count(node) * QIX_INT_LEN + QIX_INT_LEN + children;
        }
        Ok(subtree_lens)
    }
}

fn to_i32(value: usize, what: &str) -> QixResult<i32> {
    i32::try_from(value)
        .map_err(|_| QixError::InvalidOperation(format!("{} {} does not fit the format", what, value)))
}
