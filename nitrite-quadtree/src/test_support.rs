//! Shared fixtures for unit tests.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;

use crate::config::QuadTreeConfig;
use crate::envelope::Envelope;
use crate::offset_store::{MemoryOffsetStore, RecordOffsetStore};
use crate::quadtree::node::{IdSpan, IdStore, IndexNode, NodeArena};
use crate::quadtree::{IndexTree, QixError, QixResult, RecordId};

// Setup only one time throughout the project.
// It will take effect during test, project wide
#[ctor::ctor]
fn init() {
    colog::init();
}

/// Writes a `.shx` file with the given `(offset, content length)` pairs,
/// both in bytes.
pub(crate) fn write_shx(path: &Path, records: &[(u64, u64)]) -> io::Result<()> {
    let file_len = 100 + records.len() * 8;
    let mut bytes = vec![0u8; 100];
    bytes[0..4].copy_from_slice(&9994i32.to_be_bytes());
    bytes[24..28].copy_from_slice(&((file_len / 2) as i32).to_be_bytes());
    bytes[28..32].copy_from_slice(&1000i32.to_le_bytes());
    for (offset, len) in records {
        bytes.extend_from_slice(&((offset / 2) as i32).to_be_bytes());
        bytes.extend_from_slice(&((len / 2) as i32).to_be_bytes());
    }
    let mut file = File::create(path)?;
    file.write_all(&bytes)
}

/// Four nodes, seven ids:
///
/// ```text
/// 0 (0,0)-(10,10)  ids [6, 0]
/// ├── 1 (0,0)-(5,5)  ids [4, 1]
/// │   └── 2 (0,0)-(2,2)  ids [2]
/// └── 3 (6,6)-(10,10)  ids [5, 3]
/// ```
pub(crate) fn sample_arena() -> NodeArena {
    let node = |bounds: Envelope, start: usize, len: usize, children: Vec<usize>, parent| IndexNode {
        bounds,
        ids: IdSpan { start, len },
        children,
        parent,
    };
    let nodes = vec![
        node(Envelope::new(0.0, 0.0, 10.0, 10.0), 0, 2, vec![1, 3], None),
        node(Envelope::new(0.0, 0.0, 5.0, 5.0), 2, 2, vec![2], Some(0)),
        node(Envelope::new(0.0, 0.0, 2.0, 2.0), 4, 1, vec![], Some(1)),
        node(Envelope::new(6.0, 6.0, 10.0, 10.0), 5, 2, vec![], Some(0)),
    ];
    NodeArena::from_parts(nodes, IdStore::Owned(vec![6, 0, 4, 1, 2, 5, 3]), 7, 3)
}

/// [`sample_arena`] over an in-memory store: record `i` sits at `100 + 10 * i`.
pub(crate) fn sample_tree(config: QuadTreeConfig) -> IndexTree {
    let store = Arc::new(MemoryOffsetStore::sequential(7, 10));
    IndexTree::new(Arc::new(sample_arena()), store, config).unwrap()
}

/// `count` small boxes (some degenerate to points) inside (0,0)-(1000,1000),
/// with ids `0..count` in order.
pub(crate) fn random_entries(rng: &mut StdRng, count: u32) -> Vec<(RecordId, Envelope)> {
    (0..count)
        .map(|id| {
            let x = rng.gen_range(0.0..990.0);
            let y = rng.gen_range(0.0..990.0);
            let (w, h) = if rng.gen_bool(0.2) {
                (0.0, 0.0)
            } else {
                (rng.gen_range(0.0..10.0), rng.gen_range(0.0..10.0))
            };
            (id, Envelope::new(x, y, x + w, y + h))
        })
        .collect()
}

pub(crate) fn random_query(rng: &mut StdRng) -> Envelope {
    Envelope::from_coords(
        rng.gen_range(0.0..1000.0),
        rng.gen_range(0.0..1000.0),
        rng.gen_range(0.0..1000.0),
        rng.gen_range(0.0..1000.0),
    )
}

/// Ids stored in every node whose bounds intersect `query`.
pub(crate) fn node_oracle(arena: &NodeArena, query: &Envelope) -> BTreeSet<RecordId> {
    (0..arena.len())
        .filter(|&node| arena.bounds(node).intersects(query))
        .flat_map(|node| arena.ids(node).collect::<Vec<_>>())
        .collect()
}

/// Offset store that counts `close` calls and can fail on one record.
pub(crate) struct TestStore {
    offsets: MemoryOffsetStore,
    fail_on: Option<RecordId>,
    close_calls: AtomicUsize,
}

impl TestStore {
    pub(crate) fn new(count: u32) -> Self {
        Self {
            offsets: MemoryOffsetStore::sequential(count, 10),
            fail_on: None,
            close_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing_at(count: u32, id: RecordId) -> Self {
        Self {
            fail_on: Some(id),
            ..Self::new(count)
        }
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl RecordOffsetStore for TestStore {
    fn offset_of(&self, id: RecordId) -> QixResult<u64> {
        if self.fail_on == Some(id) {
            return Err(QixError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("injected failure for record {}", id),
            )));
        }
        self.offsets.offset_of(id)
    }

    fn record_count(&self) -> u32 {
        self.offsets.record_count()
    }

    fn close(&self) -> QixResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.offsets.close()
    }

    fn is_closed(&self) -> bool {
        self.offsets.is_closed()
    }
}
