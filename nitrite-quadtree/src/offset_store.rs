//! Record offset lookup for query results.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use memmap2::Mmap;
use parking_lot::RwLock;

use crate::quadtree::qix_constants::{SHX_FILE_CODE, SHX_HEADER_LEN, SHX_RECORD_LEN};
use crate::quadtree::{QixError, QixResult, RecordId};

/// Maps a record id to the byte offset of the record in the geometry file.
///
/// Implementations are shared by every iterator of a tree, so lookups take
/// `&self` and must be safe to call from several threads at once.
pub trait RecordOffsetStore: Send + Sync {
    /// Returns the byte offset of record `id`.
    fn offset_of(&self, id: RecordId) -> QixResult<u64>;

    /// Number of records this store can resolve.
    fn record_count(&self) -> u32;

    /// Releases the underlying resources. A second call returns
    /// [`QixError::Closed`].
    fn close(&self) -> QixResult<()>;

    /// Checks whether [`RecordOffsetStore::close`] has been called.
    fn is_closed(&self) -> bool;
}

fn out_of_range(id: RecordId, count: u32) -> QixError {
    QixError::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("Record {} out of range (record count {})", id, count),
    ))
}

/// Offsets read from a shapefile `.shx` index through a read-only memory map.
///
/// Layout: a 100-byte header followed by one 8-byte entry per record holding
/// the record offset and content length, both big endian and counted in
/// 16-bit words.
pub struct ShxOffsetStore {
    map: RwLock<Option<Mmap>>,
    path: PathBuf,
    record_count: u32,
}

impl ShxOffsetStore {
    /// Opens and validates a `.shx` file. Only the header is inspected.
    pub fn open(path: impl AsRef<Path>) -> QixResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the map is read-only and the file is not modified while open.
        let map = unsafe { Mmap::map(&file)? };

        if map.len() < SHX_HEADER_LEN {
            return Err(QixError::Format(format!(
                "Offset file too short: {} bytes",
                map.len()
            )));
        }

        let file_code = read_be_i32(&map, 0);
        if file_code != SHX_FILE_CODE {
            return Err(QixError::Format(format!(
                "Invalid offset file code {}",
                file_code
            )));
        }

        let declared_len = read_be_i32(&map, 24) as i64 * 2;
        if declared_len > map.len() as i64 {
            return Err(QixError::Format(format!(
                "Offset file truncated: header declares {} bytes, found {}",
                declared_len,
                map.len()
            )));
        }

        let record_count = ((map.len() - SHX_HEADER_LEN) / SHX_RECORD_LEN) as u32;
        log::debug!(
            "Opened offset file {:?} with {} records",
            path,
            record_count
        );

        Ok(Self {
            map: RwLock::new(Some(map)),
            path: path.to_path_buf(),
            record_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content length of record `id` in bytes.
    pub fn content_length(&self, id: RecordId) -> QixResult<u64> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(QixError::Closed)?;
        if id >= self.record_count {
            return Err(out_of_range(id, self.record_count));
        }
        let pos = SHX_HEADER_LEN + id as usize * SHX_RECORD_LEN + 4;
        Ok(read_be_i32(map, pos) as u64 * 2)
    }
}

impl RecordOffsetStore for ShxOffsetStore {
    fn offset_of(&self, id: RecordId) -> QixResult<u64> {
        let guard = self.map.read();
        let map = guard.as_ref().ok_or(QixError::Closed)?;
        if id >= self.record_count {
            return Err(out_of_range(id, self.record_count));
        }
        let words = read_be_i32(map, SHX_HEADER_LEN + id as usize * SHX_RECORD_LEN);
        if words < 0 {
            return Err(QixError::Format(format!(
                "Negative offset for record {}",
                id
            )));
        }
        Ok(words as u64 * 2)
    }

    fn record_count(&self) -> u32 {
        self.record_count
    }

    fn close(&self) -> QixResult<()> {
        match self.map.write().take() {
            Some(_) => {
                log::debug!("Closed offset file {:?}", self.path);
                Ok(())
            }
            None => Err(QixError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.map.read().is_none()
    }
}

fn read_be_i32(bytes: &[u8], pos: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[pos..pos + 4]);
    i32::from_be_bytes(raw)
}

/// Offsets held in memory, for callers that already know them.
pub struct MemoryOffsetStore {
    offsets: Vec<u64>,
    closed: AtomicBool,
}

impl MemoryOffsetStore {
    pub fn new(offsets: Vec<u64>) -> Self {
        Self {
            offsets,
            closed: AtomicBool::new(false),
        }
    }

    /// `count` records of `record_len` bytes each, laid out back to back
    /// after a 100-byte file header.
    pub fn sequential(count: u32, record_len: u64) -> Self {
        let offsets = (0..count as u64)
            .map(|i| SHX_HEADER_LEN as u64 + i * record_len)
            .collect();
        Self::new(offsets)
    }
}

impl RecordOffsetStore for MemoryOffsetStore {
    fn offset_of(&self, id: RecordId) -> QixResult<u64> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QixError::Closed);
        }
        self.offsets
            .get(id as usize)
            .copied()
            .ok_or_else(|| out_of_range(id, self.offsets.len() as u32))
    }

    fn record_count(&self) -> u32 {
        self.offsets.len() as u32
    }

    fn close(&self) -> QixResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(QixError::Closed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
