//! Sparse offset index over a segment file.
//!
//! The segment appends one entry per 500 records, so lookups binary-search
//! the index for a floor position and the segment scans forward from there.
//!
//! ```text
//! entry (big-endian, 8 bytes):
//!   logical_off: u32   segment-local offset of the record at memory_pos
//!   memory_pos:  u32   byte position of that record's header in the .log file
//! ```
//!
//! Lock discipline: writes and the flush+remap step take the exclusive lock;
//! searches downgrade to the shared lock, under which the mmap slice is
//! guaranteed stable. The mapping is only ever re-established under the
//! exclusive lock, so shared-lock readers can safely index into it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::warn;

use crate::error::{Error, Result};
use crate::mmap::MmapReader;

/// LogicalOff(4) + MemoryPos(4) = 8 bytes
pub const ENTRY_WIDTH: usize = 8;

/// The index writer buffers this many bytes (five entries) before it spills
/// to the file on its own.
const WRITER_BUFFER_SIZE: usize = 5 * ENTRY_WIDTH;

/// One sparse-index entry. The all-zero entry doubles as the "nothing
/// indexed at or below the target" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub logical_off: u32,
    pub memory_pos: u32,
}

impl IndexEntry {
    /// Encode into the first `ENTRY_WIDTH` bytes of `dst`.
    pub fn encode(&self, dst: &mut [u8]) {
        dst[0..4].copy_from_slice(&self.logical_off.to_be_bytes());
        dst[4..8].copy_from_slice(&self.memory_pos.to_be_bytes());
    }

    /// Decode from the first `ENTRY_WIDTH` bytes of `src`.
    pub fn decode(src: &[u8]) -> Self {
        Self {
            logical_off: u32::from_be_bytes(src[0..4].try_into().unwrap()),
            memory_pos: u32::from_be_bytes(src[4..8].try_into().unwrap()),
        }
    }
}

struct IndexInner {
    writer: BufWriter<File>,
    file: File,
    reader: MmapReader,
}

impl IndexInner {
    fn read_entry(&self, idx: usize) -> Result<IndexEntry> {
        let chunk = self.reader.read_at(idx * ENTRY_WIDTH, ENTRY_WIDTH)?;
        Ok(IndexEntry::decode(chunk))
    }
}

pub struct SparseIndex {
    inner: RwLock<IndexInner>,
}

impl SparseIndex {
    /// Open or create the index file at `path`.
    ///
    /// A file length that is not a multiple of the entry width is a torn
    /// trailing write; the partial entry is dropped by truncation before any
    /// reader maps the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .read(true)
            .create(true)
            .open(path)?;

        let size = file.metadata()?.len();
        let remainder = size % ENTRY_WIDTH as u64;
        if remainder != 0 {
            warn!(
                path = %path.display(),
                size,
                "truncating torn index tail of {remainder} bytes"
            );
            file.set_len(size - remainder)?;
        }

        let writer = BufWriter::with_capacity(WRITER_BUFFER_SIZE, file.try_clone()?);
        let reader = MmapReader::open(path)?;

        Ok(Self {
            inner: RwLock::new(IndexInner {
                writer,
                file,
                reader,
            }),
        })
    }

    /// Append an entry through the buffered writer.
    pub fn write_entry(&self, entry: IndexEntry) -> Result<()> {
        let mut inner = self.inner.write();

        let mut buf = [0u8; ENTRY_WIDTH];
        entry.encode(&mut buf);
        inner.writer.write_all(&buf)?;
        Ok(())
    }

    /// Floor search: the entry with the largest `logical_off` that is `<=
    /// target`, or the zero sentinel when no entry qualifies.
    ///
    /// The exclusive phase flushes the writer and remaps the reader so the
    /// search sees every entry acknowledged before this call; the search
    /// itself runs under the shared lock.
    pub fn find_nearest(&self, target: u32) -> Result<IndexEntry> {
        let mut inner = self.inner.write();
        inner.writer.flush()?;
        inner.reader.sync()?;
        let inner = RwLockWriteGuard::downgrade(inner);

        let total = (inner.reader.size() as usize) / ENTRY_WIDTH;

        // Strict upper bound: smallest i with entry[i].logical_off > target.
        let mut lo = 0usize;
        let mut hi = total;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if inner.read_entry(mid)?.logical_off > target {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        if lo == 0 {
            return Ok(IndexEntry::default());
        }
        inner.read_entry(lo - 1)
    }

    /// The final entry on disk, or the zero sentinel for an empty index.
    pub fn last_entry(&self) -> Result<IndexEntry> {
        let mut inner = self.inner.write();
        inner.writer.flush()?;
        inner.reader.sync()?;
        let inner = RwLockWriteGuard::downgrade(inner);

        let total = (inner.reader.size() as usize) / ENTRY_WIDTH;
        if total == 0 {
            return Ok(IndexEntry::default());
        }
        inner.read_entry(total - 1)
    }

    /// Flush the buffered writer to the file.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.writer.flush()?;
        Ok(())
    }

    /// Flush, fsync, and unmap. Every phase is attempted; their errors are
    /// joined. The file handle closes when the index is dropped.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write();

        let mut errors = Vec::new();
        if let Err(e) = inner.writer.flush() {
            errors.push(Error::Io(e));
        }
        if let Err(e) = inner.file.sync_all() {
            errors.push(Error::Io(e));
        }
        inner.reader.close();

        Error::join(errors)
    }
}
