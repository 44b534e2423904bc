//! Append-only segment log.
//!
//! A segment is a pair of files: the record log (`[header][payload]...`) and
//! its sparse index sibling. Records carry globally monotonic offsets
//! starting at the segment's base offset; every 500th append also writes one
//! index entry, so reads binary-search the index and then scan at most 499
//! records.
//!
//! Durability is decided at construction. The sync modes share a `BufWriter`
//! and differ in how far each append is pushed (nowhere / OS page cache /
//! disk); the async mode hands frames to a background [`AsyncWriter`].
//! Readers flush whichever backend is active before scanning, so a
//! `find_record` that starts after an `append` returned always observes that
//! record.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::config::Durability;
use crate::error::{Error, Result};
use crate::index::{IndexEntry, SparseIndex};
use crate::record::{Record, RecordHeader, HEADER_SIZE};
use crate::writer::AsyncWriter;

/// One index entry per this many appended records.
pub const INDEX_STRIDE: u64 = 500;

/// Buffer size for the async writer backend.
const ASYNC_WRITER_BUFFER: usize = 8192;

/// Buffer size for the synchronous writer backends.
const SYNC_WRITER_BUFFER: usize = 4096;

/// Writer backend chosen at construction time.
enum LogWriter {
    /// Read-only segments: writes are a no-op.
    Noop,
    Sync {
        writer: BufWriter<File>,
        flush_on_append: bool,
        sync_on_append: bool,
    },
    Async(AsyncWriter),
}

impl LogWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self {
            LogWriter::Noop => Ok(0),
            LogWriter::Sync {
                writer,
                flush_on_append,
                sync_on_append,
            } => {
                writer.write_all(data)?;
                if *flush_on_append {
                    writer.flush()?;
                }
                if *sync_on_append {
                    writer.get_ref().sync_all()?;
                }
                Ok(data.len())
            }
            LogWriter::Async(writer) => writer.write(data),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            LogWriter::Noop => Ok(()),
            LogWriter::Sync { writer, .. } => Ok(writer.flush()?),
            LogWriter::Async(writer) => writer.flush(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            LogWriter::Noop => Ok(()),
            LogWriter::Sync { writer, .. } => Ok(writer.flush()?),
            LogWriter::Async(writer) => writer.close(),
        }
    }
}

struct SegmentState {
    /// Count of records appended; the next record gets
    /// `base_offset + next_local_offset`.
    next_local_offset: u64,
    /// Byte length of the record log.
    next_memory_pos: u64,
}

pub struct Segment {
    base_offset: u64,
    read_only: bool,
    path: PathBuf,
    created_at: SystemTime,
    file: File,
    index: SparseIndex,
    state: RwLock<SegmentState>,
    writer: Mutex<LogWriter>,
}

impl Segment {
    /// Open or create a writable segment with the given durability mode.
    pub fn open(path: impl AsRef<Path>, base_offset: u64, durability: Durability) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .append(true)
            .read(true)
            .create(true)
            .open(path)?;

        let writer = match durability {
            Durability::Async => {
                LogWriter::Async(AsyncWriter::new(file.try_clone()?, ASYNC_WRITER_BUFFER)?)
            }
            Durability::Medium => LogWriter::Sync {
                writer: BufWriter::with_capacity(SYNC_WRITER_BUFFER, file.try_clone()?),
                flush_on_append: true,
                sync_on_append: false,
            },
            Durability::Full => LogWriter::Sync {
                writer: BufWriter::with_capacity(SYNC_WRITER_BUFFER, file.try_clone()?),
                flush_on_append: true,
                sync_on_append: true,
            },
        };

        Self::init(file, path, base_offset, false, writer)
    }

    /// Open an existing segment for reading only. Appends fail with
    /// [`Error::ReadOnly`].
    pub fn open_read_only(path: impl AsRef<Path>, base_offset: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::init(file, path, base_offset, true, LogWriter::Noop)
    }

    fn init(
        file: File,
        path: &Path,
        base_offset: u64,
        read_only: bool,
        writer: LogWriter,
    ) -> Result<Self> {
        let index = SparseIndex::open(path.with_extension("index"))?;

        let meta = file.metadata()?;
        let size = meta.len();

        let (state, created_at) = if size == 0 {
            (
                SegmentState {
                    next_local_offset: 0,
                    next_memory_pos: 0,
                },
                SystemTime::now(),
            )
        } else {
            let last_entry = index.last_entry()?;
            let state = recover_state(&file, path, size, base_offset, last_entry, read_only)?;
            (state, meta.modified()?)
        };

        Ok(Self {
            base_offset,
            read_only,
            path: path.to_path_buf(),
            created_at,
            file,
            index,
            state: RwLock::new(state),
            writer: Mutex::new(writer),
        })
    }

    /// Append `payload` as the next record and return its global offset.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let mut state = self.state.write();

        let global_offset = self.base_offset + state.next_local_offset;
        let header = RecordHeader {
            logical_offset: global_offset,
            payload_size: payload.len() as u64,
            timestamp_ns: now_ns(),
        };

        let mut frame = BytesMut::zeroed(HEADER_SIZE + payload.len());
        header.encode(&mut frame[..HEADER_SIZE]);
        frame[HEADER_SIZE..].copy_from_slice(payload);

        self.writer.lock().write(&frame)?;

        state.next_memory_pos += frame.len() as u64;
        state.next_local_offset += 1;

        if state.next_local_offset % INDEX_STRIDE == 0 {
            // Records the position AFTER the record just written, i.e. the
            // byte where the record with this local offset will begin.
            self.index.write_entry(IndexEntry {
                logical_off: state.next_local_offset as u32,
                memory_pos: state.next_memory_pos as u32,
            })?;
        }

        Ok(global_offset)
    }

    /// Locate the record with the given global offset.
    ///
    /// The index floor search yields a starting byte position at or before
    /// the target record; from there headers are decoded linearly until the
    /// offset matches or the scan reaches the end of acknowledged data.
    pub fn find_record(&self, target: u64) -> Result<Record> {
        let state = self.state.read();

        // Index entries hold segment-local offsets.
        let local_target = target.saturating_sub(self.base_offset);
        let base_entry = self
            .index
            .find_nearest(local_target.min(u32::MAX as u64) as u32)?;

        // Surface concurrent appends before scanning.
        self.writer.lock().flush()?;

        let mut pos = base_entry.memory_pos as u64;
        let mut header_buf = [0u8; HEADER_SIZE];
        loop {
            if pos >= state.next_memory_pos {
                return Err(Error::RecordNotFound(target));
            }

            self.file.read_exact_at(&mut header_buf, pos)?;
            let header = RecordHeader::decode(&header_buf);

            if header.logical_offset == target {
                let mut payload = vec![0u8; header.payload_size as usize];
                self.file
                    .read_exact_at(&mut payload, pos + HEADER_SIZE as u64)?;
                return Ok(Record { header, payload });
            }

            pos += HEADER_SIZE as u64 + header.payload_size;
        }
    }

    /// Count of records in this segment.
    pub fn next_offset(&self) -> u64 {
        self.state.read().next_local_offset
    }

    /// Global offset of the first record.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Flush the writer backend and the index buffer.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        self.index.flush()
    }

    pub(crate) fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Close the writer backend, the index, and the file. All phases are
    /// attempted; their errors are joined. The segment must not be used
    /// afterwards.
    pub fn close(&self) -> Result<()> {
        let _state = self.state.write();

        let mut errors = Vec::new();
        if let Err(e) = self.writer.lock().close() {
            errors.push(e);
        }
        if let Err(e) = self.index.close() {
            errors.push(e);
        }

        Error::join(errors)
    }
}

/// Rebuild `next_local_offset` and `next_memory_pos` for a non-empty log.
///
/// Scans from the last indexed position (at most 499 records behind the
/// tail) observing each header. A trailing `[header][payload]` pair that
/// would run past the end of the file is a torn partial record: the scan
/// stops at the last complete record and writable segments are truncated to
/// it.
fn recover_state(
    file: &File,
    path: &Path,
    file_len: u64,
    base_offset: u64,
    last_entry: IndexEntry,
    read_only: bool,
) -> Result<SegmentState> {
    let mut pos = last_entry.memory_pos as u64;
    if pos >= file_len {
        // Index ran ahead of the log (possible after a crash in async
        // mode); rebuild by scanning the whole segment.
        pos = 0;
    }

    let mut highest: Option<u64> = None;
    let mut header_buf = [0u8; HEADER_SIZE];

    while pos < file_len {
        if pos + HEADER_SIZE as u64 > file_len {
            break;
        }
        file.read_exact_at(&mut header_buf, pos)?;
        let header = RecordHeader::decode(&header_buf);
        if pos + HEADER_SIZE as u64 + header.payload_size > file_len {
            break;
        }

        highest = Some(header.logical_offset);
        pos += HEADER_SIZE as u64 + header.payload_size;
    }

    if pos < file_len {
        warn!(
            path = %path.display(),
            valid_len = pos,
            file_len,
            "dropping torn partial record at segment tail"
        );
        if !read_only {
            file.set_len(pos)?;
        }
    }

    let next_local_offset = match highest {
        Some(offset) => offset.saturating_sub(base_offset) + 1,
        None => 0,
    };

    Ok(SegmentState {
        next_local_offset,
        next_memory_pos: pos,
    })
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
