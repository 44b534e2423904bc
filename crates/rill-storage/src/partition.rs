//! A partition: an ordered sequence of rolling segments in one directory.
//!
//! Segment pairs share a zero-padded 15-digit base-offset name
//! (`000000000010000.log` / `000000000010000.index`), so lexicographic
//! filename order equals base-offset order. The segment with the largest
//! base offset is held open writable; appends go to it until a rotation
//! threshold (record count or age) rolls a new one. Reads binary-search the
//! segment list for the greatest base offset at or below the target and open
//! that segment through a transient read-only handle.
//!
//! On rotation the new segment's base offset is the partition's next global
//! offset, so logical offsets stay gap-free across segment boundaries.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::PartitionConfig;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::segment::Segment;

/// Width of the zero-padded base offset in segment filenames.
const SEGMENT_NAME_WIDTH: u32 = 15;

const LOG_SUFFIX: &str = ".log";

/// Segment filename for a base offset, e.g. `000000000010001.log`.
///
/// Base offsets that do not fit the fixed width are unsupported.
pub fn segment_file_name(base_offset: u64) -> Result<String> {
    if base_offset >= 10u64.pow(SEGMENT_NAME_WIDTH) {
        return Err(Error::SegmentNameOverflow(base_offset));
    }
    Ok(format!("{base_offset:015}{LOG_SUFFIX}"))
}

fn parse_base_offset(name: &str) -> Option<u64> {
    name.strip_suffix(LOG_SUFFIX)?.parse().ok()
}

/// Location of one segment within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMeta {
    pub base_offset: u64,
    pub path: PathBuf,
}

struct PartitionInner {
    segments: Vec<SegmentMeta>,
    active: Segment,
    active_name: String,
    /// Global offset the next append will receive.
    next_offset: u64,
}

pub struct Partition {
    dir: PathBuf,
    config: PartitionConfig,
    inner: RwLock<PartitionInner>,
}

impl Partition {
    /// Open the partition at `dir` with the default configuration, creating
    /// the directory if it is missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(dir, PartitionConfig::default())
    }

    /// Open the partition at `dir`, discovering existing segments and making
    /// the one with the largest base offset active.
    pub fn open_with_config(dir: impl AsRef<Path>, config: PartitionConfig) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(LOG_SUFFIX) {
                continue;
            }
            if parse_base_offset(&name).is_none() {
                warn!(name, "skipping log file with unparsable base offset");
                continue;
            }
            names.push(name);
        }
        // Zero padding makes filename order base-offset order.
        names.sort();

        if names.is_empty() {
            names.push(segment_file_name(0)?);
        }

        let segments: Vec<SegmentMeta> = names
            .iter()
            .map(|name| SegmentMeta {
                // Parse cannot fail: unparsable names were filtered above.
                base_offset: parse_base_offset(name).unwrap_or(0),
                path: dir.join(name),
            })
            .collect();

        let active_name = names.last().cloned().unwrap_or_default();
        let active_meta = segments.last().cloned().expect("at least one segment");
        let active = Segment::open(&active_meta.path, active_meta.base_offset, config.durability)?;
        let next_offset = active_meta.base_offset + active.next_offset();

        debug!(
            dir = %dir.display(),
            segments = segments.len(),
            active = %active_name,
            next_offset,
            "opened partition"
        );

        Ok(Self {
            dir,
            config,
            inner: RwLock::new(PartitionInner {
                segments,
                active,
                active_name,
                next_offset,
            }),
        })
    }

    /// Append `payload` and return the global offset it was assigned.
    pub fn append(&self, payload: &[u8]) -> Result<u64> {
        let mut inner = self.inner.write();

        self.rotate_if_needed(&mut inner)?;

        let offset = inner.active.append(payload)?;
        inner.next_offset += 1;
        Ok(offset)
    }

    fn rotate_if_needed(&self, inner: &mut PartitionInner) -> Result<()> {
        let age = inner.active.created_at().elapsed().unwrap_or_default();
        if age <= self.config.max_segment_age
            && inner.active.next_offset() < self.config.max_segment_records
        {
            return Ok(());
        }

        inner.active.close()?;

        let new_base = inner.next_offset;
        let name = segment_file_name(new_base)?;
        let path = self.dir.join(&name);
        info!(
            old = %inner.active_name,
            new = %name,
            new_base,
            "rotating active segment"
        );

        inner.active = Segment::open(&path, new_base, self.config.durability)?;
        inner.segments.push(SegmentMeta {
            base_offset: new_base,
            path,
        });
        inner.active_name = name;
        Ok(())
    }

    /// Read the record at a global offset, routing to the owning segment.
    pub fn read(&self, offset: u64) -> Result<Record> {
        let inner = self.inner.read();

        // Greatest base offset <= target.
        let idx = inner
            .segments
            .partition_point(|s| s.base_offset <= offset)
            .saturating_sub(1);
        let meta = &inner.segments[idx];

        let segment = Segment::open_read_only(&meta.path, meta.base_offset)?;
        let record = segment.find_record(offset);
        if let Err(e) = segment.close() {
            warn!(path = %segment.path().display(), "failed to close read-only segment: {e}");
        }
        record
    }

    /// Close the active segment. The partition must not be used afterwards.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.write();
        inner.active.close()
    }

    /// Snapshot of the segment list, ordered by base offset.
    pub fn segments(&self) -> Vec<SegmentMeta> {
        self.inner.read().segments.clone()
    }

    /// Filename of the active segment's log file.
    pub fn active_segment_name(&self) -> String {
        self.inner.read().active_name.clone()
    }

    /// Global offset the next append will receive.
    pub fn next_offset(&self) -> u64 {
        self.inner.read().next_offset
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
