//! Read-only memory-mapped view of a growing file.
//!
//! The index writer appends through an ordinary file handle while readers go
//! through a shared read-only mapping. The mapping only ever grows: `sync()`
//! re-stats the file and remaps when it has grown. Slices handed out by
//! `read_at` borrow from the current mapping and are valid only until the
//! next `sync()` or `close()`; the owning index serializes those through its
//! reader/writer lock.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct MmapReader {
    file: File,
    map: Option<Mmap>,
}

impl MmapReader {
    /// Open `path` read-only and map its current contents.
    ///
    /// A zero-length file keeps the handle with no mapping; mapping an empty
    /// region is rejected by the OS.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let size = file.metadata()?.len();

        if size == 0 {
            return Ok(Self { file, map: None });
        }

        // SAFETY: the file is opened read-only and the handle lives as long
        // as the mapping. All reads are bounds-checked in `read_at`.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            file,
            map: Some(map),
        })
    }

    /// Remap if the file has grown since the last map.
    ///
    /// Must only be called while the owner holds its exclusive lock: the old
    /// mapping is dropped here and any outstanding `read_at` borrow would be
    /// left dangling. On remap failure the reader is left explicitly empty so
    /// later reads fail instead of serving stale data.
    pub fn sync(&mut self) -> Result<()> {
        let current_size = self.file.metadata()?.len();

        if current_size <= self.len() as u64 {
            return Ok(());
        }

        self.map = None;

        // SAFETY: same handle, same read-only protection as in `open`.
        match unsafe { Mmap::map(&self.file) } {
            Ok(map) => {
                self.map = Some(map);
                Ok(())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Borrow `length` bytes starting at `offset` from the mapping.
    pub fn read_at(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let data = self.map.as_ref().ok_or(Error::EmptyStore)?;

        if offset + length > data.len() {
            return Err(Error::OutOfBounds {
                len: data.len(),
                offset,
                requested: length,
            });
        }

        Ok(&data[offset..offset + length])
    }

    /// Mapped length in bytes (zero when nothing is mapped).
    pub fn size(&self) -> u64 {
        self.len() as u64
    }

    /// Drop the mapping. The file handle itself closes when the reader is
    /// dropped.
    pub fn close(&mut self) {
        self.map = None;
    }

    fn len(&self) -> usize {
        self.map.as_ref().map(|m| m.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_has_no_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.index");
        File::create(&path).unwrap();

        let reader = MmapReader::open(&path).unwrap();
        assert_eq!(reader.size(), 0);
        assert!(matches!(reader.read_at(0, 1), Err(Error::EmptyStore)));
    }

    #[test]
    fn reads_mapped_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");
        std::fs::write(&path, b"hello world").unwrap();

        let reader = MmapReader::open(&path).unwrap();
        assert_eq!(reader.size(), 11);
        assert_eq!(reader.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");
        std::fs::write(&path, b"abcd").unwrap();

        let reader = MmapReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_at(2, 3),
            Err(Error::OutOfBounds { len: 4, .. })
        ));
    }

    #[test]
    fn sync_picks_up_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.index");
        std::fs::write(&path, b"1234").unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        assert_eq!(reader.size(), 4);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"5678").unwrap();
        f.flush().unwrap();

        reader.sync().unwrap();
        assert_eq!(reader.size(), 8);
        assert_eq!(reader.read_at(4, 4).unwrap(), b"5678");
    }

    #[test]
    fn sync_from_empty_maps_new_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.index");
        File::create(&path).unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        assert_eq!(reader.size(), 0);

        std::fs::write(&path, b"abcdefgh").unwrap();
        reader.sync().unwrap();
        assert_eq!(reader.read_at(0, 8).unwrap(), b"abcdefgh");
    }

    #[test]
    fn close_drops_the_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.index");
        std::fs::write(&path, b"abcd").unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        reader.close();
        assert!(matches!(reader.read_at(0, 1), Err(Error::EmptyStore)));
    }
}
