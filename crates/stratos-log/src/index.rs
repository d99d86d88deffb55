//! Sparse/dense offset and timestamp indexes.
//!
//! Both index files share one 16-byte entry shape: two big-endian `u64`s.
//! For `.index` that's `(offset, position)`; for `.timeindex` it's
//! `(timestamp, offset)`. Keeping the shape identical lets one `FileIndex`
//! implementation back both, parameterized only by which field is searched.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use stratos_common::error::{LogError, Result};

const ENTRY_SIZE: u64 = 16;

/// One 16-byte index entry: `(key, value)` as big-endian `u64`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: u64,
    pub value: u64,
}

/// A file-backed, append-only index of 16-byte `(key, value)` entries,
/// always kept sorted by `key`.
pub struct FileIndex {
    path: PathBuf,
    file: File,
    /// In-memory mirror for binary search without repeated seeks. Rebuilt
    /// whenever the file is (re)opened or truncated.
    entries: Vec<IndexEntry>,
}

impl FileIndex {
    /// Open (creating if absent) the index file at `path`, loading all
    /// existing entries into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut buf)?;

        let usable_len = (buf.len() as u64 / ENTRY_SIZE) * ENTRY_SIZE;
        if usable_len as usize != buf.len() {
            // A partially-written trailing entry; drop it. Recovery at the
            // Log level will rebuild this index from the data file anyway if
            // the segment itself was mid-write, but we never want to hand
            // back a torn entry from a fresh open.
            file.set_len(usable_len)?;
            file.seek(SeekFrom::Start(usable_len))?;
        }

        let mut entries = Vec::with_capacity(buf.len() / ENTRY_SIZE as usize);
        for chunk in buf[..usable_len as usize].chunks_exact(ENTRY_SIZE as usize) {
            entries.push(IndexEntry {
                key: u64::from_be_bytes(chunk[0..8].try_into().unwrap()),
                value: u64::from_be_bytes(chunk[8..16].try_into().unwrap()),
            });
        }

        Ok(Self {
            path,
            file,
            entries,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<IndexEntry> {
        self.entries.last().copied()
    }

    /// Append one entry. Callers (the segment) are responsible for only
    /// calling this with a non-decreasing `key`.
    pub fn append(&mut self, key: u64, value: u64) -> Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&key.to_be_bytes())?;
        self.file.write_all(&value.to_be_bytes())?;
        self.entries.push(IndexEntry { key, value });
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Drop all entries and truncate the file to empty, ready for a rebuild.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Binary search for the largest entry with `entry.key <= target`.
    #[must_use]
    pub fn floor(&self, target: u64) -> Option<IndexEntry> {
        match self.entries.partition_point(|e| e.key <= target) {
            0 => None,
            n => Some(self.entries[n - 1]),
        }
    }

    /// Binary search for the smallest entry with `entry.key >= target`.
    #[must_use]
    pub fn ceiling(&self, target: u64) -> Option<IndexEntry> {
        let idx = self.entries.partition_point(|e| e.key < target);
        self.entries.get(idx).copied()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Validate that `.index` entries form a strictly increasing sequence of
/// offsets.
#[must_use]
pub fn is_strictly_increasing(entries: &[IndexEntry]) -> bool {
    entries.windows(2).all(|w| w[0].key < w[1].key)
}

pub fn corrupted(msg: impl Into<String>) -> LogError {
    LogError::CorruptedIndex(msg.into())
}
