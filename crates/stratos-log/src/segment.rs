//! One on-disk log segment: data file + offset index + time index.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use stratos_common::error::{LogError, Result};
use stratos_common::types::{Offset, Record, Timestamp};
use tracing::warn;

use crate::index::FileIndex;
use crate::record;

/// Base offsets are rendered as 20-digit, zero-padded decimal filenames.
fn base_offset_stem(base_offset: Offset) -> String {
    format!("{:020}", base_offset)
}

pub fn data_path(dir: &Path, base_offset: Offset) -> PathBuf {
    dir.join(format!("{}.log", base_offset_stem(base_offset)))
}

pub fn index_path(dir: &Path, base_offset: Offset) -> PathBuf {
    dir.join(format!("{}.index", base_offset_stem(base_offset)))
}

pub fn timeindex_path(dir: &Path, base_offset: Offset) -> PathBuf {
    dir.join(format!("{}.timeindex", base_offset_stem(base_offset)))
}

/// Outcome of scanning a segment's data file on open.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryReport {
    pub records_recovered: usize,
    pub records_truncated: usize,
    pub corruption_detected: bool,
}

struct SegmentInner {
    data_file: File,
    index: FileIndex,
    timeindex: FileIndex,
    next_offset: Offset,
    size: u64,
    records_since_index: u32,
    sealed: bool,
}

/// A single segment of one partition's log.
///
/// Its own mutex guards the three file handles and `next_offset`: reads take a shared lock, writes an exclusive one.
pub struct Segment {
    dir: PathBuf,
    base_offset: Offset,
    max_bytes: u64,
    index_interval: u32,
    fsync_on_append: bool,
    inner: RwLock<SegmentInner>,
}

impl Segment {
    /// Create a brand new, empty segment rooted at `base_offset`.
    pub fn create(
        dir: &Path,
        base_offset: Offset,
        max_bytes: u64,
        index_interval: u32,
        fsync_on_append: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path(dir, base_offset))?;
        let index = FileIndex::open(index_path(dir, base_offset))?;
        let timeindex = FileIndex::open(timeindex_path(dir, base_offset))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            base_offset,
            max_bytes,
            index_interval: index_interval.max(1),
            fsync_on_append,
            inner: RwLock::new(SegmentInner {
                data_file,
                index,
                timeindex,
                next_offset: base_offset,
                size: 0,
                records_since_index: 0,
                sealed: false,
            }),
        })
    }

    /// Open an existing segment, scanning its data file and rebuilding both
    /// indexes from scratch.
    ///
    /// This is the crash-recovery primitive: a record that fails to decode,
    /// or whose offset is not exactly one greater than its predecessor,
    /// marks the end of good data. Everything after that point is
    /// discarded.
    pub fn open_existing(
        dir: &Path,
        base_offset: Offset,
        max_bytes: u64,
        index_interval: u32,
        fsync_on_append: bool,
    ) -> Result<(Self, RecoveryReport)> {
        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(data_path(dir, base_offset))?;

        let mut raw = Vec::new();
        data_file.seek(SeekFrom::Start(0))?;
        data_file.read_to_end(&mut raw)?;

        let mut report = RecoveryReport::default();
        let mut good_len = 0usize;
        let mut expected_offset = base_offset;
        let mut records: Vec<Record> = Vec::new();

        let mut cursor = 0usize;
        while cursor < raw.len() {
            match record::decode(&raw[cursor..]) {
                Ok((rec, consumed)) => {
                    if rec.offset != expected_offset {
                        report.corruption_detected = true;
                        break;
                    }
                    cursor += consumed;
                    good_len = cursor;
                    expected_offset += 1;
                    records.push(rec);
                }
                Err(_) => {
                    report.corruption_detected = true;
                    break;
                }
            }
        }

        report.records_recovered = records.len();
        if good_len < raw.len() {
            report.records_truncated = 1; // at least the torn/corrupt tail record
            data_file.set_len(good_len as u64)?;
            warn!(
                base_offset,
                good_len,
                raw_len = raw.len(),
                "segment recovery truncated trailing bytes"
            );
        }
        data_file.seek(SeekFrom::End(0))?;

        let mut index = FileIndex::open(index_path(dir, base_offset))?;
        let mut timeindex = FileIndex::open(timeindex_path(dir, base_offset))?;
        index.clear()?;
        timeindex.clear()?;

        let mut position = 0u64;
        let mut records_since_index = 0u32;
        let interval = index_interval.max(1);
        for rec in &records {
            let encoded_len = record::encoded_len(rec.key.len(), rec.value.len()) as u64;
            if records_since_index % interval == 0 {
                index.append(rec.offset as u64, position)?;
                timeindex.append(rec.timestamp as u64, rec.offset as u64)?;
            }
            records_since_index += 1;
            position += encoded_len;
        }
        index.flush()?;
        timeindex.flush()?;

        let segment = Self {
            dir: dir.to_path_buf(),
            base_offset,
            max_bytes,
            index_interval: interval,
            fsync_on_append,
            inner: RwLock::new(SegmentInner {
                data_file,
                index,
                timeindex,
                next_offset: expected_offset,
                size: good_len as u64,
                records_since_index,
                sealed: good_len as u64 >= max_bytes,
            }),
        };

        Ok((segment, report))
    }

    #[must_use]
    pub fn base_offset(&self) -> Offset {
        self.base_offset
    }

    #[must_use]
    pub fn next_offset(&self) -> Offset {
        self.inner.read().next_offset
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.inner.read().size
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        let inner = self.inner.read();
        inner.sealed || inner.size >= self.max_bytes
    }

    pub fn seal(&self) {
        self.inner.write().sealed = true;
    }

    /// Append one record, assigning it the segment's next offset.
    ///
    /// Fails with `SegmentFull` (never surfaced to callers outside `Log`,
    /// which translates it into a roll) if the encoded record would push the
    /// segment past `max_bytes`.
    pub fn append(&self, key: Vec<u8>, value: Vec<u8>, timestamp: Timestamp) -> Result<Offset> {
        let mut inner = self.inner.write();
        Self::append_locked(&mut inner, self.max_bytes, self.index_interval, self.fsync_on_append, key, value, timestamp)
    }

    /// Append several records under one lock acquisition.
    pub fn append_batch(&self, records: Vec<(Vec<u8>, Vec<u8>, Timestamp)>) -> Result<Vec<Offset>> {
        let mut inner = self.inner.write();
        let mut offsets = Vec::with_capacity(records.len());
        for (key, value, timestamp) in records {
            let offset = Self::append_locked(
                &mut inner,
                self.max_bytes,
                self.index_interval,
                self.fsync_on_append,
                key,
                value,
                timestamp,
            )?;
            offsets.push(offset);
        }
        Ok(offsets)
    }

    fn append_locked(
        inner: &mut SegmentInner,
        max_bytes: u64,
        index_interval: u32,
        fsync_on_append: bool,
        key: Vec<u8>,
        value: Vec<u8>,
        timestamp: Timestamp,
    ) -> Result<Offset> {
        if inner.sealed {
            return Err(LogError::SegmentFull.into());
        }
        let encoded_len = record::encoded_len(key.len(), value.len()) as u64;
        if inner.size + encoded_len > max_bytes {
            inner.sealed = true;
            return Err(LogError::SegmentFull.into());
        }

        let offset = inner.next_offset;
        let record = Record::new(offset, timestamp, key, value);
        let encoded = record::encode(&record);

        let position = inner.size;
        inner.data_file.seek(SeekFrom::End(0))?;
        inner.data_file.write_all(&encoded)?;
        if fsync_on_append {
            inner.data_file.sync_data()?;
        }

        if inner.records_since_index % index_interval == 0 {
            inner.index.append(offset as u64, position)?;
            inner.timeindex.append(timestamp as u64, offset as u64)?;
        }

        inner.records_since_index += 1;
        inner.size += encoded_len;
        inner.next_offset += 1;

        Ok(offset)
    }

    /// Read the record at `offset`.
    ///
    /// Binary-searches `.index` for the largest entry `<= offset`, seeks the
    /// data file there, then scans forward one record at a time -- bounded
    /// by `index_interval` when the index is sparse, O(1) when dense.
    pub fn read(&self, offset: Offset) -> Result<Record> {
        let inner = self.inner.read();
        if offset < self.base_offset || offset >= inner.next_offset {
            return Err(LogError::NotFound(offset).into());
        }

        let start_pos = inner
            .index
            .floor(offset as u64)
            .map(|e| e.value)
            .unwrap_or(0);

        let mut file = clone_file_at(&inner.data_file, start_pos)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut cursor = 0;
        while cursor < buf.len() {
            let (rec, consumed) = record::decode(&buf[cursor..])?;
            if rec.offset == offset {
                return Ok(rec);
            }
            cursor += consumed;
        }
        Err(LogError::NotFound(offset).into())
    }

    /// Zero-copy-friendly read: resolve `start_offset` to a file position and
    /// return up to `max_bytes` raw bytes from there. Record boundaries within the returned range are the client's
    /// concern.
    pub fn read_range(&self, start_offset: Offset, max_bytes: usize) -> Result<(u64, Vec<u8>)> {
        let inner = self.inner.read();
        if start_offset < self.base_offset || start_offset > inner.next_offset {
            return Err(LogError::NotFound(start_offset).into());
        }
        let start_pos = inner
            .index
            .floor(start_offset as u64)
            .map(|e| e.value)
            .unwrap_or(0);

        let mut file = clone_file_at(&inner.data_file, start_pos)?;
        let available = inner.size.saturating_sub(start_pos) as usize;
        let to_read = max_bytes.min(available);
        let mut buf = vec![0u8; to_read];
        file.read_exact(&mut buf)?;
        Ok((start_pos, buf))
    }

    /// Read every surviving record in offset order. Used by the cleaner to
    /// scan a sealed segment for retention/compaction; not part of
    /// the hot produce/fetch path.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let inner = self.inner.read();
        let mut file = clone_file_at(&inner.data_file, 0)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut records = Vec::new();
        let mut cursor = 0usize;
        while cursor < buf.len() {
            let (rec, consumed) = record::decode(&buf[cursor..])?;
            cursor += consumed;
            records.push(rec);
        }
        Ok(records)
    }

    /// Build a fresh sealed segment at `base_offset` containing exactly
    /// `records`, in order, preserving their original offsets rather than
    /// reassigning fresh ones.
    pub fn write_compacted(
        dir: &Path,
        base_offset: Offset,
        records: &[Record],
        max_bytes: u64,
        index_interval: u32,
        fsync_on_append: bool,
    ) -> Result<Self> {
        let segment = Self::create(dir, base_offset, max_bytes, index_interval, fsync_on_append)?;
        {
            let mut inner = segment.inner.write();
            // `create` truncates the data file but reuses any index files
            // already on disk at this base offset; guarantee a clean slate
            // regardless of whether this base offset was previously used.
            inner.index.clear()?;
            inner.timeindex.clear()?;
            for rec in records {
                let encoded = record::encode(rec);
                let position = inner.size;
                inner.data_file.seek(SeekFrom::End(0))?;
                inner.data_file.write_all(&encoded)?;
                if inner.records_since_index % segment.index_interval == 0 {
                    inner.index.append(rec.offset as u64, position)?;
                    inner.timeindex.append(rec.timestamp as u64, rec.offset as u64)?;
                }
                inner.records_since_index += 1;
                inner.size += encoded.len() as u64;
                inner.next_offset = rec.offset + 1;
            }
            inner.index.flush()?;
            inner.timeindex.flush()?;
            if fsync_on_append {
                inner.data_file.sync_data()?;
            }
        }
        segment.seal();
        Ok(segment)
    }

    /// Binary-search `.timeindex` for the smallest entry with
    /// `timestamp >= target`, returning its offset.
    #[must_use]
    pub fn find_offset_for_timestamp(&self, target: Timestamp) -> Option<Offset> {
        let inner = self.inner.read();
        inner
            .timeindex
            .ceiling(target as u64)
            .map(|e| e.value as Offset)
    }

    /// Truncate the segment to drop every record with `offset >= target`,
    /// then rebuild both indexes from the surviving data.
    pub fn truncate_to(&self, target: Offset) -> Result<()> {
        let mut inner = self.inner.write();
        if target <= self.base_offset {
            inner.data_file.set_len(0)?;
            inner.index.clear()?;
            inner.timeindex.clear()?;
            inner.next_offset = self.base_offset;
            inner.size = 0;
            inner.records_since_index = 0;
            inner.sealed = false;
            return Ok(());
        }
        if target >= inner.next_offset {
            return Ok(());
        }

        let start_pos = inner.index.floor(target as u64).map(|e| e.value).unwrap_or(0);
        let mut file = clone_file_at(&inner.data_file, start_pos)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let mut cursor = 0usize;
        let mut keep_len = start_pos as usize;
        while cursor < buf.len() {
            let (rec, consumed) = record::decode(&buf[cursor..])?;
            if rec.offset >= target {
                break;
            }
            cursor += consumed;
            keep_len += consumed;
        }

        inner.data_file.set_len(keep_len as u64)?;
        inner.data_file.seek(SeekFrom::End(0))?;

        // Rebuild both indexes from scratch over the surviving records.
        inner.data_file.seek(SeekFrom::Start(0))?;
        let mut all = Vec::new();
        inner.data_file.read_to_end(&mut all)?;
        inner.index.clear()?;
        inner.timeindex.clear()?;

        let mut position = 0u64;
        let mut records_since_index = 0u32;
        let mut cur = 0usize;
        let mut next_offset = self.base_offset;
        while cur < all.len() {
            let (rec, consumed) = record::decode(&all[cur..])?;
            if records_since_index % self.index_interval == 0 {
                inner.index.append(rec.offset as u64, position)?;
                inner.timeindex.append(rec.timestamp as u64, rec.offset as u64)?;
            }
            records_since_index += 1;
            position += consumed as u64;
            cur += consumed;
            next_offset = rec.offset + 1;
        }
        inner.index.flush()?;
        inner.timeindex.flush()?;

        inner.next_offset = next_offset;
        inner.size = position;
        inner.records_since_index = records_since_index;
        inner.sealed = false;
        inner.data_file.seek(SeekFrom::End(0))?;

        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.data_file.sync_all()?;
        inner.index.flush()?;
        inner.timeindex.flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()
    }

    /// Close and unlink all three files backing this segment.
    pub fn delete(self) -> Result<()> {
        drop(self.inner);
        let _ = std::fs::remove_file(data_path(&self.dir, self.base_offset));
        let _ = std::fs::remove_file(index_path(&self.dir, self.base_offset));
        let _ = std::fs::remove_file(timeindex_path(&self.dir, self.base_offset));
        Ok(())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Newest record timestamp in the segment, used by time-based
    /// retention. `None` for an empty segment.
    #[must_use]
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.inner.read().timeindex.last().map(|e| e.key as Timestamp)
    }
}

/// Duplicate the file handle and seek the copy to `pos`, leaving the
/// original's cursor untouched. `File::try_clone` shares the underlying OS
/// file description but each clone keeps its own cursor after a `seek`.
fn clone_file_at(file: &File, pos: u64) -> Result<File> {
    let mut clone = file.try_clone()?;
    clone.seek(SeekFrom::Start(pos))?;
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_segment(max_bytes: u64) -> (tempfile::TempDir, Segment) {
        let dir = tempdir().unwrap();
        let seg = Segment::create(dir.path(), 0, max_bytes, 1, false).unwrap();
        (dir, seg)
    }

    #[test]
    fn append_and_read_round_trip() {
        let (_dir, seg) = new_segment(1024 * 1024);
        let offset = seg.append(b"k".to_vec(), b"v".to_vec(), 1000).unwrap();
        assert_eq!(offset, 0);
        let rec = seg.read(0).unwrap();
        assert_eq!(rec.key, b"k");
        assert_eq!(rec.value, b"v");
        assert_eq!(seg.next_offset(), 1);
    }

    #[test]
    fn full_segment_signals_segment_full() {
        let (_dir, seg) = new_segment(40);
        seg.append(b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        let err = seg.append(b"k".to_vec(), b"v".to_vec(), 2);
        assert!(err.is_err());
        assert!(seg.is_full());
    }

    #[test]
    fn find_offset_for_timestamp_returns_ceiling() {
        let (_dir, seg) = new_segment(1024 * 1024);
        seg.append(b"a".to_vec(), b"1".to_vec(), 100).unwrap();
        seg.append(b"b".to_vec(), b"2".to_vec(), 200).unwrap();
        seg.append(b"c".to_vec(), b"3".to_vec(), 300).unwrap();
        assert_eq!(seg.find_offset_for_timestamp(150), Some(1));
        assert_eq!(seg.find_offset_for_timestamp(300), Some(2));
        assert_eq!(seg.find_offset_for_timestamp(301), None);
    }

    #[test]
    fn truncate_to_drops_trailing_records() {
        let (_dir, seg) = new_segment(1024 * 1024);
        for i in 0..5 {
            seg.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes(), i).unwrap();
        }
        seg.truncate_to(3).unwrap();
        assert_eq!(seg.next_offset(), 3);
        assert!(seg.read(3).is_err());
        assert!(seg.read(2).is_ok());
    }

    #[test]
    fn recovery_truncates_corrupt_tail() {
        let dir = tempdir().unwrap();
        {
            let seg = Segment::create(dir.path(), 0, 1024 * 1024, 1, false).unwrap();
            for i in 0..10 {
                seg.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes(), i).unwrap();
            }
            seg.flush().unwrap();
        }

        // Corrupt the data file by truncating mid-record-10 (actually the
        // last of 10 records, offset 9).
        let path = data_path(dir.path(), 0);
        let len = std::fs::metadata(&path).unwrap().len();
        let truncated = len - 3;
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(truncated).unwrap();

        let (seg, report) = Segment::open_existing(dir.path(), 0, 1024 * 1024, 1, false).unwrap();
        assert_eq!(report.records_recovered, 9);
        assert!(report.records_truncated >= 1);
        assert!(seg.read(8).is_ok());
        assert!(seg.read(9).is_err());
        assert_eq!(seg.next_offset(), 9);
    }
}
