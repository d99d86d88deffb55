//! Ordered sequence of segments belonging to one (topic, partition).
//!
//! Holds an active segment plus an immutable sealed-segment list behind a
//! `RwLock`, rolling to a new segment by size. Segments are file-backed
//! (see [`crate::segment::Segment`]) rather than kept in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use stratos_common::error::{LogError, Result};
use stratos_common::types::{Offset, Record, Timestamp};
use tracing::{info, warn};

use crate::segment::{self, RecoveryReport, Segment};

fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Aggregate recovery outcome across every segment scanned on open.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecoveryReport {
    pub records_recovered: usize,
    pub records_truncated: usize,
    pub corruption_detected: bool,
}

impl LogRecoveryReport {
    fn absorb(&mut self, seg: RecoveryReport) {
        self.records_recovered += seg.records_recovered;
        self.records_truncated += seg.records_truncated;
        self.corruption_detected |= seg.corruption_detected;
    }
}

/// Ordered sequence of segments for one partition.
///
/// Invariants: segments never overlap in offset range; exactly
/// one segment (the last) is active and writable; `high_water_mark` equals
/// `active.base + active.record_count`.
pub struct Log {
    dir: PathBuf,
    max_segment_bytes: u64,
    index_interval: u32,
    fsync_on_append: bool,
    /// Sorted by base offset ascending; the last entry is always the active
    /// segment.
    segments: RwLock<Vec<Arc<Segment>>>,
}

impl Log {
    /// Open (or create) the log rooted at `dir`, recovering every segment
    /// found there.
    pub fn open(
        dir: impl AsRef<Path>,
        max_segment_bytes: u64,
        index_interval: u32,
        fsync_on_append: bool,
    ) -> Result<(Self, LogRecoveryReport)> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut base_offsets = discover_base_offsets(&dir)?;
        base_offsets.sort_unstable();

        let mut report = LogRecoveryReport::default();
        let mut segments = Vec::with_capacity(base_offsets.len().max(1));

        for base in base_offsets {
            let (seg, seg_report) =
                Segment::open_existing(&dir, base, max_segment_bytes, index_interval, fsync_on_append)?;
            report.absorb(seg_report);
            segments.push(Arc::new(seg));
        }

        if segments.is_empty() {
            segments.push(Arc::new(Segment::create(
                &dir,
                0,
                max_segment_bytes,
                index_interval,
                fsync_on_append,
            )?));
        } else if let Some(last) = segments.last() {
            // A previously-sealed trailing segment (e.g. roll happened but
            // the process died before any append landed in the new one) is
            // still writable by construction; `is_full` governs whether the
            // next append rolls again.
            let _ = last;
        }

        if report.records_recovered > 0 && report.corruption_detected {
            warn!(
                records_recovered = report.records_recovered,
                records_truncated = report.records_truncated,
                "log recovery discarded trailing corrupt data"
            );
        }

        Ok((
            Self {
                dir,
                max_segment_bytes,
                index_interval,
                fsync_on_append,
                segments: RwLock::new(segments),
            },
            report,
        ))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn active(&self) -> Arc<Segment> {
        self.segments.read().last().expect("log always has an active segment").clone()
    }

    /// Roll to a fresh segment if the active one can no longer accept
    /// writes. Not atomic with the append that
    /// triggered it by design -- a crash between roll and first append
    /// leaves the new segment empty, which recovery tolerates.
    fn roll(&self) -> Result<Arc<Segment>> {
        let mut segments = self.segments.write();
        let active = segments.last().expect("log always has an active segment");
        if !active.is_full() {
            return Ok(active.clone());
        }
        active.seal();
        let new_base = active.next_offset();
        info!(new_base, "rolling log segment");
        let fresh = Arc::new(Segment::create(
            &self.dir,
            new_base,
            self.max_segment_bytes,
            self.index_interval,
            self.fsync_on_append,
        )?);
        segments.push(fresh.clone());
        Ok(fresh)
    }

    /// Append one record, synthesizing `timestamp = now_ms()`.
    pub fn append(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Offset> {
        self.append_at(key, value, now_ms())
    }

    /// Append with an explicit timestamp; used internally by recovery/tests
    /// and by replication replay where the original producer timestamp must
    /// be preserved.
    pub fn append_at(&self, key: Vec<u8>, value: Vec<u8>, timestamp: Timestamp) -> Result<Offset> {
        let mut active = self.active();
        loop {
            match active.append(key.clone(), value.clone(), timestamp) {
                Ok(offset) => return Ok(offset),
                Err(stratos_common::error::Error::Log(LogError::SegmentFull)) => {
                    active = self.roll()?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Append a batch of `(key, value)` pairs, synthesizing one timestamp
    /// per record at call time.
    pub fn append_batch(&self, records: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<Offset>> {
        let mut offsets = Vec::with_capacity(records.len());
        for (key, value) in records {
            offsets.push(self.append(key, value)?);
        }
        Ok(offsets)
    }

    fn segment_for(&self, offset: Offset) -> Option<Arc<Segment>> {
        let segments = self.segments.read();
        segments
            .iter()
            .rev()
            .find(|s| offset >= s.base_offset())
            .cloned()
    }

    /// Read the record at `offset`.
    pub fn read(&self, offset: Offset) -> Result<Record> {
        let segment = self
            .segment_for(offset)
            .ok_or(LogError::NotFound(offset))?;
        segment.read(offset)
    }

    /// Zero-copy read path: resolve `start_offset` to a segment, file
    /// position, and byte range.
    pub fn read_range(&self, start_offset: Offset, max_bytes: usize) -> Result<(PathBuf, u64, Vec<u8>)> {
        let segment = self
            .segment_for(start_offset)
            .ok_or(LogError::NotFound(start_offset))?;
        let (position, bytes) = segment.read_range(start_offset, max_bytes)?;
        Ok((segment::data_path(segment.dir(), segment.base_offset()), position, bytes))
    }

    /// The next offset to be assigned -- equivalently, the offset one past
    /// the last committed record.
    #[must_use]
    pub fn high_water_mark(&self) -> Offset {
        self.active().next_offset()
    }

    /// First offset whose record has `timestamp >= ts`, scanning segments in
    /// order. `None` if no record satisfies;
    /// callers fall back to the high-water mark.
    #[must_use]
    pub fn search_by_timestamp(&self, ts: Timestamp) -> Option<Offset> {
        let segments = self.segments.read();
        for segment in segments.iter() {
            if let Some(offset) = segment.find_offset_for_timestamp(ts) {
                return Some(offset);
            }
        }
        None
    }

    /// Sum of every segment's on-disk size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.segments.read().iter().map(|s| s.size()).sum()
    }

    /// The lowest offset still retained in this log (the active segment's
    /// base if the log is otherwise empty, or the oldest surviving
    /// segment's base). Used by `Fetch`'s `OffsetOutOfRange` check and by
    /// the cleaner's retention accounting.
    #[must_use]
    pub fn log_start_offset(&self) -> Offset {
        self.segments
            .read()
            .first()
            .map(Segment::base_offset)
            .unwrap_or(0)
    }

    /// Drop every record with `offset >= target`: segments entirely past
    /// `target` are discarded outright, the segment straddling `target` is
    /// truncated in place.
    pub fn truncate_to(&self, target: Offset) -> Result<()> {
        let mut segments = self.segments.write();
        segments.retain(|s| s.base_offset() < target || s.base_offset() == 0 && target == 0);
        if segments.is_empty() {
            segments.push(Arc::new(Segment::create(
                &self.dir,
                target,
                self.max_segment_bytes,
                self.index_interval,
                self.fsync_on_append,
            )?));
            return Ok(());
        }
        let last = segments.last().expect("non-empty after retain");
        last.truncate_to(target)?;
        Ok(())
    }

    /// Flush every segment's buffered writes to disk.
    pub fn flush(&self) -> Result<()> {
        for segment in self.segments.read().iter() {
            segment.flush()?;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()
    }

    /// Sealed segments eligible for retention/compaction -- every segment
    /// except the active (last) one.
    #[must_use]
    pub fn sealed_segments(&self) -> Vec<Arc<Segment>> {
        let segments = self.segments.read();
        if segments.len() <= 1 {
            return Vec::new();
        }
        segments[..segments.len() - 1].to_vec()
    }

    /// Atomically swap the log's segment list, used by the cleaner after it
    /// has built a replacement set of sealed segments (compaction) or
    /// decided to drop some (retention). `new_sealed` must be sorted by
    /// base offset and must not include the active segment; it is spliced
    /// in ahead of whatever segment is currently active.
    pub fn replace_sealed_segments(&self, new_sealed: Vec<Arc<Segment>>) {
        let mut segments = self.segments.write();
        let active = segments.last().cloned().expect("log always has an active segment");
        let mut replacement = new_sealed;
        replacement.push(active);
        *segments = replacement;
    }
}

fn discover_base_offsets(dir: &Path) -> Result<Vec<Offset>> {
    let mut bases = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            if let Ok(base) = stem.parse::<i64>() {
                bases.push(base);
            }
        }
    }
    Ok(bases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let (log, _report) = Log::open(dir.path(), 1024 * 1024, 1, false).unwrap();
        let offset = log.append(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(offset, 0);
        let rec = log.read(0).unwrap();
        assert_eq!(rec.key, b"k");
        assert_eq!(rec.value, b"v");
        assert_eq!(log.high_water_mark(), 1);
    }

    #[test]
    fn rolls_segments_on_size_cap() {
        let dir = tempdir().unwrap();
        let (log, _report) = Log::open(dir.path(), 80, 1, false).unwrap();
        for i in 0..20 {
            log.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        assert!(log.segments.read().len() > 1);
        assert_eq!(log.high_water_mark(), 20);
        assert_eq!(log.read(0).unwrap().key, b"k0");
        assert_eq!(log.read(19).unwrap().key, b"k19");
    }

    #[test]
    fn recovers_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let (log, _) = Log::open(dir.path(), 1024 * 1024, 1, false).unwrap();
            for i in 0..5 {
                log.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                    .unwrap();
            }
            log.flush().unwrap();
        }
        let (log, report) = Log::open(dir.path(), 1024 * 1024, 1, false).unwrap();
        assert_eq!(report.records_recovered, 5);
        assert_eq!(log.high_water_mark(), 5);
        assert_eq!(log.read(4).unwrap().key, b"k4");
    }

    #[test]
    fn truncate_to_drops_tail_across_segments() {
        let dir = tempdir().unwrap();
        let (log, _) = Log::open(dir.path(), 80, 1, false).unwrap();
        for i in 0..20 {
            log.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        log.truncate_to(10).unwrap();
        assert_eq!(log.high_water_mark(), 10);
        assert!(log.read(10).is_err());
        assert!(log.read(9).is_ok());
    }

    #[test]
    fn search_by_timestamp_falls_back_to_none() {
        let dir = tempdir().unwrap();
        let (log, _) = Log::open(dir.path(), 1024 * 1024, 1, false).unwrap();
        log.append_at(b"a".to_vec(), b"1".to_vec(), 100).unwrap();
        log.append_at(b"b".to_vec(), b"2".to_vec(), 200).unwrap();
        assert_eq!(log.search_by_timestamp(150), Some(1));
        assert_eq!(log.search_by_timestamp(9_999_999), None);
    }
}
