//! Retention and log-compaction background cleaner.
//!
//! Avoids a cyclic-ownership shape ("cleaner holds pointers to logs, logs
//! live in the topic manager") by storing `(partition_key, Weak<Log>)`
//! handles rather than strong references: unregistration is trivial, and a
//! deleted partition's log is freed the moment the topic manager drops its
//! own `Arc` -- a cleanup pass racing a delete simply finds the weak
//! pointer already dead and skips it.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::RwLock;
use stratos_common::error::Result;
use stratos_common::traits::TieredArchiver;
use stratos_common::types::{CleanupPolicy, Offset, PartitionId, Record, Timestamp};
use stratos_log::record;
use stratos_log::segment::{self, Segment};
use stratos_log::Log;
use tracing::{debug, info, warn};

/// Identifies one partition's log within the cleaner's registry.
pub type PartitionKey = (String, PartitionId);

/// Per-partition cleaning policy, supplied by the topic manager at
/// registration time and refreshed whenever topic config changes.
#[derive(Debug, Clone)]
pub struct PartitionPolicy {
    /// `-1` disables size-based retention.
    pub retention_bytes: i64,
    /// `-1` disables age-based retention.
    pub retention_ms: i64,
    pub cleanup_policy: CleanupPolicy,
    pub min_cleanable_ratio: f64,
    pub max_segment_bytes: u64,
    /// How long a tombstone survives after compaction before its key is
    /// fully removed.
    pub tombstone_grace_ms: i64,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            retention_bytes: -1,
            retention_ms: 7 * 24 * 60 * 60 * 1000,
            cleanup_policy: CleanupPolicy::Delete,
            min_cleanable_ratio: 0.5,
            max_segment_bytes: 1024 * 1024 * 1024,
            tombstone_grace_ms: 24 * 60 * 60 * 1000,
        }
    }
}

fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct Entry {
    log: Weak<Log>,
    policy: RwLock<PartitionPolicy>,
    archiver: Option<Arc<dyn TieredArchiver>>,
}

/// Outcome of one retention pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupStats {
    pub segments_deleted: u64,
    pub bytes_reclaimed: u64,
}

/// Outcome of one compaction pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactionStats {
    pub partitions_compacted: u64,
    pub bytes_reclaimed: u64,
    pub duration_ms: u64,
}

/// Background retention + compaction worker shared across every registered
/// partition log.
pub struct Cleaner {
    registry: DashMap<PartitionKey, Entry>,
    running: AtomicBool,
}

impl Cleaner {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: DashMap::new(),
            running: AtomicBool::new(false),
        })
    }

    pub fn register(&self, key: PartitionKey, log: Weak<Log>, policy: PartitionPolicy) {
        self.registry.insert(
            key,
            Entry {
                log,
                policy: RwLock::new(policy),
                archiver: None,
            },
        );
    }

    pub fn register_with_archiver(
        &self,
        key: PartitionKey,
        log: Weak<Log>,
        policy: PartitionPolicy,
        archiver: Arc<dyn TieredArchiver>,
    ) {
        self.registry.insert(
            key,
            Entry {
                log,
                policy: RwLock::new(policy),
                archiver: Some(archiver),
            },
        );
    }

    pub fn unregister(&self, key: &PartitionKey) {
        self.registry.remove(key);
    }

    pub fn update_policy(&self, key: &PartitionKey, policy: PartitionPolicy) {
        if let Some(entry) = self.registry.get(key) {
            *entry.policy.write() = policy;
        }
    }

    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Apply retention (size and age) across every registered log, deleting
    /// sealed segments that fall outside the configured bounds. Never
    /// touches a log's active segment.
    pub fn run_cleanup_once(&self) -> CleanupStats {
        let mut stats = CleanupStats::default();
        let mut dead_keys = Vec::new();

        for item in self.registry.iter() {
            let key = item.key().clone();
            let Some(log) = item.value().log.upgrade() else {
                dead_keys.push(key);
                continue;
            };
            let policy = item.value().policy.read().clone();
            let archiver = item.value().archiver.clone();
            drop(item);

            match self.clean_one(&log, &policy, archiver.as_deref()) {
                Ok(partial) => {
                    stats.segments_deleted += partial.segments_deleted;
                    stats.bytes_reclaimed += partial.bytes_reclaimed;
                }
                Err(e) => warn!(topic = %key.0, partition = key.1, error = %e, "cleanup failed"),
            }
        }

        for key in dead_keys {
            self.registry.remove(&key);
        }
        stats
    }

    fn clean_one(
        &self,
        log: &Log,
        policy: &PartitionPolicy,
        archiver: Option<&dyn TieredArchiver>,
    ) -> Result<CleanupStats> {
        let sealed = log.sealed_segments();
        if sealed.is_empty() {
            return Ok(CleanupStats::default());
        }

        let now = now_ms();
        let mut running_total = log.size();
        let mut keep = Vec::new();
        let mut to_delete: Vec<Arc<Segment>> = Vec::new();

        for seg in sealed {
            let age_expired = policy.retention_ms >= 0
                && seg
                    .newest_timestamp()
                    .is_some_and(|ts| now.saturating_sub(ts) > policy.retention_ms);
            let size_expired =
                policy.retention_bytes >= 0 && running_total > policy.retention_bytes as u64;

            if age_expired || size_expired {
                running_total = running_total.saturating_sub(seg.size());
                to_delete.push(seg);
            } else {
                keep.push(seg);
            }
        }

        if to_delete.is_empty() {
            return Ok(CleanupStats::default());
        }

        log.replace_sealed_segments(keep);

        let mut stats = CleanupStats::default();
        for seg in to_delete {
            let bytes = seg.size();
            if let Some(archiver) = archiver {
                let path = segment::data_path(seg.dir(), seg.base_offset());
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    if let Err(e) = handle.block_on(archiver.archive_segment(&path)) {
                        warn!(error = %e, path = %path.display(), "tiered archive failed before deletion");
                    }
                }
            }
            match Arc::try_unwrap(seg) {
                Ok(owned) => {
                    owned.delete()?;
                    stats.segments_deleted += 1;
                    stats.bytes_reclaimed += bytes;
                }
                Err(_) => {
                    warn!("segment still referenced elsewhere; skipping delete this pass");
                }
            }
        }
        Ok(stats)
    }

    /// Compact every registered log whose policy calls for it, retaining
    /// only the newest record per key. Gated by
    /// `min_cleanable_ratio`: a log whose duplicate/tombstone fraction is
    /// below the threshold is left untouched, making a second run over an
    /// unchanged log a no-op.
    pub fn run_compaction_once(&self) -> CompactionStats {
        let start = Instant::now();
        let mut stats = CompactionStats::default();
        let mut dead_keys = Vec::new();

        for item in self.registry.iter() {
            let key = item.key().clone();
            let Some(log) = item.value().log.upgrade() else {
                dead_keys.push(key);
                continue;
            };
            let policy = item.value().policy.read().clone();
            drop(item);

            if policy.cleanup_policy != CleanupPolicy::Compact {
                continue;
            }

            match self.compact_one(&log, &policy) {
                Ok(Some(reclaimed)) => {
                    stats.partitions_compacted += 1;
                    stats.bytes_reclaimed += reclaimed;
                }
                Ok(None) => {}
                Err(e) => warn!(topic = %key.0, partition = key.1, error = %e, "compaction failed"),
            }
        }

        for key in dead_keys {
            self.registry.remove(&key);
        }
        stats.duration_ms = start.elapsed().as_millis() as u64;
        stats
    }

    fn compact_one(&self, log: &Log, policy: &PartitionPolicy) -> Result<Option<u64>> {
        let sealed = log.sealed_segments();
        if sealed.len() < 2 {
            // A single sealed segment compacting into itself still runs,
            // but an empty sealed set has nothing to do.
            if sealed.is_empty() {
                return Ok(None);
            }
        }

        let mut all_records: Vec<Record> = Vec::new();
        for seg in &sealed {
            all_records.extend(seg.read_all()?);
        }
        if all_records.is_empty() {
            return Ok(None);
        }
        all_records.sort_by_key(|r| r.offset);

        let bytes_before: u64 = all_records
            .iter()
            .map(|r| record::encoded_len(r.key.len(), r.value.len()) as u64)
            .sum();

        let mut latest: BTreeMap<Vec<u8>, Record> = BTreeMap::new();
        for rec in all_records {
            latest.insert(rec.key.clone(), rec);
        }

        let now = now_ms();
        let mut survivors: Vec<Record> = latest
            .into_values()
            .filter(|r| {
                !r.is_tombstone() || now.saturating_sub(r.timestamp) <= policy.tombstone_grace_ms
            })
            .collect();
        survivors.sort_by_key(|r| r.offset);

        let bytes_after: u64 = survivors
            .iter()
            .map(|r| record::encoded_len(r.key.len(), r.value.len()) as u64)
            .sum();

        let cleanable = bytes_before.saturating_sub(bytes_after);
        let ratio = if bytes_before == 0 {
            0.0
        } else {
            cleanable as f64 / bytes_before as f64
        };
        if ratio < policy.min_cleanable_ratio {
            debug!(ratio, threshold = policy.min_cleanable_ratio, "compaction skipped: below cleanable ratio");
            return Ok(None);
        }

        let base_offset: Offset = survivors.first().map(|r| r.offset).unwrap_or(0);
        let new_segment = Segment::write_compacted(
            log.dir(),
            base_offset,
            &survivors,
            policy.max_segment_bytes.max(bytes_after),
            1,
            false,
        )?;

        log.replace_sealed_segments(vec![Arc::new(new_segment)]);

        for seg in sealed {
            if let Ok(owned) = Arc::try_unwrap(seg) {
                owned.delete()?;
            }
        }

        info!(bytes_before, bytes_after, ratio, "compacted partition");
        Ok(Some(cleanable))
    }

    /// Drive the background scheduler: two independent `tokio::time::interval`
    /// ticks (cleanup cadence and compaction cadence), each pass running on
    /// the blocking-work pool.
    pub fn spawn_scheduler(self: &Arc<Self>, cleanup_interval: Duration, compaction_interval: Duration) {
        self.running.store(true, Ordering::SeqCst);

        let cleaner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval);
            loop {
                ticker.tick().await;
                if !cleaner.running.load(Ordering::SeqCst) {
                    break;
                }
                let cleaner = cleaner.clone();
                let stats = tokio::task::spawn_blocking(move || cleaner.run_cleanup_once())
                    .await
                    .unwrap_or_default();
                if stats.segments_deleted > 0 {
                    info!(
                        segments_deleted = stats.segments_deleted,
                        bytes_reclaimed = stats.bytes_reclaimed,
                        "retention cleanup pass"
                    );
                }
            }
        });

        let cleaner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(compaction_interval);
            loop {
                ticker.tick().await;
                if !cleaner.running.load(Ordering::SeqCst) {
                    break;
                }
                let cleaner = cleaner.clone();
                let stats = tokio::task::spawn_blocking(move || cleaner.run_compaction_once())
                    .await
                    .unwrap_or_default();
                if stats.partitions_compacted > 0 {
                    info!(
                        partitions_compacted = stats.partitions_compacted,
                        bytes_reclaimed = stats.bytes_reclaimed,
                        duration_ms = stats.duration_ms,
                        "compaction pass"
                    );
                }
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unregisters_dead_logs_on_sweep() {
        let cleaner = Cleaner::new();
        let dir = tempdir().unwrap();
        {
            let (log, _) = Log::open(dir.path(), 1024, 1, false).unwrap();
            let log = Arc::new(log);
            cleaner.register(
                ("t".into(), 0),
                Arc::downgrade(&log),
                PartitionPolicy::default(),
            );
            assert_eq!(cleaner.registered_count(), 1);
        }
        // `log` Arc dropped; weak pointer is now dead.
        let _ = cleaner.run_cleanup_once();
        assert_eq!(cleaner.registered_count(), 0);
    }

    #[test]
    fn retention_bytes_deletes_oldest_sealed_segments() {
        let dir = tempdir().unwrap();
        let (log, _) = Log::open(dir.path(), 60, 1, false).unwrap();
        for i in 0..20 {
            log.append(format!("k{i}").into_bytes(), format!("v{i}").into_bytes())
                .unwrap();
        }
        let log = Arc::new(log);
        let cleaner = Cleaner::new();
        let mut policy = PartitionPolicy::default();
        policy.retention_bytes = 100;
        cleaner.register(("t".into(), 0), Arc::downgrade(&log), policy);

        let stats = cleaner.run_cleanup_once();
        assert!(stats.segments_deleted > 0);
        assert!(log.size() <= 100 + log.sealed_segments().last().map(|s| s.size()).unwrap_or(0) + 200);
    }

    #[test]
    fn compaction_keeps_latest_value_per_key() {
        let dir = tempdir().unwrap();
        let (log, _) = Log::open(dir.path(), 40, 1, false).unwrap();
        log.append(b"a".to_vec(), b"1".to_vec()).unwrap();
        log.append(b"b".to_vec(), b"1".to_vec()).unwrap();
        log.append(b"a".to_vec(), b"2".to_vec()).unwrap();
        // Force a roll so the first segment(s) are sealed.
        for i in 0..5 {
            log.append(format!("pad{i}").into_bytes(), b"x".to_vec()).unwrap();
        }
        let log = Arc::new(log);
        let cleaner = Cleaner::new();
        let mut policy = PartitionPolicy::default();
        policy.cleanup_policy = CleanupPolicy::Compact;
        policy.min_cleanable_ratio = 0.0;
        cleaner.register(("t".into(), 0), Arc::downgrade(&log), policy);

        let stats = cleaner.run_compaction_once();
        assert_eq!(stats.partitions_compacted, 1);

        let second_pass = cleaner.run_compaction_once();
        assert_eq!(second_pass.bytes_reclaimed, 0);
    }
}
