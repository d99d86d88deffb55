//! Topic/partition manager: owns every partition's [`Log`], persists topic
//! metadata atomically, and tracks the per-partition replication view.
//!
//! Partitions live on disk backed by [`stratos_log::Log`], with metadata
//! persisted to `topic-metadata.json` via temp-file-then-rename rather
//! than living only in process memory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use stratos_cleaner::{Cleaner, PartitionPolicy};
use stratos_common::error::{Result, TopicsError};
use stratos_common::traits::{AuditEvent, AuditSink, NoopAuditSink};
use stratos_common::types::{
    BrokerId, Offset, PartitionId, PartitionReplicas, TopicConfig, TopicMetadata,
};
use stratos_log::Log;

/// Log-tuning knobs a [`TopicManager`] applies to every partition it opens;
/// supplied once at construction from [`stratos_common::config::LogConfig`].
#[derive(Debug, Clone, Copy)]
pub struct LogDefaults {
    pub max_segment_bytes: u64,
    pub index_interval: u32,
    pub fsync_on_append: bool,
}

/// Per-follower replication progress the leader tracks for ISR computation.
#[derive(Debug, Clone, Copy)]
struct FollowerState {
    leo: Offset,
    last_fetch_at: Instant,
}

struct TopicState {
    metadata: RwLock<TopicMetadata>,
    logs: HashMap<PartitionId, Arc<Log>>,
    /// Keyed by `(partition, follower_broker)`.
    follower_state: DashMap<(PartitionId, BrokerId), FollowerState>,
}

fn topic_dir(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(name)
}

fn partition_dir(data_dir: &Path, name: &str, partition: PartitionId) -> PathBuf {
    topic_dir(data_dir, name).join(format!("partition-{partition}"))
}

fn metadata_path(data_dir: &Path, name: &str) -> PathBuf {
    topic_dir(data_dir, name).join("topic-metadata.json")
}

/// Owns every topic's partitions; the sole writer of `topic-metadata.json`.
pub struct TopicManager {
    data_dir: PathBuf,
    self_broker: BrokerId,
    /// The broker set new topics place replicas across, round-robinned
    /// starting from a rotating offset per topic, computed once at
    /// creation instead of recomputed on every broker join/leave.
    brokers: Vec<BrokerId>,
    log_defaults: LogDefaults,
    cleaner: Arc<Cleaner>,
    topics: RwLock<HashMap<String, Arc<TopicState>>>,
    placement_rotation: AtomicU64,
    audit: RwLock<Arc<dyn AuditSink>>,
}

impl TopicManager {
    /// Open the manager rooted at `data_dir`, scanning every topic directory
    /// found there and recovering its partitions.
    pub fn open(
        data_dir: impl AsRef<Path>,
        self_broker: BrokerId,
        brokers: Vec<BrokerId>,
        log_defaults: LogDefaults,
        cleaner: Arc<Cleaner>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let manager = Self {
            data_dir,
            self_broker,
            brokers,
            log_defaults,
            cleaner,
            topics: RwLock::new(HashMap::new()),
            placement_rotation: AtomicU64::new(0),
            audit: RwLock::new(Arc::new(NoopAuditSink)),
        };

        for entry in fs::read_dir(&manager.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Err(e) = manager.load_topic(&name) {
                warn!(topic = %name, error = %e, "failed to recover topic on startup");
            }
        }

        Ok(manager)
    }

    fn load_topic(&self, name: &str) -> Result<()> {
        let dir = topic_dir(&self.data_dir, name);
        let meta_path = metadata_path(&self.data_dir, name);

        let metadata = fs::read(&meta_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<TopicMetadata>(&bytes).ok());

        let n_partitions = metadata
            .as_ref()
            .map(|m| m.config.n_partitions)
            .unwrap_or_else(|| count_partition_dirs(&dir));

        let metadata = metadata.unwrap_or_else(|| {
            debug!(topic = name, "no valid metadata found; using single-broker default");
            TopicMetadata::single_broker_default(name, n_partitions.max(1), self.self_broker)
        });

        let mut logs = HashMap::new();
        for partition in 0..metadata.config.n_partitions as PartitionId {
            let (log, report) = Log::open(
                partition_dir(&self.data_dir, name, partition),
                self.log_defaults.max_segment_bytes,
                self.log_defaults.index_interval,
                self.log_defaults.fsync_on_append,
            )?;
            if report.corruption_detected {
                warn!(topic = name, partition, ?report, "partition recovered with corruption");
            }
            let log = Arc::new(log);
            self.cleaner.register(
                (name.to_string(), partition),
                Arc::downgrade(&log),
                policy_from_config(&metadata.config),
            );
            logs.insert(partition, log);
        }

        self.topics.write().insert(
            name.to_string(),
            Arc::new(TopicState {
                metadata: RwLock::new(metadata),
                logs,
                follower_state: DashMap::new(),
            }),
        );
        Ok(())
    }

    fn persist(&self, name: &str, metadata: &TopicMetadata) -> Result<()> {
        let dir = topic_dir(&self.data_dir, name);
        fs::create_dir_all(&dir)?;
        let path = metadata_path(&self.data_dir, name);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(metadata)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Assign `replication_factor` replicas to each of `n_partitions`,
    /// round-robinning the broker set starting from a rotating per-call
    /// offset so successive topics do not all prefer the same leader.
    fn place_replicas(&self, n_partitions: u32, replication_factor: i16) -> Vec<PartitionReplicas> {
        if self.brokers.is_empty() {
            return (0..n_partitions)
                .map(|_| PartitionReplicas {
                    replicas: vec![self.self_broker],
                    isr: vec![self.self_broker],
                    leader: Some(self.self_broker),
                })
                .collect();
        }

        let start = self.placement_rotation.fetch_add(1, Ordering::SeqCst) as usize;
        let rf = (replication_factor.max(1) as usize).min(self.brokers.len());
        (0..n_partitions as usize)
            .map(|i| {
                let leader_idx = (start + i) % self.brokers.len();
                let mut replicas = Vec::with_capacity(rf);
                for j in 0..rf {
                    replicas.push(self.brokers[(leader_idx + j) % self.brokers.len()]);
                }
                PartitionReplicas {
                    isr: replicas.clone(),
                    leader: Some(replicas[0]),
                    replicas,
                }
            })
            .collect()
    }

    /// Atomic end-to-end topic creation: directories + logs
    /// open first, metadata written last; any failure rolls back whatever
    /// directories were already created.
    pub fn create_topic(&self, config: TopicConfig) -> Result<()> {
        if self.topics.read().contains_key(&config.name) {
            return Err(TopicsError::TopicAlreadyExists(config.name).into());
        }

        let placements = self.place_replicas(config.n_partitions, config.replication_factor);
        let mut partitions = HashMap::new();
        let mut logs = HashMap::new();
        let mut created_dirs = Vec::new();

        let result = (|| -> Result<()> {
            for (i, placement) in placements.into_iter().enumerate() {
                let partition = i as PartitionId;
                let dir = partition_dir(&self.data_dir, &config.name, partition);
                fs::create_dir_all(&dir)?;
                created_dirs.push(dir.clone());

                let (log, _report) = Log::open(
                    &dir,
                    config.segment_bytes,
                    self.log_defaults.index_interval,
                    self.log_defaults.fsync_on_append,
                )?;
                logs.insert(partition, Arc::new(log));
                partitions.insert(partition, placement);
            }
            Ok(())
        })();

        if let Err(e) = result {
            for dir in &created_dirs {
                let _ = fs::remove_dir_all(dir);
            }
            return Err(e);
        }

        let metadata = TopicMetadata {
            config: config.clone(),
            partitions,
        };
        if let Err(e) = self.persist(&config.name, &metadata) {
            for dir in &created_dirs {
                let _ = fs::remove_dir_all(dir);
            }
            return Err(e);
        }

        for (partition, log) in &logs {
            self.cleaner.register(
                (config.name.clone(), *partition),
                Arc::downgrade(log),
                policy_from_config(&config),
            );
        }

        self.topics.write().insert(
            config.name.clone(),
            Arc::new(TopicState {
                metadata: RwLock::new(metadata),
                logs,
                follower_state: DashMap::new(),
            }),
        );
        info!(topic = %config.name, n_partitions = config.n_partitions, "topic created");
        self.audit.read().record(AuditEvent::TopicCreated {
            name: config.name,
            n_partitions: config.n_partitions,
        });
        Ok(())
    }

    /// Unregister from the cleaner, close every partition log, then remove
    /// the topic directory. Reports the first error but keeps going so no
    /// file handle leaks.
    pub fn delete_topic(&self, name: &str) -> Result<()> {
        let removed = self
            .topics
            .write()
            .remove(name)
            .ok_or_else(|| TopicsError::TopicNotFound(name.to_string()))?;

        let mut first_err = None;
        for (partition, log) in &removed.logs {
            self.cleaner.unregister(&(name.to_string(), *partition));
            if let Err(e) = log.close() {
                warn!(topic = name, partition, error = %e, "error closing partition log during delete");
                first_err.get_or_insert(e);
            }
        }

        let dir = topic_dir(&self.data_dir, name);
        if let Err(e) = fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(topic = name, error = %e, "error removing topic directory");
                first_err.get_or_insert(e.into());
            }
        }

        info!(topic = name, "topic deleted");
        self.audit.read().record(AuditEvent::TopicDeleted { name: name.to_string() });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Swap in the audit collaborator for `create_topic`/`delete_topic`
    /// mutations. Defaults to a no-op sink.
    pub fn set_audit_sink(&self, sink: Arc<dyn AuditSink>) {
        *self.audit.write() = sink;
    }

    #[must_use]
    pub fn get_topic(&self, name: &str) -> Option<TopicMetadata> {
        self.topics.read().get(name).map(|t| t.metadata.read().clone())
    }

    #[must_use]
    pub fn list_topics(&self) -> Vec<String> {
        self.topics.read().keys().cloned().collect()
    }

    fn state(&self, name: &str) -> Result<Arc<TopicState>> {
        self.topics
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TopicsError::TopicNotFound(name.to_string()).into())
    }

    /// The [`Log`] backing one partition, for the replication state machine
    /// and the protocol dispatcher's produce/fetch path.
    pub fn log_for(&self, topic: &str, partition: PartitionId) -> Result<Arc<Log>> {
        let state = self.state(topic)?;
        state
            .logs
            .get(&partition)
            .cloned()
            .ok_or_else(|| TopicsError::PartitionNotFound {
                topic: topic.to_string(),
                partition,
            }.into())
    }

    #[must_use]
    pub fn self_broker(&self) -> BrokerId {
        self.self_broker
    }

    pub fn replicas_for(&self, topic: &str, partition: PartitionId) -> Result<PartitionReplicas> {
        let state = self.state(topic)?;
        state
            .metadata
            .read()
            .partitions
            .get(&partition)
            .cloned()
            .ok_or_else(|| TopicsError::PartitionNotFound {
                topic: topic.to_string(),
                partition,
            }.into())
    }

    pub fn is_leader(&self, topic: &str, partition: PartitionId) -> Result<bool> {
        Ok(self.replicas_for(topic, partition)?.leader == Some(self.self_broker))
    }

    /// Record the leader role for a partition, as signaled by the consensus
    /// primitive's election, and persist.
    pub fn set_leader(&self, topic: &str, partition: PartitionId, leader: BrokerId) -> Result<()> {
        let state = self.state(topic)?;
        {
            let mut metadata = state.metadata.write();
            let entry = metadata.partitions.get_mut(&partition).ok_or_else(|| {
                TopicsError::PartitionNotFound {
                    topic: topic.to_string(),
                    partition,
                }
            })?;
            entry.leader = Some(leader);
            if !entry.isr.contains(&leader) {
                entry.isr.push(leader);
            }
        }
        let snapshot = state.metadata.read().clone();
        self.persist(topic, &snapshot)
    }

    /// Update a follower's observed LEO/fetch-time and recompute ISR
    /// membership for the partition: in-sync iff
    /// `(leader_leo - follower_leo) <= 1` and the follower's last fetch is
    /// within `replica_lag_max_ms`. Persists the new ISR if it changed.
    pub fn update_follower_leo(
        &self,
        topic: &str,
        partition: PartitionId,
        follower: BrokerId,
        follower_leo: Offset,
    ) -> Result<()> {
        let state = self.state(topic)?;
        state.follower_state.insert(
            (partition, follower),
            FollowerState {
                leo: follower_leo,
                last_fetch_at: Instant::now(),
            },
        );
        self.recompute_isr(topic, partition)
    }

    fn recompute_isr(&self, topic: &str, partition: PartitionId) -> Result<()> {
        let state = self.state(topic)?;
        let leader_leo = self.log_for(topic, partition)?.high_water_mark();

        let mut metadata = state.metadata.write();
        let replica_lag_max_ms = metadata.config.replica_lag_max_ms;
        let entry = metadata.partitions.get_mut(&partition).ok_or_else(|| {
            TopicsError::PartitionNotFound {
                topic: topic.to_string(),
                partition,
            }
        })?;
        let leader = entry.leader;

        let mut new_isr = Vec::new();
        for &replica in &entry.replicas {
            if Some(replica) == leader {
                new_isr.push(replica);
                continue;
            }
            let Some(fs) = state.follower_state.get(&(partition, replica)) else {
                continue;
            };
            let caught_up = leader_leo.saturating_sub(fs.leo) <= 1;
            let recent = fs.last_fetch_at.elapsed() <= Duration::from_millis(replica_lag_max_ms.max(0) as u64);
            if caught_up && recent {
                new_isr.push(replica);
            }
        }

        let changed = new_isr != entry.isr;
        entry.isr = new_isr;
        drop(metadata);

        if changed {
            let snapshot = state.metadata.read().clone();
            self.persist(topic, &snapshot)?;
        }
        Ok(())
    }

    /// Periodic tick: re-evaluates
    /// ISR for every partition of every topic, evicting followers whose last
    /// fetch has aged past `replica_lag_max_ms` even without a new LEO
    /// update arriving.
    pub fn isr_tick(&self) {
        let topics: Vec<(String, Vec<PartitionId>)> = self
            .topics
            .read()
            .iter()
            .map(|(name, state)| (name.clone(), state.logs.keys().copied().collect()))
            .collect();

        for (topic, partitions) in topics {
            for partition in partitions {
                if let Err(e) = self.recompute_isr(&topic, partition) {
                    warn!(topic = %topic, partition, error = %e, "isr tick failed");
                }
            }
        }
    }

    /// Last-known LEO/last-fetch for a follower, used by replication's
    /// `acknowledge_follower` and by `DescribeLogDirs`-style admin reads.
    #[must_use]
    pub fn follower_leo(&self, topic: &str, partition: PartitionId, follower: BrokerId) -> Option<Offset> {
        self.topics
            .read()
            .get(topic)?
            .follower_state
            .get(&(partition, follower))
            .map(|e| e.leo)
    }

    /// The log's recorded high-water mark, surfaced here so callers that
    /// only hold a `TopicManager` (not a `Log`) can bound fetches.
    pub fn high_water_mark(&self, topic: &str, partition: PartitionId) -> Result<Offset> {
        Ok(self.log_for(topic, partition)?.high_water_mark())
    }
}

fn policy_from_config(config: &TopicConfig) -> PartitionPolicy {
    PartitionPolicy {
        retention_bytes: config.retention_bytes,
        retention_ms: config.retention_ms,
        cleanup_policy: config.cleanup_policy,
        min_cleanable_ratio: config.min_cleanable_ratio,
        max_segment_bytes: config.segment_bytes,
        tombstone_grace_ms: 24 * 60 * 60 * 1000,
    }
}

fn count_partition_dirs(topic_dir: &Path) -> u32 {
    fs::read_dir(topic_dir)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .filter(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with("partition-")
                })
                .count() as u32
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &Path) -> TopicManager {
        TopicManager::open(
            dir,
            1,
            vec![1, 2, 3],
            LogDefaults {
                max_segment_bytes: 1024 * 1024,
                index_interval: 1,
                fsync_on_append: false,
            },
            Cleaner::new(),
        )
        .unwrap()
    }

    #[test]
    fn create_then_append_and_read() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create_topic(TopicConfig::new("orders", 2, 1)).unwrap();

        assert_eq!(mgr.list_topics(), vec!["orders".to_string()]);
        let log = mgr.log_for("orders", 0).unwrap();
        let offset = log.append(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(mgr.high_water_mark("orders", 0).unwrap(), 1);
    }

    #[test]
    fn create_topic_twice_fails() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create_topic(TopicConfig::new("t", 1, 1)).unwrap();
        assert!(mgr.create_topic(TopicConfig::new("t", 1, 1)).is_err());
    }

    #[test]
    fn delete_topic_removes_directory() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create_topic(TopicConfig::new("t", 1, 1)).unwrap();
        mgr.delete_topic("t").unwrap();
        assert!(mgr.get_topic("t").is_none());
        assert!(!topic_dir(dir.path(), "t").exists());
    }

    #[test]
    fn reopen_recovers_topics_from_metadata() {
        let dir = tempdir().unwrap();
        {
            let mgr = manager(dir.path());
            mgr.create_topic(TopicConfig::new("t", 1, 1)).unwrap();
            mgr.log_for("t", 0).unwrap().append(b"k".to_vec(), b"v".to_vec()).unwrap();
        }
        let mgr = manager(dir.path());
        assert_eq!(mgr.list_topics(), vec!["t".to_string()]);
        assert_eq!(mgr.high_water_mark("t", 0).unwrap(), 1);
    }

    #[test]
    fn isr_excludes_stale_followers() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.create_topic(TopicConfig::new("t", 1, 3)).unwrap();
        mgr.log_for("t", 0).unwrap().append(b"k".to_vec(), b"v".to_vec()).unwrap();

        let replicas = mgr.replicas_for("t", 0).unwrap();
        let leader = replicas.leader.unwrap();
        let follower = replicas.replicas.iter().find(|&&r| r != leader).copied().unwrap();

        mgr.update_follower_leo("t", 0, follower, 1).unwrap();
        assert!(mgr.replicas_for("t", 0).unwrap().isr.contains(&follower));

        // Simulate the follower aging out: directly shrink replica_lag_max_ms
        // via a fresh topic with a tiny bound and a fetch we never refresh.
        let dir2 = tempdir().unwrap();
        let mgr2 = manager(dir2.path());
        let mut cfg = TopicConfig::new("fast", 1, 3);
        cfg.replica_lag_max_ms = 0;
        mgr2.create_topic(cfg).unwrap();
        let replicas2 = mgr2.replicas_for("fast", 0).unwrap();
        let leader2 = replicas2.leader.unwrap();
        let follower2 = replicas2.replicas.iter().find(|&&r| r != leader2).copied().unwrap();
        mgr2.update_follower_leo("fast", 0, follower2, 0).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        mgr2.isr_tick();
        assert!(!mgr2.replicas_for("fast", 0).unwrap().isr.contains(&follower2));
    }
}
