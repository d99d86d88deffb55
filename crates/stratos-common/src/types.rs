//! Core data model shared by every broker subsystem.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Offset of a record within a partition. Assigned by the log, strictly
/// increasing and contiguous.
pub type Offset = i64;

/// Milliseconds since the Unix epoch, producer-supplied.
pub type Timestamp = i64;

/// Partition index within a topic, `0..n_partitions`.
pub type PartitionId = i32;

/// Broker identifier within a cluster.
pub type BrokerId = i64;

/// Raft-style term/generation counter for the consensus primitive.
pub type Term = u64;

/// The atomic unit of storage.
///
/// `headers` rides along through produce/fetch at the API level but plays
/// no role in offset assignment or compaction, and is not part of the
/// on-disk record framing (see `stratos_log::record`) -- it never survives
/// a log append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub offset: Offset,
    pub timestamp: Timestamp,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Record {
    #[must_use]
    pub fn new(offset: Offset, timestamp: Timestamp, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            offset,
            timestamp,
            key,
            value,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    /// A tombstone is a record with an empty value, signaling key deletion
    /// under log compaction.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// Metadata returned to a producer after a successful append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub timestamp: Timestamp,
}

/// Cleanup policy for a topic's sealed segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    Delete,
    Compact,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        CleanupPolicy::Delete
    }
}

/// Per-partition replication view held by the topic manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionReplicas {
    /// Ordered; index 0 is the preferred leader.
    pub replicas: Vec<BrokerId>,
    /// Subset of `replicas` currently caught up.
    pub isr: Vec<BrokerId>,
    /// Current leader, if elected.
    pub leader: Option<BrokerId>,
}

/// Topic-level configuration persisted alongside replication metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub n_partitions: u32,
    pub replication_factor: i16,
    #[serde(default = "default_replica_lag_max_ms")]
    pub replica_lag_max_ms: i64,
    #[serde(default = "default_retention_ms")]
    pub retention_ms: i64,
    #[serde(default = "default_retention_bytes")]
    pub retention_bytes: i64,
    #[serde(default = "default_segment_bytes")]
    pub segment_bytes: u64,
    #[serde(default)]
    pub cleanup_policy: CleanupPolicy,
    #[serde(default = "default_min_cleanable_ratio")]
    pub min_cleanable_ratio: f64,
}

fn default_replica_lag_max_ms() -> i64 {
    10_000
}
fn default_retention_ms() -> i64 {
    7 * 24 * 60 * 60 * 1000
}
fn default_retention_bytes() -> i64 {
    -1
}
fn default_segment_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_min_cleanable_ratio() -> f64 {
    0.5
}

impl TopicConfig {
    #[must_use]
    pub fn new(name: impl Into<String>, n_partitions: u32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            n_partitions,
            replication_factor,
            replica_lag_max_ms: default_replica_lag_max_ms(),
            retention_ms: default_retention_ms(),
            retention_bytes: default_retention_bytes(),
            segment_bytes: default_segment_bytes(),
            cleanup_policy: CleanupPolicy::default(),
            min_cleanable_ratio: default_min_cleanable_ratio(),
        }
    }
}

/// Persisted topic metadata: `<data_dir>/<topic>/topic-metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMetadata {
    pub config: TopicConfig,
    pub partitions: HashMap<PartitionId, PartitionReplicas>,
}

impl TopicMetadata {
    /// The clean default a manager falls back to for a topic directory
    /// found without (or with corrupt) metadata: `replication_factor=1`,
    /// `replicas=[self]`, `isr=[self]`.
    #[must_use]
    pub fn single_broker_default(name: &str, n_partitions: u32, self_broker: BrokerId) -> Self {
        let mut partitions = HashMap::new();
        for p in 0..n_partitions as PartitionId {
            partitions.insert(
                p,
                PartitionReplicas {
                    replicas: vec![self_broker],
                    isr: vec![self_broker],
                    leader: Some(self_broker),
                },
            );
        }
        Self {
            config: TopicConfig::new(name, n_partitions, 1),
            partitions,
        }
    }
}
