//! Typed configuration for the broker.
//!
//! Each core crate takes its own sub-config rather than reading files
//! itself; only the binary crate (`stratos`) loads a [`BrokerConfig`] off
//! disk and hands sub-configs down to the components it constructs.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Top-level configuration for one broker process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub broker: BrokerIdentity,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub cleaner: CleanerConfig,
    #[serde(default)]
    pub raft: RaftConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub kafka: KafkaListenerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerIdentity::default(),
            log: LogConfig::default(),
            cleaner: CleanerConfig::default(),
            raft: RaftConfig::default(),
            cluster: ClusterConfig::default(),
            coordinator: CoordinatorConfig::default(),
            kafka: KafkaListenerConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load from a TOML or YAML file, inferred from the extension. File
    /// parsing lives outside the core -- this is the collaborator entry
    /// point the binary crate uses.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;

        let is_toml = path
            .as_ref()
            .extension()
            .is_some_and(|ext| ext == "toml");

        let config: Self = if is_toml {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse TOML config: {e}")))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("failed to parse YAML config: {e}")))?
        };

        Ok(config)
    }
}

/// Identity of this broker within the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerIdentity {
    pub id: i64,
    pub data_dir: String,
}

impl Default for BrokerIdentity {
    fn default() -> Self {
        Self {
            id: 1,
            data_dir: "/var/lib/stratos".to_string(),
        }
    }
}

/// Log/segment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Cap on one segment's data file size before it seals and the log rolls.
    pub max_segment_bytes: u64,
    /// Number of records between `.index`/`.timeindex` entries. `1` is a
    /// dense index (the default); `>1` is sparse.
    pub index_interval: u32,
    /// Whether `Log::append` calls `fsync` after every write.
    pub fsync_on_append: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_segment_bytes: 1024 * 1024 * 1024,
            index_interval: 1,
            fsync_on_append: false,
        }
    }
}

/// Retention/compaction cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    pub cleanup_interval_secs: u64,
    pub compaction_interval_secs: u64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: 300,
            compaction_interval_secs: 60,
        }
    }
}

/// Consensus primitive tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    pub raft_dir: String,
    pub apply_timeout_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            raft_dir: "/var/lib/stratos/raft".to_string(),
            apply_timeout_ms: 10_000,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
        }
    }
}

/// Topic/partition manager tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub default_partitions: u32,
    pub default_replication_factor: i16,
    pub isr_check_interval_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            default_partitions: 3,
            default_replication_factor: 1,
            isr_check_interval_ms: 1_000,
        }
    }
}

/// Group coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub session_timeout_min_ms: u64,
    pub session_timeout_max_ms: u64,
    pub tick_interval_ms: u64,
    pub offsets_topic: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session_timeout_min_ms: 6_000,
            session_timeout_max_ms: 300_000,
            tick_interval_ms: 1_000,
            offsets_topic: "__consumer_offsets".to_string(),
        }
    }
}

/// Wire-protocol listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaListenerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for KafkaListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9092,
        }
    }
}

/// Stub for the out-of-core SASL/TLS collaborator: the core only
/// needs to know whether to demand a handshake before `ApiVersions`, never
/// how credentials are hashed or stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub auth_required: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auth_required: false,
        }
    }
}
