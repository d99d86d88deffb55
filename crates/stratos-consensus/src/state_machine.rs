//! Per-partition replication state machine.
//!
//! A multi-group engine keyed by `(topic, partition)`, plus one reserved
//! controller group that carries `CreateTopic`/`DeleteTopic` through the
//! same command tape as partition appends. See `DESIGN.md` for the
//! single-process quorum model used here in place of network-transported
//! Raft RPCs: every group has exactly one voter (this broker), so the
//! "quorum" a write must clear is the in-sync-replica set the topic manager
//! already tracks, not a majority vote across peer processes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::warn;

use stratos_common::config::RaftConfig;
use stratos_common::error::{ConsensusError, Result};
use stratos_common::metrics::{Metrics, NoopMetrics};
use stratos_common::types::{BrokerId, Offset, PartitionId, Timestamp, TopicConfig};
use stratos_topics::TopicManager;

use crate::command::{Acks, Command, CommandResult};
use crate::group::RaftGroup;

const CONTROLLER_TOPIC: &str = "__controller__";
const CONTROLLER_PARTITION: PartitionId = -1;

fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn apply_command(topics: &Arc<TopicManager>, command: &Command) -> Result<CommandResult> {
    match command {
        Command::CreateTopic { config } => {
            topics.create_topic(config.clone())?;
            Ok(CommandResult::Ack)
        }
        Command::DeleteTopic { name } => {
            topics.delete_topic(name)?;
            Ok(CommandResult::Ack)
        }
        Command::Append {
            topic,
            partition,
            key,
            value,
            timestamp,
        } => {
            let offset = topics
                .log_for(topic, *partition)?
                .append_at(key.clone(), value.clone(), *timestamp)?;
            Ok(CommandResult::Appended { offset })
        }
    }
}

/// The broker-core entry point for replication: leader write path,
/// follower read path, HWM propagation via the topic manager, and
/// `CreateTopic`/`DeleteTopic` routed through the same replicated tape as
/// partition appends.
pub struct ReplicationStateMachine {
    node_id: BrokerId,
    config: RaftConfig,
    topics: Arc<TopicManager>,
    groups: DashMap<(String, PartitionId), Arc<RaftGroup>>,
    metrics: Arc<dyn Metrics>,
}

impl ReplicationStateMachine {
    #[must_use]
    pub fn new(node_id: BrokerId, config: RaftConfig, topics: Arc<TopicManager>) -> Self {
        Self::with_metrics(node_id, config, topics, Arc::new(NoopMetrics))
    }

    #[must_use]
    pub fn with_metrics(
        node_id: BrokerId,
        config: RaftConfig,
        topics: Arc<TopicManager>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            node_id,
            config,
            topics,
            groups: DashMap::new(),
            metrics,
        }
    }

    fn group_for(&self, topic: &str, partition: PartitionId) -> Arc<RaftGroup> {
        self.groups
            .entry((topic.to_string(), partition))
            .or_insert_with(|| {
                let topics = self.topics.clone();
                let label = format!("{topic}-{partition}");
                Arc::new(RaftGroup::with_metrics(self.node_id, label, self.metrics.clone(), move |command| {
                    apply_command(&topics, command)
                }))
            })
            .clone()
    }

    fn controller_group(&self) -> Arc<RaftGroup> {
        self.group_for(CONTROLLER_TOPIC, CONTROLLER_PARTITION)
    }

    fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.config.apply_timeout_ms)
    }

    /// `CreateTopic` routed through the controller group's command tape
    /// rather than calling the topic manager directly, so topic creation is
    /// itself part of the replicated history other brokers would replay.
    pub fn create_topic(&self, config: TopicConfig) -> Result<()> {
        self.controller_group()
            .propose(Command::CreateTopic { config }, self.apply_timeout())?;
        Ok(())
    }

    pub fn delete_topic(&self, name: &str) -> Result<()> {
        self.controller_group().propose(
            Command::DeleteTopic { name: name.to_string() },
            self.apply_timeout(),
        )?;
        Ok(())
    }

    #[must_use]
    pub fn topics(&self) -> &Arc<TopicManager> {
        &self.topics
    }

    /// Whether this broker is the elected leader for `(topic, partition)`.
    /// Delegates to the topic manager's persisted replica view rather than
    /// the in-memory group, since leadership here is recorded at the
    /// partition level and survives group re-creation.
    pub fn is_leader(&self, topic: &str, partition: PartitionId) -> Result<bool> {
        self.topics.is_leader(topic, partition)
    }

    /// Leader write path: append locally, then honor the requested
    /// acknowledgement mode before returning the assigned offset.
    pub fn propose_append(
        &self,
        topic: &str,
        partition: PartitionId,
        key: Vec<u8>,
        value: Vec<u8>,
        acks: Acks,
    ) -> Result<Offset> {
        if !self.is_leader(topic, partition)? {
            return Err(ConsensusError::NotLeader {
                topic: topic.to_string(),
                partition,
            }
            .into());
        }

        let command = Command::Append {
            topic: topic.to_string(),
            partition,
            key,
            value,
            timestamp: now_ms(),
        };

        let group = self.group_for(topic, partition);
        let result = group.propose(command, self.apply_timeout())?;
        let offset = match result {
            CommandResult::Appended { offset } => offset,
            CommandResult::Ack => {
                return Err(ConsensusError::InvalidArgument(
                    "append command applied without producing an offset".to_string(),
                )
                .into())
            }
        };

        match acks {
            Acks::None | Acks::Leader => {}
            Acks::All => self.wait_for_isr_quorum(topic, partition, offset)?,
        }
        Ok(offset)
    }

    /// Block until every in-sync replica has fetched past `offset`, or the
    /// configured apply timeout elapses. The leader's own
    /// copy is already durable by construction, so only followers are
    /// polled.
    fn wait_for_isr_quorum(&self, topic: &str, partition: PartitionId, offset: Offset) -> Result<()> {
        let deadline = Instant::now() + self.apply_timeout();
        loop {
            let replicas = self.topics.replicas_for(topic, partition)?;
            let self_broker = self.topics.self_broker();
            let satisfied = replicas
                .isr
                .iter()
                .all(|&follower| {
                    follower == self_broker
                        || self
                            .topics
                            .follower_leo(topic, partition, follower)
                            .is_some_and(|leo| leo >= offset + 1)
                });
            if satisfied {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!(topic, partition, offset, "acks=all timed out waiting for ISR to catch up");
                return Err(ConsensusError::Timeout(self.config.apply_timeout_ms).into());
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Follower read path: zero-copy range read, bounded by the
    /// partition's high-water mark via `Log::read_range`'s own offset
    /// validation.
    pub fn follower_fetch(
        &self,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        max_bytes: usize,
    ) -> Result<(PathBuf, u64, Vec<u8>)> {
        self.topics.log_for(topic, partition)?.read_range(offset, max_bytes)
    }

    /// A follower reports its replicated offset; updates the topic
    /// manager's ISR bookkeeping.
    pub fn acknowledge_follower(
        &self,
        topic: &str,
        partition: PartitionId,
        follower: BrokerId,
        leo: Offset,
    ) -> Result<()> {
        self.topics.update_follower_leo(topic, partition, follower, leo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratos_cleaner::Cleaner;
    use stratos_common::types::TopicConfig;
    use stratos_topics::LogDefaults;
    use tempfile::tempdir;

    fn state_machine(dir: &std::path::Path) -> ReplicationStateMachine {
        let topics = Arc::new(
            TopicManager::open(
                dir,
                1,
                vec![1],
                LogDefaults {
                    max_segment_bytes: 1024 * 1024,
                    index_interval: 1,
                    fsync_on_append: false,
                },
                Cleaner::new(),
            )
            .unwrap(),
        );
        ReplicationStateMachine::new(1, RaftConfig::default(), topics)
    }

    #[test]
    fn create_topic_then_append_as_leader() {
        let dir = tempdir().unwrap();
        let sm = state_machine(dir.path());
        sm.create_topic(TopicConfig::new("orders", 1, 1)).unwrap();

        assert!(sm.is_leader("orders", 0).unwrap());
        let offset = sm
            .propose_append("orders", 0, b"k".to_vec(), b"v".to_vec(), Acks::Leader)
            .unwrap();
        assert_eq!(offset, 0);
    }

    #[test]
    fn append_rejected_when_not_leader() {
        let dir = tempdir().unwrap();
        let sm = state_machine(dir.path());
        sm.create_topic(TopicConfig::new("orders", 1, 1)).unwrap();
        sm.topics.set_leader("orders", 0, 99).unwrap();

        let result = sm.propose_append("orders", 0, b"k".to_vec(), b"v".to_vec(), Acks::Leader);
        assert!(result.is_err());
    }

    #[test]
    fn acks_all_times_out_without_followers_catching_up() {
        let dir = tempdir().unwrap();
        let topics = Arc::new(
            TopicManager::open(
                dir.path(),
                1,
                vec![1, 2, 3],
                LogDefaults {
                    max_segment_bytes: 1024 * 1024,
                    index_interval: 1,
                    fsync_on_append: false,
                },
                Cleaner::new(),
            )
            .unwrap(),
        );
        let mut config = RaftConfig::default();
        config.apply_timeout_ms = 20;
        let sm = ReplicationStateMachine::new(1, config, topics);
        sm.create_topic(TopicConfig::new("t", 1, 3)).unwrap();
        if sm.is_leader("t", 0).unwrap() {
            let result = sm.propose_append("t", 0, b"k".to_vec(), b"v".to_vec(), Acks::All);
            assert!(result.is_err());
        }
    }
}
