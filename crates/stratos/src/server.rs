//! Server orchestration: wires the core engine crates together and runs
//! the Kafka listener alongside their background schedulers.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;
use tracing::info;

use stratos_cleaner::Cleaner;
use stratos_common::config::BrokerConfig;
use stratos_common::metrics::{Metrics, PrometheusMetrics};
use stratos_common::types::TopicConfig;
use stratos_consensus::ReplicationStateMachine;
use stratos_coordinator::GroupCoordinator;
use stratos_protocol::kafka::{self, Context};
use stratos_topics::{LogDefaults, TopicManager};

/// The running broker: owns every core component and the background
/// tasks (cleaner, coordinator liveness tick, ISR re-evaluation) that
/// keep them converging while the Kafka listener serves requests.
pub struct Broker {
    config: BrokerConfig,
    ctx: Arc<Context>,
    cleaner: Arc<Cleaner>,
    running: Arc<RwLock<bool>>,
}

impl Broker {
    pub async fn new(config: BrokerConfig) -> Result<Self> {
        info!("initializing broker components");

        let cleaner = Cleaner::new();

        let log_defaults = LogDefaults {
            max_segment_bytes: config.log.max_segment_bytes,
            index_interval: config.log.index_interval,
            fsync_on_append: config.log.fsync_on_append,
        };
        let topics = Arc::new(TopicManager::open(
            &config.broker.data_dir,
            config.broker.id,
            vec![config.broker.id],
            log_defaults,
            cleaner.clone(),
        )?);

        let offsets_topic = config.coordinator.offsets_topic.clone();
        if topics.get_topic(&offsets_topic).is_none() {
            topics.create_topic(TopicConfig::new(&offsets_topic, 1, 1))?;
        }
        let offsets_log = topics.log_for(&offsets_topic, 0)?;

        let coordinator = Arc::new(GroupCoordinator::new(config.coordinator.clone(), offsets_log)?);

        let auth = stratos_security::default_auth_provider(&config.security);
        let metrics: Arc<dyn Metrics> = PrometheusMetrics::new();

        let replication = Arc::new(ReplicationStateMachine::with_metrics(
            config.broker.id,
            config.raft.clone(),
            topics,
            metrics.clone(),
        ));

        let ctx = Arc::new(Context::new(
            config.broker.id,
            config.kafka.bind_address.clone(),
            config.kafka.port,
            replication,
            coordinator,
            auth,
            metrics,
        ));

        info!("broker initialization complete");

        Ok(Self {
            config,
            ctx,
            cleaner,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Runs the Kafka listener and every background scheduler until one of
    /// them returns an error.
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let cleanup_interval = std::time::Duration::from_secs(self.config.cleaner.cleanup_interval_secs);
        let compaction_interval = std::time::Duration::from_secs(self.config.cleaner.compaction_interval_secs);
        self.cleaner.clone().spawn_scheduler(cleanup_interval, compaction_interval);
        self.ctx.coordinator.clone().spawn_scheduler();

        let topics = self.ctx.replication.topics().clone();
        let isr_interval = std::time::Duration::from_millis(self.config.cluster.isr_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(isr_interval);
            loop {
                ticker.tick().await;
                topics.isr_tick();
            }
        });

        info!(
            bind = %self.config.kafka.bind_address,
            port = self.config.kafka.port,
            broker_id = self.config.broker.id,
            "stratos broker started"
        );

        kafka::run(&self.config.kafka, self.ctx.clone()).await?;
        Ok(())
    }

    /// Graceful shutdown: marks the broker stopped. The listener loop
    /// itself is torn down by the process exiting; there is no persistent
    /// connection registry to drain here.
    pub async fn shutdown(&self) -> Result<()> {
        info!("initiating graceful shutdown");
        *self.running.write().await = false;
        info!("shutdown complete");
        Ok(())
    }
}
