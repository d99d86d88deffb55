//! Shared state every dispatch handler reaches through: the replication
//! state machine (which owns the topic manager), the group coordinator,
//! the authentication collaborator, and the metrics seam.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use stratos_common::metrics::Metrics;
use stratos_common::traits::AuthProvider;
use stratos_common::types::BrokerId;
use stratos_coordinator::GroupCoordinator;
use stratos_consensus::ReplicationStateMachine;

/// In-flight producer transaction state. Transactional producer semantics
/// within this single cluster only -- no cross-cluster coordination, no
/// recovery of dangling transactions across a coordinator restart (the
/// in-memory table is lost on restart like the rest of this broker's
/// volatile state).
struct TransactionState {
    producer_id: i64,
    producer_epoch: i16,
    partitions: Vec<(String, i32)>,
}

/// Everything the dispatcher needs to answer a request, constructed once at
/// broker startup and cloned (cheaply, via `Arc`) into every connection task.
pub struct Context {
    pub node_id: BrokerId,
    pub advertised_host: String,
    pub advertised_port: u16,
    pub replication: Arc<ReplicationStateMachine>,
    pub coordinator: Arc<GroupCoordinator>,
    pub auth: Arc<dyn AuthProvider>,
    pub metrics: Arc<dyn Metrics>,
    next_producer_id: AtomicI64,
    transactions: DashMap<String, TransactionState>,
}

impl Context {
    #[must_use]
    pub fn new(
        node_id: BrokerId,
        advertised_host: String,
        advertised_port: u16,
        replication: Arc<ReplicationStateMachine>,
        coordinator: Arc<GroupCoordinator>,
        auth: Arc<dyn AuthProvider>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            node_id,
            advertised_host,
            advertised_port,
            replication,
            coordinator,
            auth,
            metrics,
            next_producer_id: AtomicI64::new(1000),
            transactions: DashMap::new(),
        }
    }

    /// Mints a producer id/epoch pair for `InitProducerId`, starting (or
    /// restarting, bumping the epoch) a transaction if `transactional_id`
    /// is non-empty.
    pub fn init_producer(&self, transactional_id: &str) -> (i64, i16) {
        if transactional_id.is_empty() {
            let id = self.next_producer_id.fetch_add(1, Ordering::SeqCst);
            return (id, 0);
        }
        let mut entry = self.transactions.entry(transactional_id.to_string()).or_insert_with(|| {
            TransactionState {
                producer_id: self.next_producer_id.fetch_add(1, Ordering::SeqCst),
                producer_epoch: 0,
                partitions: Vec::new(),
            }
        });
        if !entry.partitions.is_empty() {
            // A new `InitProducerId` for an already-initialized transactional
            // id fences any producer still holding the prior epoch.
            entry.producer_epoch += 1;
            entry.partitions.clear();
        }
        (entry.producer_id, entry.producer_epoch)
    }

    pub fn add_partitions_to_txn(&self, transactional_id: &str, partitions: Vec<(String, i32)>) {
        if let Some(mut entry) = self.transactions.get_mut(transactional_id) {
            for p in partitions {
                if !entry.partitions.contains(&p) {
                    entry.partitions.push(p);
                }
            }
        }
    }

    /// Ends the transaction, dropping its tracked partition set regardless
    /// of commit/abort -- this broker has no separate pending-vs-committed
    /// write path to roll back (every `Produce` within the transaction was
    /// already durably appended), so `EndTxn` only clears bookkeeping.
    pub fn end_txn(&self, transactional_id: &str) {
        if let Some(mut entry) = self.transactions.get_mut(transactional_id) {
            entry.partitions.clear();
        }
    }
}
