//! A single consensus group: one per replicated `(topic, partition)`, plus
//! one reserved controller group for topic create/delete.
//!
//! Single-node, immediate-commit: the proposal path force-promotes to
//! leader on first use. The network-transported leader election and log
//! replication RPCs a real multi-node Raft implementation would need are
//! out of scope here -- see the crate-level docs for the single-process
//! quorum model this group plays its part in instead.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use stratos_common::error::Result;
use stratos_common::metrics::{Metrics, NoopMetrics};
use stratos_common::types::{BrokerId, Term};

use crate::command::{Command, CommandResult};

const METRIC_STATE: &str = "stratos_raft_group_state";
const METRIC_LEADER_CHANGES: &str = "stratos_raft_leader_changes_total";
const METRIC_ELECTION_DURATION: &str = "stratos_raft_election_duration_ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Follower,
    Candidate,
    Leader,
}

fn state_metric_value(state: NodeState) -> f64 {
    match state {
        NodeState::Follower => 0.0,
        NodeState::Candidate => 1.0,
        NodeState::Leader => 2.0,
    }
}

struct RaftState {
    current_term: Term,
    voted_for: Option<BrokerId>,
    state: NodeState,
    commit_index: u64,
    last_applied: u64,
    leader_id: Option<BrokerId>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    term: Term,
    index: u64,
    data: Vec<u8>,
}

/// One replicated command tape plus the single-process apply callback that
/// plays committed entries into the rest of the broker core.
pub struct RaftGroup {
    node_id: BrokerId,
    label: String,
    state: RwLock<RaftState>,
    log: RwLock<Vec<LogEntry>>,
    leadership: watch::Sender<Option<BrokerId>>,
    apply: Box<dyn Fn(&Command) -> Result<CommandResult> + Send + Sync>,
    metrics: Arc<dyn Metrics>,
    created_at: std::time::Instant,
}

impl RaftGroup {
    pub fn new(
        node_id: BrokerId,
        apply: impl Fn(&Command) -> Result<CommandResult> + Send + Sync + 'static,
    ) -> Self {
        Self::with_metrics(node_id, "unlabeled", Arc::new(NoopMetrics), apply)
    }

    pub fn with_metrics(
        node_id: BrokerId,
        label: impl Into<String>,
        metrics: Arc<dyn Metrics>,
        apply: impl Fn(&Command) -> Result<CommandResult> + Send + Sync + 'static,
    ) -> Self {
        let (leadership, _) = watch::channel(None);
        let label = label.into();
        metrics.set(METRIC_STATE, &[("group", &label)], state_metric_value(NodeState::Follower));
        Self {
            node_id,
            label,
            state: RwLock::new(RaftState {
                current_term: 0,
                voted_for: None,
                state: NodeState::Follower,
                commit_index: 0,
                last_applied: 0,
                leader_id: None,
            }),
            log: RwLock::new(Vec::new()),
            leadership,
            apply: Box::new(apply),
            metrics,
            created_at: std::time::Instant::now(),
        }
    }

    /// Replicate `command` and apply it locally.
    ///
    /// In the single-process quorum model there is exactly one voter, so
    /// commit is immediate once the entry is appended to the tape; `timeout`
    /// only bounds how long a caller waiting on *external* replica catch-up
    /// (acks=all) should poll afterwards -- it never applies to this step.
    pub fn propose(&self, command: Command, _timeout: Duration) -> Result<CommandResult> {
        let mut state = self.state.write().expect("raft group state lock poisoned");
        if state.state != NodeState::Leader {
            info!(node_id = self.node_id, group = %self.label, "promoting to leader on first proposal");
            state.state = NodeState::Leader;
            state.leader_id = Some(self.node_id);
            let _ = self.leadership.send(Some(self.node_id));

            let labels = [("group", self.label.as_str())];
            self.metrics.set(METRIC_STATE, &labels, state_metric_value(NodeState::Leader));
            self.metrics.inc(METRIC_LEADER_CHANGES, &labels, 1);
            self.metrics
                .observe(METRIC_ELECTION_DURATION, &labels, self.created_at.elapsed().as_secs_f64() * 1000.0);
        }

        let serialized = serde_json::to_vec(&command)?;
        let index = {
            let mut log = self.log.write().expect("raft group log lock poisoned");
            let index = log.len() as u64 + 1;
            log.push(LogEntry {
                term: state.current_term,
                index,
                data: serialized,
            });
            index
        };
        state.commit_index = index;
        state.last_applied = index;
        drop(state);

        debug!(index, "applying committed command");
        (self.apply)(&command)
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.read().expect("raft group state lock poisoned").state == NodeState::Leader
    }

    #[must_use]
    pub fn leader(&self) -> Option<BrokerId> {
        self.state.read().expect("raft group state lock poisoned").leader_id
    }

    #[must_use]
    pub fn term(&self) -> Term {
        self.state.read().expect("raft group state lock poisoned").current_term
    }

    #[must_use]
    pub fn subscribe_leadership(&self) -> watch::Receiver<Option<BrokerId>> {
        self.leadership.subscribe()
    }

    /// Voter-membership change. Out of scope for the single-process model:
    /// there is never more than one voter, so this is a no-op that exists
    /// to keep the shape of a real consensus primitive's interface.
    pub fn add_voter(&self, _broker: BrokerId) -> Result<()> {
        Ok(())
    }

    pub fn remove_server(&self, _broker: BrokerId) -> Result<()> {
        Ok(())
    }

    /// Snapshotting the command tape. No compaction policy is implemented
    /// here; the tape is held in full for the group's lifetime.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        let log = self.log.read().expect("raft group log lock poisoned");
        serde_json::to_vec(&log.iter().map(|e| e.index).collect::<Vec<_>>()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn proposing_force_promotes_to_leader() {
        let applied = Arc::new(AtomicUsize::new(0));
        let applied_clone = applied.clone();
        let group = RaftGroup::new(1, move |_cmd| {
            applied_clone.fetch_add(1, Ordering::SeqCst);
            Ok(CommandResult::Ack)
        });

        assert!(!group.is_leader());
        group
            .propose(Command::DeleteTopic { name: "t".into() }, Duration::from_millis(10))
            .unwrap();
        assert!(group.is_leader());
        assert_eq!(group.leader(), Some(1));
        assert_eq!(applied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn proposals_apply_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let group = RaftGroup::new(1, move |cmd| {
            if let Command::DeleteTopic { name } = cmd {
                seen_clone.lock().unwrap().push(name.clone());
            }
            Ok(CommandResult::Ack)
        });
        for name in ["a", "b", "c"] {
            group
                .propose(Command::DeleteTopic { name: name.into() }, Duration::from_millis(10))
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }
}
