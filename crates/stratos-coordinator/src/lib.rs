//! Consumer-group coordinator: join/sync/heartbeat lifecycle and
//! generation-fenced offset commits.
//!
//! Widens a two-state `{Stable, PreparingRebalance}` model into the full
//! five-state group machine, with real protocol negotiation and
//! generation fencing. Uses a table-walk rather than one actor per group: a
//! single background tick locks each group's state in turn, which is
//! simpler than per-group actors and fine at the group-count this broker
//! expects to carry (thousands, not millions).
//!
//! Offset commits are dual-written: an in-memory map answers `fetch_offset`
//! without I/O, and every commit is also appended to an injected
//! [`stratos_log::Log`] (conventionally the `__consumer_offsets` topic's
//! partition 0) so a restart can replay committed offsets back into memory,
//! the same "log is the source of truth" shape the rest of the broker uses
//! for topic data.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use stratos_common::config::CoordinatorConfig;
use stratos_common::error::{CoordinatorError, Result};
use stratos_common::traits::{AuditEvent, AuditSink, NoopAuditSink};
use stratos_common::types::{Offset, PartitionId};
use stratos_log::Log;

/// A group's position in its lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Empty,
    PreparingRebalance,
    AwaitingSync,
    Stable,
    Dead,
}

#[derive(Debug, Clone)]
struct Member {
    id: String,
    client_id: String,
    host: String,
    protocols: Vec<(String, Vec<u8>)>,
    session_timeout: Duration,
    rebalance_timeout: Duration,
    last_heartbeat: Instant,
    assignment: Vec<u8>,
}

impl Member {
    fn metadata_for(&self, protocol_name: &str) -> Vec<u8> {
        self.protocols
            .iter()
            .find(|(name, _)| name == protocol_name)
            .map(|(_, metadata)| metadata.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
struct CommittedOffset {
    offset: Offset,
    metadata: String,
}

struct GroupInner {
    state: GroupState,
    generation: i32,
    members: Vec<Member>,
    pending_members: HashSet<String>,
    rejoined_this_round: HashSet<String>,
    expected_members: Option<usize>,
    leader_id: Option<String>,
    protocol_type: Option<String>,
    protocol_name: Option<String>,
    rebalance_deadline: Option<Instant>,
}

impl GroupInner {
    fn empty() -> Self {
        Self {
            state: GroupState::Empty,
            generation: 0,
            members: Vec::new(),
            pending_members: HashSet::new(),
            rejoined_this_round: HashSet::new(),
            expected_members: None,
            leader_id: None,
            protocol_type: None,
            protocol_name: None,
            rebalance_deadline: None,
        }
    }

    fn member_mut(&mut self, member_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id == member_id)
    }
}

struct Group {
    inner: RwLock<GroupInner>,
}

impl Group {
    fn new() -> Self {
        Self { inner: RwLock::new(GroupInner::empty()) }
    }
}

/// Picks the protocol name every member has in common, preferring the
/// order the first (round-opening) member declared its protocols in.
fn pick_protocol(members: &[Member]) -> Option<String> {
    let first = members.first()?;
    first
        .protocols
        .iter()
        .map(|(name, _)| name.clone())
        .find(|name| members.iter().all(|m| m.protocols.iter().any(|(n, _)| n == name)))
}

#[derive(Serialize, Deserialize)]
struct OffsetCommitRecord {
    group_id: String,
    topic: String,
    partition: PartitionId,
    offset: Offset,
    metadata: String,
}

/// Result of a successful `join_group` call.
#[derive(Debug, Clone)]
pub struct JoinGroupResult {
    pub generation: i32,
    pub member_id: String,
    pub leader_id: String,
    pub protocol_name: String,
    /// `(member_id, protocol_metadata)` for every member, populated only
    /// when this call's `member_id == leader_id` -- the leader is the one
    /// who computes assignments and needs to see everyone's metadata.
    pub members: Vec<(String, Vec<u8>)>,
    /// Whether this `join_group` call itself opened a new rebalance round
    /// (vs joining one already in progress). Informational for callers/metrics.
    pub rebalance_needed: bool,
}

/// Tracks every consumer group's membership, generation and committed
/// offsets.
pub struct GroupCoordinator {
    config: CoordinatorConfig,
    groups: DashMap<String, Arc<Group>>,
    offsets: DashMap<(String, String, PartitionId), CommittedOffset>,
    offsets_log: Arc<Log>,
    audit: RwLock<Arc<dyn AuditSink>>,
}

impl GroupCoordinator {
    /// Builds a coordinator backed by `offsets_log` (conventionally the
    /// `__consumer_offsets` topic's single partition), replaying any
    /// previously committed offsets back into memory.
    pub fn new(config: CoordinatorConfig, offsets_log: Arc<Log>) -> Result<Self> {
        let offsets = DashMap::new();
        let start = offsets_log.log_start_offset();
        let hwm = offsets_log.high_water_mark();
        let mut replayed = 0u64;
        for offset in start..hwm {
            let record = match offsets_log.read(offset) {
                Ok(r) => r,
                Err(e) => {
                    warn!(offset, error = %e, "skipping unreadable offsets-log record during replay");
                    continue;
                }
            };
            if record.is_tombstone() {
                continue;
            }
            match serde_json::from_slice::<OffsetCommitRecord>(&record.value) {
                Ok(commit) => {
                    offsets.insert(
                        (commit.group_id, commit.topic, commit.partition),
                        CommittedOffset { offset: commit.offset, metadata: commit.metadata },
                    );
                    replayed += 1;
                }
                Err(e) => warn!(offset, error = %e, "skipping malformed offsets-log record during replay"),
            }
        }
        info!(replayed, "replayed committed offsets from offsets log");
        Ok(Self {
            config,
            groups: DashMap::new(),
            offsets,
            offsets_log,
            audit: RwLock::new(Arc::new(NoopAuditSink)),
        })
    }

    fn get_or_create_group(&self, group_id: &str) -> Arc<Group> {
        self.groups.entry(group_id.to_string()).or_insert_with(|| Arc::new(Group::new())).clone()
    }

    /// Joins `member_id` (or a freshly minted id if `None`) to `group_id`,
    /// blocking until the round it joined reaches `AwaitingSync` or its
    /// rebalance timeout elapses.
    #[allow(clippy::too_many_arguments)]
    pub fn join_group(
        &self,
        group_id: &str,
        member_id: Option<String>,
        client_id: &str,
        host: &str,
        protocol_type: &str,
        protocols: Vec<(String, Vec<u8>)>,
        session_timeout: Duration,
        rebalance_timeout: Duration,
    ) -> Result<JoinGroupResult> {
        let group = self.get_or_create_group(group_id);
        let member_id = member_id.unwrap_or_else(|| format!("{client_id}-{:016x}", rand::random::<u64>()));

        let rebalance_needed = {
            let mut inner = group.inner.write();

            if inner.state == GroupState::Dead {
                info!(group_id, "reincarnating dead group on new join");
                *inner = GroupInner::empty();
            }

            if !matches!(inner.state, GroupState::Empty)
                && inner.protocol_type.as_deref().is_some_and(|t| t != protocol_type)
            {
                return Err(CoordinatorError::InconsistentGroupProtocol.into());
            }

            let triggers_new_round = inner.state != GroupState::PreparingRebalance;
            if triggers_new_round {
                let prior_member_count = inner.members.len();
                inner.state = GroupState::PreparingRebalance;
                inner.generation += 1;
                inner.protocol_type = Some(protocol_type.to_string());
                inner.rejoined_this_round.clear();
                inner.rebalance_deadline = Some(Instant::now() + rebalance_timeout);
                inner.expected_members = if prior_member_count == 0 { None } else { Some(prior_member_count) };
                inner.leader_id = None;
            }

            let member = Member {
                id: member_id.clone(),
                client_id: client_id.to_string(),
                host: host.to_string(),
                protocols,
                session_timeout,
                rebalance_timeout,
                last_heartbeat: Instant::now(),
                assignment: Vec::new(),
            };
            match inner.member_mut(&member_id) {
                Some(existing) => *existing = member,
                None => inner.members.push(member),
            }
            inner.pending_members.remove(&member_id);
            inner.rejoined_this_round.insert(member_id.clone());
            if inner.leader_id.is_none() {
                inner.leader_id = Some(member_id.clone());
            }
            debug!(group_id, member_id, generation = inner.generation, "member joined");
            triggers_new_round
        };

        self.wait_for_round(&group, group_id)?;

        let inner = group.inner.read();
        let leader_id = inner.leader_id.clone().ok_or(CoordinatorError::InconsistentGroupProtocol)?;
        let protocol_name = inner.protocol_name.clone().ok_or(CoordinatorError::InconsistentGroupProtocol)?;
        let members = if member_id == leader_id {
            inner.members.iter().map(|m| (m.id.clone(), m.metadata_for(&protocol_name))).collect()
        } else {
            Vec::new()
        };
        Ok(JoinGroupResult { generation: inner.generation, member_id, leader_id, protocol_name, members, rebalance_needed })
    }

    /// Polls until `group` leaves `PreparingRebalance`, force-completing the
    /// round (pruning members who never rejoined) once its deadline passes.
    fn wait_for_round(&self, group: &Arc<Group>, group_id: &str) -> Result<()> {
        loop {
            let deadline = {
                let inner = group.inner.read();
                if inner.state != GroupState::PreparingRebalance {
                    return Ok(());
                }
                inner.rebalance_deadline
            };

            let expired = deadline.map_or(true, |d| Instant::now() >= d);
            let ready = {
                let inner = group.inner.read();
                match inner.expected_members {
                    Some(expected) => inner.rejoined_this_round.len() >= expected,
                    None => false,
                }
            };

            if ready || expired {
                let mut inner = group.inner.write();
                if inner.state == GroupState::PreparingRebalance {
                    let rejoined = inner.rejoined_this_round.clone();
                    inner.members.retain(|m| rejoined.contains(&m.id));
                    if inner.leader_id.as_deref().is_some_and(|id| !rejoined.contains(id)) {
                        inner.leader_id = inner.members.first().map(|m| m.id.clone());
                    }
                    match pick_protocol(&inner.members) {
                        Some(name) => {
                            inner.protocol_name = Some(name);
                            inner.state = GroupState::AwaitingSync;
                            info!(group_id, generation = inner.generation, members = inner.members.len(), "rebalance round closed");
                        }
                        None => {
                            warn!(group_id, "no protocol in common among joining members");
                            return Err(CoordinatorError::InconsistentGroupProtocol.into());
                        }
                    }
                }
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Supplies (leader) or awaits (follower) partition assignments for the
    /// current generation, returning this member's own assignment bytes.
    pub fn sync_group(
        &self,
        group_id: &str,
        member_id: &str,
        generation: i32,
        assignments: Option<Vec<(String, Vec<u8>)>>,
    ) -> Result<Vec<u8>> {
        let group = self
            .groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| CoordinatorError::GroupNotFound(group_id.to_string()))?;

        {
            let mut inner = group.inner.write();
            if inner.generation != generation {
                return Err(CoordinatorError::IllegalGeneration { requested: generation, current: inner.generation }.into());
            }
            if inner.member_mut(member_id).is_none() {
                return Err(CoordinatorError::UnknownMember(member_id.to_string()).into());
            }
            if let Some(assignments) = assignments {
                if inner.leader_id.as_deref() != Some(member_id) {
                    return Err(CoordinatorError::InconsistentGroupProtocol.into());
                }
                for (target, assignment) in assignments {
                    if let Some(member) = inner.member_mut(&target) {
                        member.assignment = assignment;
                    }
                }
                if inner.state == GroupState::AwaitingSync {
                    inner.state = GroupState::Stable;
                    inner.pending_members.clear();
                    info!(group_id, generation, "group stable after leader sync");
                }
            }
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.session_timeout_max_ms);
        loop {
            let inner = group.inner.read();
            if inner.generation != generation {
                return Err(CoordinatorError::IllegalGeneration { requested: generation, current: inner.generation }.into());
            }
            if inner.state == GroupState::Stable {
                return Ok(inner.members.iter().find(|m| m.id == member_id).map(|m| m.assignment.clone()).unwrap_or_default());
            }
            drop(inner);
            if Instant::now() >= deadline {
                return Err(CoordinatorError::Timeout.into());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Validates liveness and generation for `member_id`; a group mid-rebalance answers `RebalanceInProgress` so the
    /// caller knows to rejoin.
    pub fn heartbeat(&self, group_id: &str, member_id: &str, generation: i32) -> Result<()> {
        let group = self
            .groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| CoordinatorError::GroupNotFound(group_id.to_string()))?;
        let mut inner = group.inner.write();
        if inner.generation != generation {
            return Err(CoordinatorError::IllegalGeneration { requested: generation, current: inner.generation }.into());
        }
        let in_rebalance = inner.state == GroupState::PreparingRebalance || inner.state == GroupState::AwaitingSync;
        let member = inner.member_mut(member_id).ok_or_else(|| CoordinatorError::UnknownMember(member_id.to_string()))?;
        member.last_heartbeat = Instant::now();
        if in_rebalance {
            return Err(CoordinatorError::RebalanceInProgress.into());
        }
        Ok(())
    }

    /// Removes `member_id`, triggering a rebalance if the group was
    /// `Stable`, or returning it to `Empty` if it was the last member.
    pub fn leave_group(&self, group_id: &str, member_id: &str) -> Result<()> {
        let group = self
            .groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| CoordinatorError::GroupNotFound(group_id.to_string()))?;
        let mut inner = group.inner.write();
        let before = inner.members.len();
        inner.members.retain(|m| m.id != member_id);
        if inner.members.len() == before {
            return Err(CoordinatorError::UnknownMember(member_id.to_string()).into());
        }
        if inner.leader_id.as_deref() == Some(member_id) {
            inner.leader_id = None;
        }
        if inner.members.is_empty() {
            inner.state = GroupState::Empty;
            inner.leader_id = None;
            inner.protocol_name = None;
        } else if inner.state == GroupState::Stable {
            let expected = inner.members.len();
            let fallback_timeout = inner.members.first().map_or(Duration::from_secs(30), |m| m.rebalance_timeout);
            inner.state = GroupState::PreparingRebalance;
            inner.generation += 1;
            inner.rejoined_this_round.clear();
            inner.expected_members = Some(expected);
            inner.rebalance_deadline = Some(Instant::now() + fallback_timeout);
        }
        info!(group_id, member_id, "member left group");
        Ok(())
    }

    /// Commits `offset` for `(topic, partition)`, gated to `Stable` groups
    /// at the caller's current generation.
    #[allow(clippy::too_many_arguments)]
    pub fn commit_offset(
        &self,
        group_id: &str,
        member_id: &str,
        generation: i32,
        topic: &str,
        partition: PartitionId,
        offset: Offset,
        metadata: String,
    ) -> Result<()> {
        let group = self
            .groups
            .get(group_id)
            .map(|g| g.clone())
            .ok_or_else(|| CoordinatorError::GroupNotFound(group_id.to_string()))?;
        {
            let inner = group.inner.read();
            if inner.state != GroupState::Stable {
                return Err(CoordinatorError::RebalanceInProgress.into());
            }
            if inner.generation != generation {
                return Err(CoordinatorError::IllegalGeneration { requested: generation, current: inner.generation }.into());
            }
            if !inner.members.iter().any(|m| m.id == member_id) {
                return Err(CoordinatorError::UnknownMember(member_id.to_string()).into());
            }
        }
        self.persist_offset(group_id, topic, partition, offset, metadata)
    }

    /// Administrative offset reset, permitted only on `Empty`/`Dead` groups
    ///, bypassing member/generation checks.
    pub fn reset_offsets(&self, group_id: &str, offsets: &HashMap<String, HashMap<PartitionId, Offset>>) -> Result<()> {
        let group = self.get_or_create_group(group_id);
        {
            let inner = group.inner.read();
            if !matches!(inner.state, GroupState::Empty | GroupState::Dead) {
                return Err(CoordinatorError::GroupNotEmpty.into());
            }
        }
        for (topic, partitions) in offsets {
            for (&partition, &offset) in partitions {
                self.persist_offset(group_id, topic, partition, offset, String::new())?;
            }
        }
        Ok(())
    }

    fn persist_offset(&self, group_id: &str, topic: &str, partition: PartitionId, offset: Offset, metadata: String) -> Result<()> {
        let record = OffsetCommitRecord { group_id: group_id.to_string(), topic: topic.to_string(), partition, offset, metadata: metadata.clone() };
        let key = format!("{group_id}|{topic}|{partition}").into_bytes();
        let value = serde_json::to_vec(&record)?;
        self.offsets_log.append(key, value)?;
        self.offsets.insert((group_id.to_string(), topic.to_string(), partition), CommittedOffset { offset, metadata });
        Ok(())
    }

    /// Returns the last committed offset for `(group_id, topic, partition)`,
    /// or `(-1, "")` if nothing has been committed.
    #[must_use]
    pub fn fetch_offset(&self, group_id: &str, topic: &str, partition: PartitionId) -> (Offset, String) {
        self.offsets
            .get(&(group_id.to_string(), topic.to_string(), partition))
            .map_or((-1, String::new()), |c| (c.offset, c.metadata.clone()))
    }

    /// Ids and coarse state of every group this coordinator currently knows
    /// about, for `ListGroups`/`DescribeGroups`; dead groups are
    /// included since reincarnation on join means they aren't truly gone.
    #[must_use]
    pub fn list_groups(&self) -> Vec<(String, GroupState, Option<String>)> {
        self.groups
            .iter()
            .map(|entry| {
                let inner = entry.value().inner.read();
                (entry.key().clone(), inner.state, inner.protocol_type.clone())
            })
            .collect()
    }

    /// `can_delete(group) = (state ∈ {Empty, Dead}) ∧ members=∅ ∧ pending=∅`.
    #[must_use]
    pub fn can_delete(&self, group_id: &str) -> bool {
        self.groups.get(group_id).map_or(true, |group| {
            let inner = group.inner.read();
            matches!(inner.state, GroupState::Empty | GroupState::Dead) && inner.members.is_empty() && inner.pending_members.is_empty()
        })
    }

    /// Deletes `group_id` if [`Self::can_delete`] holds.
    pub fn delete_group(&self, group_id: &str) -> Result<()> {
        if !self.can_delete(group_id) {
            return Err(CoordinatorError::GroupNotEmpty.into());
        }
        if let Some(group) = self.groups.get(group_id) {
            group.inner.write().state = GroupState::Dead;
        }
        Ok(())
    }

    /// Swap in the audit collaborator for `force_delete`. Defaults to a
    /// no-op sink.
    pub fn set_audit_sink(&self, sink: Arc<dyn AuditSink>) {
        *self.audit.write() = sink;
    }

    /// Forcibly deletes `group_id`, marking it `Dead` regardless of
    /// [`Self::can_delete`].
    pub fn force_delete(&self, group_id: &str) -> Result<()> {
        let group = self.groups.get(group_id).ok_or_else(|| CoordinatorError::GroupNotFound(group_id.to_string()))?;
        let mut inner = group.inner.write();
        inner.members.clear();
        inner.pending_members.clear();
        inner.state = GroupState::Dead;
        inner.leader_id = None;
        inner.protocol_name = None;
        warn!(group_id, "group force-deleted");
        self.audit.read().record(AuditEvent::GroupForceDeleted { group_id: group_id.to_string() });
        Ok(())
    }

    /// One table-walk tick of the liveness sweep: any
    /// member whose last heartbeat is older than its own session timeout is
    /// dropped into `pending_members` and the group is pushed back into
    /// rebalance.
    pub fn tick(&self) {
        for entry in &self.groups {
            let group = entry.value();
            let mut inner = group.inner.write();
            if !matches!(inner.state, GroupState::Stable | GroupState::PreparingRebalance | GroupState::AwaitingSync) {
                continue;
            }
            let now = Instant::now();
            let (expired, alive): (Vec<Member>, Vec<Member>) =
                inner.members.drain(..).partition(|m| now.duration_since(m.last_heartbeat) > m.session_timeout);
            if expired.is_empty() {
                inner.members = alive;
                continue;
            }
            for member in &expired {
                warn!(group_id = entry.key().as_str(), member_id = member.id, "member session timed out");
                inner.pending_members.insert(member.id.clone());
            }
            inner.members = alive;
            if inner.leader_id.as_deref().is_some_and(|id| expired.iter().any(|m| m.id == id)) {
                inner.leader_id = None;
            }
            if inner.members.is_empty() {
                inner.state = GroupState::Empty;
                inner.leader_id = None;
                inner.protocol_name = None;
            } else if inner.state == GroupState::Stable {
                let expected = inner.members.len();
                let fallback_timeout = inner.members.first().map_or(Duration::from_secs(30), |m| m.rebalance_timeout);
                inner.state = GroupState::PreparingRebalance;
                inner.generation += 1;
                inner.rejoined_this_round.clear();
                inner.expected_members = Some(expected);
                inner.rebalance_deadline = Some(now + fallback_timeout);
            }
        }
    }

    /// Spawns the periodic liveness tick on a blocking-pool task, mirroring
    /// [`stratos_cleaner::Cleaner::spawn_scheduler`]'s shape.
    pub fn spawn_scheduler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval = Duration::from_millis(self.config.tick_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let coordinator = Arc::clone(&coordinator);
                let _ = tokio::task::spawn_blocking(move || coordinator.tick()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_offsets_log(dir: &std::path::Path) -> Arc<Log> {
        let (log, _report) = Log::open(dir.join("__consumer_offsets").join("partition-0"), 1024 * 1024, 10, false).unwrap();
        Arc::new(log)
    }

    fn default_config() -> CoordinatorConfig {
        CoordinatorConfig { session_timeout_min_ms: 6_000, session_timeout_max_ms: 300_000, tick_interval_ms: 1_000, offsets_topic: "__consumer_offsets".to_string() }
    }

    #[test]
    fn single_member_join_reaches_stable_after_sync() {
        let dir = tempdir().unwrap();
        let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();

        let join = coordinator
            .join_group(
                "g1",
                None,
                "client-a",
                "host-a",
                "consumer",
                vec![("range".to_string(), b"meta".to_vec())],
                Duration::from_secs(10),
                Duration::from_millis(50),
            )
            .unwrap();
        assert_eq!(join.generation, 1);
        assert_eq!(join.leader_id, join.member_id);
        assert_eq!(join.protocol_name, "range");
        assert_eq!(join.members.len(), 1);

        let assignment = coordinator
            .sync_group("g1", &join.member_id, join.generation, Some(vec![(join.member_id.clone(), b"assignment".to_vec())]))
            .unwrap();
        assert_eq!(assignment, b"assignment");

        coordinator.commit_offset("g1", &join.member_id, join.generation, "topic-a", 0, 42, String::new()).unwrap();
        assert_eq!(coordinator.fetch_offset("g1", "topic-a", 0), (42, String::new()));
    }

    #[test]
    fn mismatched_generation_is_rejected() {
        let dir = tempdir().unwrap();
        let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();
        let join = coordinator
            .join_group("g1", None, "client-a", "host-a", "consumer", vec![("range".to_string(), vec![])], Duration::from_secs(10), Duration::from_millis(50))
            .unwrap();
        coordinator.sync_group("g1", &join.member_id, join.generation, Some(vec![(join.member_id.clone(), vec![])])).unwrap();

        let err = coordinator.heartbeat("g1", &join.member_id, join.generation + 1).unwrap_err();
        assert!(matches!(err, stratos_common::error::Error::Coordinator(CoordinatorError::IllegalGeneration { .. })));
    }

    #[test]
    fn inconsistent_protocols_fail_join() {
        let dir = tempdir().unwrap();
        let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();
        let group = coordinator.get_or_create_group("g1");
        {
            let mut inner = group.inner.write();
            inner.state = GroupState::PreparingRebalance;
            inner.rebalance_deadline = Some(Instant::now());
            inner.expected_members = Some(1);
            inner.members.push(Member {
                id: "m1".to_string(),
                client_id: "c1".to_string(),
                host: "h1".to_string(),
                protocols: vec![("range".to_string(), vec![])],
                session_timeout: Duration::from_secs(10),
                rebalance_timeout: Duration::from_millis(10),
                last_heartbeat: Instant::now(),
                assignment: vec![],
            });
            inner.members.push(Member {
                id: "m2".to_string(),
                client_id: "c2".to_string(),
                host: "h2".to_string(),
                protocols: vec![("roundrobin".to_string(), vec![])],
                session_timeout: Duration::from_secs(10),
                rebalance_timeout: Duration::from_millis(10),
                last_heartbeat: Instant::now(),
                assignment: vec![],
            });
            inner.rejoined_this_round.insert("m1".to_string());
            inner.rejoined_this_round.insert("m2".to_string());
        }
        let err = coordinator.wait_for_round(&group, "g1").unwrap_err();
        assert!(matches!(err, stratos_common::error::Error::Coordinator(CoordinatorError::InconsistentGroupProtocol)));
    }

    #[test]
    fn reset_offsets_rejected_while_group_active() {
        let dir = tempdir().unwrap();
        let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();
        let join = coordinator
            .join_group("g1", None, "client-a", "host-a", "consumer", vec![("range".to_string(), vec![])], Duration::from_secs(10), Duration::from_millis(50))
            .unwrap();
        coordinator.sync_group("g1", &join.member_id, join.generation, Some(vec![(join.member_id.clone(), vec![])])).unwrap();

        let mut offsets = HashMap::new();
        offsets.insert("topic-a".to_string(), HashMap::from([(0, 10)]));
        let err = coordinator.reset_offsets("g1", &offsets).unwrap_err();
        assert!(matches!(err, stratos_common::error::Error::Coordinator(CoordinatorError::GroupNotEmpty)));
    }

    #[test]
    fn replays_committed_offsets_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();
            let join = coordinator
                .join_group("g1", None, "client-a", "host-a", "consumer", vec![("range".to_string(), vec![])], Duration::from_secs(10), Duration::from_millis(50))
                .unwrap();
            coordinator.sync_group("g1", &join.member_id, join.generation, Some(vec![(join.member_id.clone(), vec![])])).unwrap();
            coordinator.commit_offset("g1", &join.member_id, join.generation, "topic-a", 0, 7, "meta".to_string()).unwrap();
        }
        let coordinator = GroupCoordinator::new(default_config(), open_offsets_log(dir.path())).unwrap();
        assert_eq!(coordinator.fetch_offset("g1", "topic-a", 0), (7, "meta".to_string()));
    }
}
