//! Decodes a request body past its header, routes it to the owning
//! component (§4.A-F), and encodes the response.
//!
//! Per-API version fidelity is out of scope (see [`super::api_keys`]):
//! every handler here speaks exactly one wire shape per API key, the
//! `ApiVersions` range it advertises notwithstanding. `dispatch` never
//! returns an `Err` -- every failure, including an unsupported API key or
//! version, is encoded into the response body with the matching Kafka
//! error code so the connection loop never has to special-case it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use stratos_common::error::{Error, ProtocolError};
use stratos_common::types::{PartitionId, TopicConfig};
use stratos_consensus::Acks;
use stratos_coordinator::GroupState;

use super::api_keys as keys;
use super::codec::*;
use super::context::Context;

fn error_code_of(e: &Error) -> i16 {
    e.kafka_error_code() as i16
}

/// A blocking handler panicked on the blocking-work pool; the request
/// fails rather than poisoning the caller's async task.
fn blocking_panicked(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("blocking handler panicked: {e}"))
}

/// Routes one already-header-stripped request body to its handler.
/// `header.api_version` is validated against [`keys::SUPPORTED_VERSIONS`]
/// before dispatch; callers past that point always get `api_key`'s one
/// wire shape regardless of the negotiated version.
pub async fn dispatch(ctx: Arc<Context>, header: RequestHeader, body: Bytes) -> BytesMut {
    let mut out = BytesMut::new();

    if header.api_key != keys::API_VERSIONS && !version_supported(header.api_key, header.api_version) {
        warn!(api_key = header.api_key, version = header.api_version, "unsupported api version");
        write_i16(&mut out, Error::Protocol(ProtocolError::UnsupportedVersion {
            api_key: header.api_key,
            version: header.api_version,
        }).kafka_error_code() as i16);
        return out;
    }

    let mut buf = body;
    let result = match header.api_key {
        keys::API_VERSIONS => Ok(handle_api_versions()),
        keys::METADATA => handle_metadata(&ctx, &mut buf),
        keys::CREATE_TOPICS => handle_create_topics(&ctx, &mut buf),
        keys::DELETE_TOPICS => handle_delete_topics(&ctx, &mut buf),
        keys::PRODUCE => handle_produce(&ctx, &mut buf).await,
        keys::FETCH => handle_fetch(&ctx, &mut buf).await,
        keys::LIST_OFFSETS => handle_list_offsets(&ctx, &mut buf),
        keys::OFFSET_COMMIT => handle_offset_commit(&ctx, &mut buf),
        keys::OFFSET_FETCH => handle_offset_fetch(&ctx, &mut buf),
        keys::FIND_COORDINATOR => Ok(handle_find_coordinator(&ctx)),
        keys::JOIN_GROUP => handle_join_group(&ctx, &mut buf).await,
        keys::SYNC_GROUP => handle_sync_group(&ctx, &mut buf).await,
        keys::HEARTBEAT => handle_heartbeat(&ctx, &mut buf),
        keys::LEAVE_GROUP => handle_leave_group(&ctx, &mut buf),
        keys::LIST_GROUPS => Ok(handle_list_groups(&ctx)),
        keys::DESCRIBE_GROUPS => handle_describe_groups(&ctx, &mut buf),
        keys::DELETE_RECORDS => handle_delete_records(&ctx, &mut buf),
        keys::INIT_PRODUCER_ID => handle_init_producer_id(&ctx, &mut buf),
        keys::ADD_PARTITIONS_TO_TXN => handle_add_partitions_to_txn(&ctx, &mut buf),
        keys::ADD_OFFSETS_TO_TXN => Ok(handle_add_offsets_to_txn(&mut buf)),
        keys::END_TXN => handle_end_txn(&ctx, &mut buf),
        keys::WRITE_TXN_MARKERS => Ok(handle_write_txn_markers()),
        keys::TXN_OFFSET_COMMIT => handle_offset_commit_for_txn(&ctx, &mut buf),
        keys::DESCRIBE_CONFIGS => handle_describe_configs(&ctx, &mut buf),
        keys::ALTER_CONFIGS => handle_alter_configs(&mut buf),
        keys::DESCRIBE_LOG_DIRS => handle_describe_log_dirs(&ctx),
        keys::SASL_HANDSHAKE => Ok(handle_sasl_handshake()),
        keys::SASL_AUTHENTICATE => handle_sasl_authenticate(&ctx, &mut buf).await,
        other => Err(Error::Protocol(ProtocolError::UnsupportedApiKey(other))),
    };

    match result {
        Ok(body) => body,
        Err(e) => {
            debug!(api_key = header.api_key, error = %e, "request failed");
            let mut out = BytesMut::new();
            write_i16(&mut out, error_code_of(&e));
            out
        }
    }
}

fn version_supported(api_key: i16, version: i16) -> bool {
    keys::SUPPORTED_VERSIONS
        .iter()
        .any(|(k, min, max)| *k == api_key && version >= *min && version <= *max)
}

fn handle_api_versions() -> BytesMut {
    let mut out = BytesMut::new();
    write_i16(&mut out, 0); // error_code
    write_array_len(&mut out, keys::SUPPORTED_VERSIONS.len());
    for (api_key, min, max) in keys::SUPPORTED_VERSIONS {
        write_i16(&mut out, *api_key);
        write_i16(&mut out, *min);
        write_i16(&mut out, *max);
    }
    write_i32(&mut out, 0); // throttle_time_ms
    out
}

fn handle_metadata(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut requested = Vec::with_capacity(n);
    for _ in 0..n {
        requested.push(read_string(buf)?);
    }
    let names = if requested.is_empty() { ctx.replication.topics().list_topics() } else { requested };

    let mut out = BytesMut::new();
    write_i32(&mut out, 0); // throttle_time_ms
    write_array_len(&mut out, 1);
    write_i32(&mut out, ctx.node_id as i32);
    write_string(&mut out, &ctx.advertised_host);
    write_i32(&mut out, i32::from(ctx.advertised_port));
    write_nullable_string(&mut out, None); // cluster_id
    write_i32(&mut out, ctx.node_id as i32); // controller_id

    write_array_len(&mut out, names.len());
    for name in names {
        match ctx.replication.topics().get_topic(&name) {
            Some(meta) => {
                write_i16(&mut out, 0);
                write_string(&mut out, &name);
                write_array_len(&mut out, meta.partitions.len());
                let mut partitions: Vec<_> = meta.partitions.into_iter().collect();
                partitions.sort_by_key(|(p, _)| *p);
                for (partition, replicas) in partitions {
                    write_i16(&mut out, 0);
                    write_i32(&mut out, partition);
                    write_i32(&mut out, replicas.leader.map_or(-1, |l| l as i32));
                    write_array_len(&mut out, replicas.replicas.len());
                    for r in &replicas.replicas {
                        write_i32(&mut out, *r as i32);
                    }
                    write_array_len(&mut out, replicas.isr.len());
                    for r in &replicas.isr {
                        write_i32(&mut out, *r as i32);
                    }
                }
            }
            None => {
                write_i16(&mut out, Error::Topics(stratos_common::error::TopicsError::TopicNotFound(name.clone())).kafka_error_code() as i16);
                write_string(&mut out, &name);
                write_array_len(&mut out, 0);
            }
        }
    }
    Ok(out)
}

fn handle_create_topics(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut requests = Vec::with_capacity(n);
    for _ in 0..n {
        let name = read_string(buf)?;
        let n_partitions = read_i32(buf)?;
        let replication_factor = read_i16(buf)?;
        requests.push((name, n_partitions, replication_factor));
    }
    let _timeout_ms = read_i32(buf)?;

    let mut out = BytesMut::new();
    write_i32(&mut out, 0); // throttle_time_ms
    write_array_len(&mut out, requests.len());
    for (name, n_partitions, replication_factor) in requests {
        let config = TopicConfig::new(&name, n_partitions.max(1) as u32, replication_factor.max(1));
        let error_code = match ctx.replication.create_topic(config) {
            Ok(()) => 0,
            Err(e) => error_code_of(&e),
        };
        write_string(&mut out, &name);
        write_i16(&mut out, error_code);
    }
    Ok(out)
}

fn handle_delete_topics(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut names = Vec::with_capacity(n);
    for _ in 0..n {
        names.push(read_string(buf)?);
    }
    let _timeout_ms = read_i32(buf)?;

    let mut out = BytesMut::new();
    write_i32(&mut out, 0);
    write_array_len(&mut out, names.len());
    for name in names {
        let error_code = match ctx.replication.delete_topic(&name) {
            Ok(()) => 0,
            Err(e) => error_code_of(&e),
        };
        write_string(&mut out, &name);
        write_i16(&mut out, error_code);
    }
    Ok(out)
}

/// `acks=all` blocks the calling task on `ReplicationStateMachine::
/// propose_append`'s ISR wait, so the whole request body is decoded up
/// front and the actual appends run on the blocking-work pool rather than
/// the connection's async task.
async fn handle_produce(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let acks = Acks::from_wire(read_i16(buf)?);
    let _timeout_ms = read_i32(buf)?;

    let n_topics = read_array_len(buf)?;
    let mut requests = Vec::with_capacity(n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        let mut partitions = Vec::with_capacity(n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let key = read_bytes(buf)?;
            let value = read_bytes(buf)?;
            partitions.push((partition, key, value));
        }
        requests.push((topic, partitions));
    }

    let ctx = ctx.clone();
    tokio::task::spawn_blocking(move || {
        let mut out = BytesMut::new();
        write_array_len(&mut out, requests.len());
        for (topic, partitions) in requests {
            write_string(&mut out, &topic);
            write_array_len(&mut out, partitions.len());
            for (partition, key, value) in partitions {
                write_i32(&mut out, partition);
                match ctx.replication.propose_append(&topic, partition, key, value, acks) {
                    Ok(offset) => {
                        write_i16(&mut out, 0);
                        write_i64(&mut out, offset);
                    }
                    Err(e) => {
                        write_i16(&mut out, error_code_of(&e));
                        write_i64(&mut out, -1);
                    }
                }
            }
        }
        write_i32(&mut out, 0); // throttle_time_ms
        out
    })
    .await
    .map_err(blocking_panicked)
}

/// Long-polls: decodes the whole request up front, then repeatedly
/// re-fetches every partition on the blocking-work pool until their
/// combined bytes satisfy `min_bytes` or `max_wait_ms` elapses, returning
/// whichever comes first -- matching the wire's own wait contract without
/// ever parking the connection's async task on a sleep.
async fn handle_fetch(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let _replica_id = read_i32(buf)?;
    let max_wait_ms = read_i32(buf)?;
    let min_bytes = read_i32(buf)?.max(0) as usize;

    let n_topics = read_array_len(buf)?;
    let mut requests = Vec::with_capacity(n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        let mut partitions = Vec::with_capacity(n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let fetch_offset = read_i64(buf)?;
            let max_bytes = read_i32(buf)?;
            partitions.push((partition, fetch_offset, max_bytes.max(0) as usize));
        }
        requests.push((topic, partitions));
    }

    let deadline = Instant::now() + Duration::from_millis(max_wait_ms.max(0) as u64);
    let results = loop {
        let ctx = ctx.clone();
        let requests = requests.clone();
        let results = tokio::task::spawn_blocking(move || {
            requests
                .into_iter()
                .map(|(topic, partitions)| {
                    let partitions = partitions
                        .into_iter()
                        .map(|(partition, fetch_offset, max_bytes)| {
                            (partition, fetch_partition(&ctx, &topic, partition, fetch_offset, max_bytes))
                        })
                        .collect::<Vec<_>>();
                    (topic, partitions)
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(blocking_panicked)?;

        let total_bytes: usize = results
            .iter()
            .flat_map(|(_, partitions)| partitions.iter())
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(|(_, bytes)| bytes.len())
            .sum();

        if min_bytes == 0 || total_bytes >= min_bytes {
            break results;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break results;
        }
        tokio::time::sleep(remaining.min(Duration::from_millis(20))).await;
    };

    let mut out = BytesMut::new();
    write_i32(&mut out, 0); // throttle_time_ms
    write_array_len(&mut out, results.len());
    for (topic, partitions) in results {
        write_string(&mut out, &topic);
        write_array_len(&mut out, partitions.len());
        for (partition, result) in partitions {
            write_i32(&mut out, partition);
            match result {
                Ok((hwm, bytes)) => {
                    write_i16(&mut out, 0);
                    write_i64(&mut out, hwm);
                    write_bytes(&mut out, &bytes);
                }
                Err(e) => {
                    write_i16(&mut out, error_code_of(&e));
                    write_i64(&mut out, -1);
                    write_bytes(&mut out, &[]);
                }
            }
        }
    }
    Ok(out)
}

fn fetch_partition(
    ctx: &Arc<Context>,
    topic: &str,
    partition: PartitionId,
    fetch_offset: i64,
    max_bytes: usize,
) -> stratos_common::error::Result<(i64, Vec<u8>)> {
    if !ctx.replication.is_leader(topic, partition)? {
        return Err(stratos_common::error::ConsensusError::NotLeader {
            topic: topic.to_string(),
            partition,
        }
        .into());
    }
    let hwm = ctx.replication.topics().high_water_mark(topic, partition)?;
    if fetch_offset >= hwm {
        return Ok((hwm, Vec::new()));
    }
    let (_path, _position, bytes) = ctx.replication.follower_fetch(topic, partition, fetch_offset, max_bytes)?;
    Ok((hwm, bytes))
}

fn handle_list_offsets(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let _replica_id = read_i32(buf)?;
    let n_topics = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        write_string(&mut out, &topic);
        write_array_len(&mut out, n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let timestamp = read_i64(buf)?;

            write_i32(&mut out, partition);
            let log = ctx.replication.topics().log_for(&topic, partition);
            match log {
                Ok(log) => {
                    let (ts, offset) = if timestamp == -2 {
                        (0, log.log_start_offset())
                    } else if timestamp == -1 {
                        (0, log.high_water_mark())
                    } else {
                        match log.search_by_timestamp(timestamp) {
                            Some(o) => (timestamp, o),
                            None => (0, log.high_water_mark()),
                        }
                    };
                    write_i16(&mut out, 0);
                    write_i64(&mut out, ts);
                    write_i64(&mut out, offset);
                }
                Err(e) => {
                    write_i16(&mut out, error_code_of(&e));
                    write_i64(&mut out, -1);
                    write_i64(&mut out, -1);
                }
            }
        }
    }
    Ok(out)
}

fn handle_offset_commit(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let generation_id = read_i32(buf)?;
    let member_id = read_string(buf)?;

    let n_topics = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        write_string(&mut out, &topic);
        write_array_len(&mut out, n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let offset = read_i64(buf)?;
            let metadata = read_nullable_string(buf)?.unwrap_or_default();

            write_i32(&mut out, partition);
            let error_code = match ctx.coordinator.commit_offset(&group_id, &member_id, generation_id, &topic, partition, offset, metadata) {
                Ok(()) => 0,
                Err(e) => error_code_of(&e),
            };
            write_i16(&mut out, error_code);
        }
    }
    Ok(out)
}

fn handle_offset_commit_for_txn(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    // `TxnOffsetCommit` carries a producer id/epoch ahead of the same
    // group/topic/partition/offset shape as `OffsetCommit`; the
    // transactional fencing those carry is handled by `EndTxn`, not here.
    let _producer_id = read_i64(buf)?;
    let _producer_epoch = read_i16(buf)?;
    handle_offset_commit(ctx, buf)
}

fn handle_offset_fetch(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let n_topics = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        write_string(&mut out, &topic);
        write_array_len(&mut out, n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let (offset, metadata) = ctx.coordinator.fetch_offset(&group_id, &topic, partition);
            write_i32(&mut out, partition);
            write_i64(&mut out, offset);
            write_nullable_string(&mut out, Some(&metadata));
            write_i16(&mut out, 0);
        }
    }
    write_i16(&mut out, 0); // top-level error_code
    Ok(out)
}

fn handle_find_coordinator(ctx: &Arc<Context>) -> BytesMut {
    let mut out = BytesMut::new();
    write_i16(&mut out, 0); // error_code
    write_i32(&mut out, ctx.node_id as i32);
    write_string(&mut out, &ctx.advertised_host);
    write_i32(&mut out, i32::from(ctx.advertised_port));
    out
}

/// `GroupCoordinator::join_group` blocks until its rebalance round closes,
/// so it runs on the blocking-work pool rather than the connection's
/// async task.
async fn handle_join_group(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let session_timeout_ms = read_i32(buf)?;
    let rebalance_timeout_ms = read_i32(buf)?;
    let member_id = read_string(buf)?;
    let protocol_type = read_string(buf)?;

    let n_protocols = read_array_len(buf)?;
    let mut protocols = Vec::with_capacity(n_protocols);
    for _ in 0..n_protocols {
        let name = read_string(buf)?;
        let metadata = read_bytes(buf)?;
        protocols.push((name, metadata));
    }

    let coordinator = ctx.coordinator.clone();
    let member_id = (!member_id.is_empty()).then_some(member_id);
    let result = tokio::task::spawn_blocking(move || {
        coordinator.join_group(
            &group_id,
            member_id,
            "client",
            "",
            &protocol_type,
            protocols,
            Duration::from_millis(session_timeout_ms.max(0) as u64),
            Duration::from_millis(rebalance_timeout_ms.max(0) as u64),
        )
    })
    .await
    .map_err(blocking_panicked)??;

    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    write_i32(&mut out, result.generation);
    write_string(&mut out, &result.protocol_name);
    write_string(&mut out, &result.leader_id);
    write_string(&mut out, &result.member_id);
    write_array_len(&mut out, result.members.len());
    for (id, metadata) in result.members {
        write_string(&mut out, &id);
        write_bytes(&mut out, &metadata);
    }
    Ok(out)
}

/// `GroupCoordinator::sync_group` blocks a follower until the leader's
/// assignment lands, so it runs on the blocking-work pool rather than the
/// connection's async task.
async fn handle_sync_group(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let generation_id = read_i32(buf)?;
    let member_id = read_string(buf)?;

    let n_assignments = read_array_len(buf)?;
    let mut assignments = Vec::with_capacity(n_assignments);
    for _ in 0..n_assignments {
        let target = read_string(buf)?;
        let assignment = read_bytes(buf)?;
        assignments.push((target, assignment));
    }
    let assignments = (!assignments.is_empty()).then_some(assignments);

    let coordinator = ctx.coordinator.clone();
    let assignment = tokio::task::spawn_blocking(move || {
        coordinator.sync_group(&group_id, &member_id, generation_id, assignments)
    })
    .await
    .map_err(blocking_panicked)??;
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    write_bytes(&mut out, &assignment);
    Ok(out)
}

fn handle_heartbeat(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let generation_id = read_i32(buf)?;
    let member_id = read_string(buf)?;

    let error_code = match ctx.coordinator.heartbeat(&group_id, &member_id, generation_id) {
        Ok(()) => 0,
        Err(e) => error_code_of(&e),
    };
    let mut out = BytesMut::new();
    write_i16(&mut out, error_code);
    Ok(out)
}

fn handle_leave_group(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let group_id = read_string(buf)?;
    let member_id = read_string(buf)?;

    let error_code = match ctx.coordinator.leave_group(&group_id, &member_id) {
        Ok(()) => 0,
        Err(e) => error_code_of(&e),
    };
    let mut out = BytesMut::new();
    write_i16(&mut out, error_code);
    Ok(out)
}

fn handle_list_groups(ctx: &Arc<Context>) -> BytesMut {
    let groups = ctx.coordinator.list_groups();
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    write_array_len(&mut out, groups.len());
    for (id, _state, protocol_type) in groups {
        write_string(&mut out, &id);
        write_string(&mut out, protocol_type.as_deref().unwrap_or(""));
    }
    out
}

fn handle_describe_groups(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut requested = Vec::with_capacity(n);
    for _ in 0..n {
        requested.push(read_string(buf)?);
    }

    let known: std::collections::HashMap<_, _> = ctx
        .coordinator
        .list_groups()
        .into_iter()
        .map(|(id, state, protocol_type)| (id, (state, protocol_type)))
        .collect();

    let mut out = BytesMut::new();
    write_array_len(&mut out, requested.len());
    for id in requested {
        write_i16(&mut out, 0);
        write_string(&mut out, &id);
        match known.get(&id) {
            Some((state, protocol_type)) => {
                write_string(&mut out, group_state_name(*state));
                write_string(&mut out, protocol_type.as_deref().unwrap_or(""));
            }
            None => {
                write_string(&mut out, "Dead");
                write_string(&mut out, "");
            }
        }
        write_string(&mut out, ""); // protocol
        write_array_len(&mut out, 0); // members
    }
    Ok(out)
}

fn group_state_name(state: GroupState) -> &'static str {
    match state {
        GroupState::Empty => "Empty",
        GroupState::PreparingRebalance => "PreparingRebalance",
        GroupState::AwaitingSync => "AwaitingSync",
        GroupState::Stable => "Stable",
        GroupState::Dead => "Dead",
    }
}

/// `DeleteRecords` has no counterpart in the log's contract (§4.B only
/// defines tail truncation for recovery, not a forward low-watermark
/// bump), so this acknowledges every requested partition without moving
/// `log_start_offset` -- a thin passthrough rather than a real delete.
fn handle_delete_records(_ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n_topics = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        write_string(&mut out, &topic);
        write_array_len(&mut out, n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            let _offset = read_i64(buf)?;
            write_i32(&mut out, partition);
            write_i64(&mut out, 0); // low_watermark, unchanged
            write_i16(&mut out, 0);
        }
    }
    Ok(out)
}

fn handle_init_producer_id(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let transactional_id = read_nullable_string(buf)?.unwrap_or_default();
    let _transaction_timeout_ms = read_i32(buf)?;

    let (producer_id, producer_epoch) = ctx.init_producer(&transactional_id);
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    write_i64(&mut out, producer_id);
    write_i16(&mut out, producer_epoch);
    Ok(out)
}

fn handle_add_partitions_to_txn(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let transactional_id = read_string(buf)?;
    let _producer_id = read_i64(buf)?;
    let _producer_epoch = read_i16(buf)?;

    let n_topics = read_array_len(buf)?;
    let mut partitions = Vec::new();
    let mut out = BytesMut::new();
    write_array_len(&mut out, n_topics);
    for _ in 0..n_topics {
        let topic = read_string(buf)?;
        let n_partitions = read_array_len(buf)?;
        write_string(&mut out, &topic);
        write_array_len(&mut out, n_partitions);
        for _ in 0..n_partitions {
            let partition = read_i32(buf)?;
            partitions.push((topic.clone(), partition));
            write_i32(&mut out, partition);
            write_i16(&mut out, 0);
        }
    }
    ctx.add_partitions_to_txn(&transactional_id, partitions);
    Ok(out)
}

fn handle_add_offsets_to_txn(buf: &mut Bytes) -> BytesMut {
    let _transactional_id = read_string(buf).unwrap_or_default();
    let _producer_id = read_i64(buf).unwrap_or_default();
    let _producer_epoch = read_i16(buf).unwrap_or_default();
    let _group_id = read_string(buf).unwrap_or_default();
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    out
}

fn handle_end_txn(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let transactional_id = read_string(buf)?;
    let _producer_id = read_i64(buf)?;
    let _producer_epoch = read_i16(buf)?;
    let _committed = read_i8(buf)?;

    ctx.end_txn(&transactional_id);
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    Ok(out)
}

fn handle_write_txn_markers() -> BytesMut {
    let mut out = BytesMut::new();
    write_array_len(&mut out, 0);
    out
}

fn handle_describe_configs(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n);
    for _ in 0..n {
        let _resource_type = read_i8(buf)?;
        let name = read_string(buf)?;
        let n_keys = read_array_len(buf)?;
        for _ in 0..n_keys {
            let _key = read_string(buf)?;
        }

        match ctx.replication.topics().get_topic(&name) {
            Some(meta) => {
                write_i16(&mut out, 0);
                write_string(&mut out, &name);
                let entries = [
                    ("retention.ms", meta.config.retention_ms.to_string()),
                    ("retention.bytes", meta.config.retention_bytes.to_string()),
                    ("segment.bytes", meta.config.segment_bytes.to_string()),
                    ("min.cleanable.dirty.ratio", meta.config.min_cleanable_ratio.to_string()),
                ];
                write_array_len(&mut out, entries.len());
                for (k, v) in entries {
                    write_string(&mut out, k);
                    write_nullable_string(&mut out, Some(&v));
                }
            }
            None => {
                write_i16(&mut out, Error::Topics(stratos_common::error::TopicsError::TopicNotFound(name.clone())).kafka_error_code() as i16);
                write_string(&mut out, &name);
                write_array_len(&mut out, 0);
            }
        }
    }
    Ok(out)
}

/// Configuration mutation itself is the out-of-scope admin surface (§1);
/// this acknowledges every resource without applying anything.
fn handle_alter_configs(buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let n = read_array_len(buf)?;
    let mut out = BytesMut::new();
    write_array_len(&mut out, n);
    for _ in 0..n {
        let _resource_type = read_i8(buf)?;
        let name = read_string(buf)?;
        let n_entries = read_array_len(buf)?;
        for _ in 0..n_entries {
            let _key = read_string(buf)?;
            let _value = read_nullable_string(buf)?;
        }
        write_i16(&mut out, 0);
        write_string(&mut out, &name);
    }
    Ok(out)
}

fn handle_describe_log_dirs(ctx: &Arc<Context>) -> stratos_common::error::Result<BytesMut> {
    let mut out = BytesMut::new();
    write_array_len(&mut out, 1);
    write_i16(&mut out, 0); // error_code
    write_string(&mut out, "."); // log_dir
    let topics = ctx.replication.topics().list_topics();
    write_array_len(&mut out, topics.len());
    for topic in topics {
        write_string(&mut out, &topic);
        let Some(meta) = ctx.replication.topics().get_topic(&topic) else { continue };
        write_array_len(&mut out, meta.partitions.len());
        for partition in meta.partitions.keys() {
            let size = ctx
                .replication
                .topics()
                .log_for(&topic, *partition)
                .map(|l| l.size())
                .unwrap_or(0);
            write_i32(&mut out, *partition);
            write_i64(&mut out, size as i64);
        }
    }
    Ok(out)
}

fn handle_sasl_handshake() -> BytesMut {
    let mut out = BytesMut::new();
    write_i16(&mut out, 0);
    write_array_len(&mut out, 1);
    write_string(&mut out, "PLAIN");
    out
}

async fn handle_sasl_authenticate(ctx: &Arc<Context>, buf: &mut Bytes) -> stratos_common::error::Result<BytesMut> {
    let payload = read_bytes(buf)?;
    let mut out = BytesMut::new();
    match ctx.auth.authenticate("PLAIN", &payload).await {
        Ok(principal) => {
            write_i16(&mut out, 0);
            write_nullable_string(&mut out, None);
            write_bytes(&mut out, principal.name.as_bytes());
        }
        Err(_) => {
            write_i16(&mut out, stratos_common::error::KafkaErrorCode::InvalidRequest as i16);
            write_nullable_string(&mut out, Some("authentication failed"));
            write_bytes(&mut out, &[]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use stratos_cleaner::Cleaner;
    use stratos_common::config::{CoordinatorConfig, RaftConfig};
    use stratos_common::metrics::NoopMetrics;
    use stratos_consensus::ReplicationStateMachine;
    use stratos_coordinator::GroupCoordinator;
    use stratos_security::AllowAllAuthProvider;
    use stratos_topics::{LogDefaults, TopicManager};
    use tempfile::tempdir;

    fn test_context(dir: &std::path::Path) -> StdArc<Context> {
        let topics = StdArc::new(
            TopicManager::open(
                dir,
                1,
                vec![1],
                LogDefaults { max_segment_bytes: 1024 * 1024, index_interval: 1, fsync_on_append: false },
                Cleaner::new(),
            )
            .unwrap(),
        );
        let replication = StdArc::new(ReplicationStateMachine::new(1, RaftConfig::default(), topics.clone()));
        replication.create_topic(TopicConfig::new("__consumer_offsets", 1, 1)).unwrap();
        let offsets_log = topics.log_for("__consumer_offsets", 0).unwrap();
        let coordinator = StdArc::new(GroupCoordinator::new(CoordinatorConfig::default(), offsets_log).unwrap());
        StdArc::new(Context::new(1, "localhost".to_string(), 9092, replication, coordinator, StdArc::new(AllowAllAuthProvider), StdArc::new(NoopMetrics)))
    }

    fn encode_request_header(api_key: i16, version: i16) -> RequestHeader {
        RequestHeader { api_key, api_version: version, correlation_id: 7, client_id: Some("test".to_string()) }
    }

    #[tokio::test]
    async fn create_topic_then_produce_and_fetch() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path());

        let mut create = BytesMut::new();
        write_array_len(&mut create, 1);
        write_string(&mut create, "orders");
        write_i32(&mut create, 1);
        write_i16(&mut create, 1);
        write_i32(&mut create, 1000);
        let resp = dispatch(ctx.clone(), encode_request_header(keys::CREATE_TOPICS, 0), create.freeze()).await;
        let mut resp = resp.freeze();
        let _throttle = read_i32(&mut resp).unwrap();
        let n = read_array_len(&mut resp).unwrap();
        assert_eq!(n, 1);
        let _name = read_string(&mut resp).unwrap();
        assert_eq!(read_i16(&mut resp).unwrap(), 0);

        let mut produce = BytesMut::new();
        write_i16(&mut produce, 1); // acks
        write_i32(&mut produce, 1000);
        write_array_len(&mut produce, 1);
        write_string(&mut produce, "orders");
        write_array_len(&mut produce, 1);
        write_i32(&mut produce, 0);
        write_bytes(&mut produce, b"k");
        write_bytes(&mut produce, b"v");
        let resp = dispatch(ctx.clone(), encode_request_header(keys::PRODUCE, 0), produce.freeze()).await;
        let mut resp = resp.freeze();
        assert_eq!(read_array_len(&mut resp).unwrap(), 1);
        let _topic = read_string(&mut resp).unwrap();
        assert_eq!(read_array_len(&mut resp).unwrap(), 1);
        let _partition = read_i32(&mut resp).unwrap();
        assert_eq!(read_i16(&mut resp).unwrap(), 0);
        assert_eq!(read_i64(&mut resp).unwrap(), 0);
    }

    #[tokio::test]
    async fn fetch_from_non_leader_is_rejected() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path());
        ctx.replication.create_topic(TopicConfig::new("t", 1, 1)).unwrap();
        ctx.replication.topics().set_leader("t", 0, 99).unwrap();

        let mut fetch = BytesMut::new();
        write_i32(&mut fetch, -1);
        write_i32(&mut fetch, 100);
        write_i32(&mut fetch, 1);
        write_array_len(&mut fetch, 1);
        write_string(&mut fetch, "t");
        write_array_len(&mut fetch, 1);
        write_i32(&mut fetch, 0);
        write_i64(&mut fetch, 0);
        write_i32(&mut fetch, 1024);
        let resp = dispatch(ctx, encode_request_header(keys::FETCH, 0), fetch.freeze()).await;
        let mut resp = resp.freeze();
        let _throttle = read_i32(&mut resp).unwrap();
        assert_eq!(read_array_len(&mut resp).unwrap(), 1);
        let _topic = read_string(&mut resp).unwrap();
        assert_eq!(read_array_len(&mut resp).unwrap(), 1);
        let _partition = read_i32(&mut resp).unwrap();
        let error_code = read_i16(&mut resp).unwrap();
        assert_eq!(error_code, stratos_common::error::KafkaErrorCode::NotLeaderForPartition as i16);
    }

    #[tokio::test]
    async fn api_versions_lists_every_supported_key() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path());
        let resp = dispatch(ctx, encode_request_header(keys::API_VERSIONS, 0), Bytes::new()).await;
        let mut resp = resp.freeze();
        assert_eq!(read_i16(&mut resp).unwrap(), 0);
        let n = read_array_len(&mut resp).unwrap();
        assert_eq!(n, keys::SUPPORTED_VERSIONS.len());
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected_before_dispatch() {
        let dir = tempdir().unwrap();
        let ctx = test_context(dir.path());
        let resp = dispatch(ctx, encode_request_header(keys::PRODUCE, 99), Bytes::new()).await;
        let mut resp = resp.freeze();
        assert_eq!(read_i16(&mut resp).unwrap(), stratos_common::error::KafkaErrorCode::UnsupportedVersion as i16);
    }
}
