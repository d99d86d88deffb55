//! The Kafka wire protocol's API keys, plus the `(min_version, max_version)`
//! pairs this dispatcher answers `ApiVersions` with.
//! Per-version byte-layout fidelity is out of scope -- every handler below
//! speaks exactly one wire shape regardless of the version a client
//! negotiated, so these ranges describe what the dispatcher *accepts*, not
//! a family of distinct encodings.

pub const PRODUCE: i16 = 0;
pub const FETCH: i16 = 1;
pub const LIST_OFFSETS: i16 = 2;
pub const METADATA: i16 = 3;
pub const OFFSET_COMMIT: i16 = 8;
pub const OFFSET_FETCH: i16 = 9;
pub const FIND_COORDINATOR: i16 = 10;
pub const JOIN_GROUP: i16 = 11;
pub const HEARTBEAT: i16 = 12;
pub const LEAVE_GROUP: i16 = 13;
pub const SYNC_GROUP: i16 = 14;
pub const DESCRIBE_GROUPS: i16 = 15;
pub const LIST_GROUPS: i16 = 16;
pub const API_VERSIONS: i16 = 18;
pub const CREATE_TOPICS: i16 = 19;
pub const DELETE_TOPICS: i16 = 20;
pub const DELETE_RECORDS: i16 = 21;
pub const INIT_PRODUCER_ID: i16 = 22;
pub const ADD_PARTITIONS_TO_TXN: i16 = 24;
pub const ADD_OFFSETS_TO_TXN: i16 = 25;
pub const END_TXN: i16 = 26;
pub const WRITE_TXN_MARKERS: i16 = 27;
pub const TXN_OFFSET_COMMIT: i16 = 28;
pub const DESCRIBE_CONFIGS: i16 = 32;
pub const ALTER_CONFIGS: i16 = 33;
pub const DESCRIBE_LOG_DIRS: i16 = 35;
pub const SASL_HANDSHAKE: i16 = 36;
pub const SASL_AUTHENTICATE: i16 = 37;

/// `(api_key, min_version, max_version)`, returned verbatim by `ApiVersions`.
pub const SUPPORTED_VERSIONS: &[(i16, i16, i16)] = &[
    (PRODUCE, 0, 8),
    (FETCH, 0, 11),
    (LIST_OFFSETS, 0, 6),
    (METADATA, 0, 9),
    (OFFSET_COMMIT, 0, 8),
    (OFFSET_FETCH, 0, 7),
    (FIND_COORDINATOR, 0, 3),
    (JOIN_GROUP, 0, 7),
    (HEARTBEAT, 0, 4),
    (LEAVE_GROUP, 0, 4),
    (SYNC_GROUP, 0, 5),
    (DESCRIBE_GROUPS, 0, 5),
    (LIST_GROUPS, 0, 4),
    (API_VERSIONS, 0, 3),
    (CREATE_TOPICS, 0, 6),
    (DELETE_TOPICS, 0, 5),
    (DELETE_RECORDS, 0, 1),
    (INIT_PRODUCER_ID, 0, 4),
    (ADD_PARTITIONS_TO_TXN, 0, 2),
    (ADD_OFFSETS_TO_TXN, 0, 2),
    (END_TXN, 0, 3),
    (WRITE_TXN_MARKERS, 0, 1),
    (TXN_OFFSET_COMMIT, 0, 3),
    (DESCRIBE_CONFIGS, 0, 4),
    (ALTER_CONFIGS, 0, 2),
    (DESCRIBE_LOG_DIRS, 0, 3),
    (SASL_HANDSHAKE, 0, 1),
    (SASL_AUTHENTICATE, 0, 2),
];

/// Whether this dispatcher has a handler for `api_key` at all, independent
/// of the version negotiated.
#[must_use]
pub fn is_known(api_key: i16) -> bool {
    SUPPORTED_VERSIONS.iter().any(|(key, _, _)| *key == api_key)
}
