//! Error hierarchy for the broker core.
//!
//! A root [`Error`] wraps one nested `thiserror` enum per subsystem (log,
//! topics, consensus, coordinator, protocol) so a leaf error can flow up
//! through `?` without manual wrapping.

use thiserror::Error;

/// Result type alias using the broker's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the broker core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("topics error: {0}")]
    Topics(#[from] TopicsError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Segment/log storage errors.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("offset {0} not found")]
    NotFound(i64),

    #[error("offset {requested} is out of range [{start}, {end})")]
    OutOfRange {
        requested: i64,
        start: i64,
        end: i64,
    },

    #[error("segment corrupted: {0}")]
    CorruptedSegment(String),

    #[error("index corrupted: {0}")]
    CorruptedIndex(String),

    /// Internal signal: the active segment cannot accept another record.
    /// Always caught by `Log` and translated into a roll; never surfaces.
    #[error("segment full")]
    SegmentFull,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Topic/partition manager errors.
#[derive(Error, Debug)]
pub enum TopicsError {
    #[error("topic '{0}' not found")]
    TopicNotFound(String),

    #[error("topic '{0}' already exists")]
    TopicAlreadyExists(String),

    #[error("partition {topic}-{partition} not found")]
    PartitionNotFound { topic: String, partition: i32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("log error: {0}")]
    Log(#[from] LogError),
}

/// Replication state machine / consensus errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("not leader for partition {topic}-{partition}")]
    NotLeader { topic: String, partition: i32 },

    #[error("apply timed out after {0}ms")]
    Timeout(u64),

    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Consumer-group coordinator errors.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("group '{0}' not found")]
    GroupNotFound(String),

    #[error("illegal generation: request had {requested}, group is at {current}")]
    IllegalGeneration { requested: i32, current: i32 },

    #[error("inconsistent group protocol")]
    InconsistentGroupProtocol,

    #[error("unknown member '{0}'")]
    UnknownMember(String),

    #[error("rebalance in progress")]
    RebalanceInProgress,

    #[error("group not empty")]
    GroupNotEmpty,

    #[error("timed out waiting for rebalance")]
    Timeout,
}

/// Wire-protocol framing/dispatch errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unsupported api version: api_key={api_key} version={version}")]
    UnsupportedVersion { api_key: i16, version: i16 },

    #[error("unsupported api key: {0}")]
    UnsupportedApiKey(i16),

    #[error("incomplete message")]
    IncompleteMessage,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The standard Kafka-wire error codes this broker maps its internal error
/// kinds onto. Only the codes this core ever produces are listed;
/// clients are expected to know the full registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum KafkaErrorCode {
    None = 0,
    OffsetOutOfRange = 1,
    UnknownTopicOrPartition = 3,
    NotLeaderForPartition = 6,
    MessageTooLarge = 10,
    OffsetMetadataTooLarge = 14,
    CoordinatorNotAvailable = 16,
    InvalidCommitOffsetSize = 25,
    NotCoordinator = 27,
    TopicAlreadyExists = 36,
    InvalidRequest = 42,
    IllegalGeneration = 22,
    InconsistentGroupProtocol = 23,
    UnsupportedVersion = 35,
}

impl Error {
    /// Map this error onto the Kafka-wire error code a response should carry.
    /// Corruption kinds never reach here -- they are recovered locally
    /// before an error would be constructed at all.
    #[must_use]
    pub fn kafka_error_code(&self) -> KafkaErrorCode {
        match self {
            Error::Log(LogError::NotFound(_) | LogError::OutOfRange { .. }) => {
                KafkaErrorCode::OffsetOutOfRange
            }
            Error::Topics(TopicsError::TopicNotFound(_) | TopicsError::PartitionNotFound { .. }) => {
                KafkaErrorCode::UnknownTopicOrPartition
            }
            Error::Topics(TopicsError::TopicAlreadyExists(_)) => KafkaErrorCode::TopicAlreadyExists,
            Error::Consensus(ConsensusError::NotLeader { .. }) => {
                KafkaErrorCode::NotLeaderForPartition
            }
            Error::Consensus(ConsensusError::Unavailable(_)) => {
                KafkaErrorCode::CoordinatorNotAvailable
            }
            Error::Coordinator(CoordinatorError::IllegalGeneration { .. }) => {
                KafkaErrorCode::IllegalGeneration
            }
            Error::Coordinator(CoordinatorError::InconsistentGroupProtocol) => {
                KafkaErrorCode::InconsistentGroupProtocol
            }
            Error::Coordinator(CoordinatorError::GroupNotFound(_)) => {
                KafkaErrorCode::NotCoordinator
            }
            Error::Protocol(ProtocolError::UnsupportedVersion { .. }) => {
                KafkaErrorCode::UnsupportedVersion
            }
            _ => KafkaErrorCode::InvalidRequest,
        }
    }
}
