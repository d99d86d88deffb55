//! The replicated command tape.
//!
//! Serialized as self-describing JSON, tagged by variant name via serde's
//! externally-tagged enum representation -- consistent with the rest of
//! this broker's wire formats (topic metadata, `TopicConfig`) rather than a
//! length-prefixed binary encoding private to this crate.

use serde::{Deserialize, Serialize};
use stratos_common::types::{Offset, PartitionId, Timestamp, TopicConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    CreateTopic {
        config: TopicConfig,
    },
    DeleteTopic {
        name: String,
    },
    Append {
        topic: String,
        partition: PartitionId,
        key: Vec<u8>,
        value: Vec<u8>,
        timestamp: Timestamp,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CommandResult {
    Ack,
    Appended { offset: Offset },
}

/// Producer acknowledgement mode, carried on the wire as `acks: i16`
/// (`0`, `1`, `-1`) and decoded here once at the dispatcher boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    /// Don't wait for anything past the leader accepting the write locally.
    None,
    /// Wait for the leader's local append; the default.
    Leader,
    /// Wait for every in-sync replica to catch up to the new offset.
    All,
}

impl Acks {
    #[must_use]
    pub fn from_wire(acks: i16) -> Self {
        match acks {
            0 => Acks::None,
            1 => Acks::Leader,
            _ => Acks::All,
        }
    }
}
