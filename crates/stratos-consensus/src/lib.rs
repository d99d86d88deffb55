//! Per-partition replication state machine over a single-process,
//! Raft-family consensus primitive.
//!
//! A single node that force-promotes to leader on its first proposal and
//! commits immediately, with one group per `(topic, partition)` wired to
//! this broker's own [`stratos_topics`] for its apply side.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod command;
mod group;
mod state_machine;

pub use command::{Acks, Command, CommandResult};
pub use group::{NodeState, RaftGroup};
pub use state_machine::ReplicationStateMachine;
