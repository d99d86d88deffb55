//! Topic/partition manager: persistent metadata, replica placement,
//! and ISR bookkeeping for every partition the broker hosts.
//!
//! Replicas are assigned once, at topic creation, round-robin across the
//! known broker set; their catch-up state (LEO, last fetch time) is then
//! tracked from there rather than recomputed on every broker join/leave.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod manager;

pub use manager::{LogDefaults, TopicManager};
