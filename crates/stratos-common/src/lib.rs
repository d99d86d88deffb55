//! Stratos Common - shared types, errors, configuration and metrics
//!
//! Used by every core crate (`stratos-log`, `stratos-cleaner`, `stratos-topics`,
//! `stratos-consensus`, `stratos-coordinator`, `stratos-protocol`) so that the
//! broker's data model, error hierarchy and observability surface stay in one
//! place instead of being redefined per subsystem.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod traits;
pub mod types;

pub use config::BrokerConfig;
pub use error::{Error, Result};
pub use types::*;
