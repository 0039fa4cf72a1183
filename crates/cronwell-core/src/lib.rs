//! `cronwell-core`: shared vocabulary for every cronwell crate.
//!
//! Holds the keys and records that cross crate boundaries (jobs, triggers,
//! cluster nodes, history rows, monitor actions), the ports the core
//! components talk through, the figment-backed configuration and the error
//! taxonomy.

pub mod cluster;
pub mod config;
pub mod error;
pub mod history;
pub mod job;
pub mod monitor;
pub mod ports;
pub mod types;

pub use error::{CronwellError, Result};
