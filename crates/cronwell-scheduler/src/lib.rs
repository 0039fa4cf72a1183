//! `cronwell-scheduler`: the trigger clock and the fire pipeline.
//!
//! # Overview
//!
//! Jobs and triggers live in SQLite. The [`engine::SchedulerEngine`] polls
//! due triggers every second and runs each fire on its own task:
//!
//! 1. non-concurrent jobs are vetoed while another fire of the job runs,
//!    on this node or any peer
//! 2. a `Running` history row is written, then the job executes under its
//!    timeout
//! 3. the row gets exactly one terminal status, the circuit breaker and
//!    monitors see the outcome, and a failed fire may queue a retry
//!
//! [`facade::SchedulerFacade`] wires this together with the cluster layer
//! and owns the startup and shutdown sequences.
//!
//! # Schedule variants
//!
//! | Variant    | Behaviour                                     |
//! |------------|-----------------------------------------------|
//! | `Once`     | Single fire at an absolute UTC instant        |
//! | `Interval` | Repeat every N seconds                        |
//! | `Daily`    | Fire at HH:MM UTC every day                   |
//! | `Weekly`   | Fire at HH:MM UTC on a specific weekday       |
//! | `Cron`     | Stored, never fires (no expression engine)    |

pub mod clock;
pub mod db;
pub mod engine;
pub mod error;
pub mod facade;
pub mod fire;
pub mod listener;
pub mod running;
pub mod schedule;
pub mod system_jobs;

pub use clock::SqliteTriggerClock;
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use facade::{SchedulerFacade, SchedulerServices, SchedulerState};
pub use fire::Fire;
pub use listener::{FireReport, HistoryListener, RetryListener};
pub use running::{RunningJob, RunningJobs};
pub use system_jobs::{SystemJob, SystemJobs};
