//! cronwell-execution: per-fire lifecycle tracking and the job hosts.
//!
//! Job code reports on its run through a [`LifecycleSink`]; the host that
//! runs it enforces the timeout and grace window and maps the result to an
//! [`ExecutionOutcome`].
//!
//! - `ProcessJobHost`: child process, lifecycle events over stdout lines
//! - `RestJobHost`: a single HTTP request
//! - `InProcessJobHost`: registered async handlers

pub mod error;
pub mod host;
pub mod in_process;
pub mod limits;
pub mod metadata;
pub mod process;
pub mod rest;
pub mod tracker;

pub use error::{ExecutionError, Result};
pub use host::{JobContext, JobHost, JobRunner};
pub use in_process::{InProcessJobHost, JobHandler};
pub use limits::{ExecutionLimits, ExecutionOutcome};
pub use metadata::JobExecutionMetadata;
pub use process::ProcessJobHost;
pub use rest::RestJobHost;
pub use tracker::{ExecutionTracker, LifecycleSink};
