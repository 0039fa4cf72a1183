use cronwell_cluster::ClusterError;
use cronwell_core::CronwellError;
use cronwell_monitor::MonitorError;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Job not found: {key}")]
    JobNotFound { key: String },

    #[error("Trigger not found: {key}")]
    TriggerNotFound { key: String },

    /// Groups and data keys starting with `__` belong to cronwell.
    #[error("Reserved name: {0}")]
    Reserved(String),

    /// Startup refused to join the cluster.
    #[error("Cluster startup failed: {0}")]
    Startup(String),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("{0}")]
    Core(#[from] CronwellError),

    /// A thread panicked while holding the connection.
    #[error("connection lock poisoned")]
    Poisoned,
}

impl From<SchedulerError> for CronwellError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::JobNotFound { key } => CronwellError::NotFound { entity: "job", key },
            SchedulerError::TriggerNotFound { key } => CronwellError::NotFound {
                entity: "trigger",
                key,
            },
            SchedulerError::InvalidSchedule(msg) | SchedulerError::Reserved(msg) => {
                CronwellError::InvalidArgument(msg)
            }
            SchedulerError::Startup(msg) => CronwellError::ClusterJoin(msg),
            SchedulerError::Cluster(inner) => inner.into(),
            SchedulerError::Monitor(inner) => inner.into(),
            SchedulerError::Core(inner) => inner,
            other => CronwellError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
