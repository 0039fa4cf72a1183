//! Error types for the cronwell-execution crate.

use cronwell_core::CronwellError;
use thiserror::Error;

/// Faults a job host can report for one run. None of them escape the
/// scheduler: they become the run's unhandled exception and a `Fail` status.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The process could not be started.
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Process exited with a non-zero code.
    #[error("Process exited with code {code}")]
    ExitCode { code: i32 },

    /// REST job answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// REST job request could not be sent.
    #[error("Request error: {0}")]
    Request(String),

    /// No in-process handler registered under this name.
    #[error("Unknown job handler: {0}")]
    UnknownHandler(String),

    /// Job code failed.
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl From<ExecutionError> for CronwellError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Timeout { ms } => CronwellError::Timeout { ms },
            ExecutionError::Io(io) => CronwellError::Io(io),
            other => CronwellError::Execution(other.to_string()),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ExecutionError>;
