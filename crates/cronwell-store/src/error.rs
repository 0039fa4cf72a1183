use cronwell_core::CronwellError;
use thiserror::Error;

/// Errors raised by the SQLite managers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A stored value could not be decoded (bad timestamp, unknown enum).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The history row already left `Running`.
    #[error("history row {instance_id} is already finalized")]
    AlreadyFinalized { instance_id: String },

    /// A thread panicked while holding the connection.
    #[error("connection lock poisoned")]
    Poisoned,
}

impl From<StoreError> for CronwellError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, key } => CronwellError::NotFound { entity, key },
            StoreError::AlreadyFinalized { instance_id } => {
                CronwellError::HistoryAlreadyFinalized { instance_id }
            }
            StoreError::InvalidArgument(msg) => CronwellError::InvalidArgument(msg),
            other => CronwellError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
