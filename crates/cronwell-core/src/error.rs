use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronwellError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Cluster conflict: {0}")]
    ClusterConflict(String),

    #[error("Cluster join failed: {0}")]
    ClusterJoin(String),

    #[error("Peer {node} unavailable: {reason}")]
    PeerUnavailable { node: String, reason: String },

    #[error("History row {instance_id} is already finalized")]
    HistoryAlreadyFinalized { instance_id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Job execution error: {0}")]
    Execution(String),

    #[error("Hook {hook} failed: {reason}")]
    Hook { hook: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CronwellError {
    /// Short error code string returned in cluster RPC error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CronwellError::Config(_) => "CONFIG_ERROR",
            CronwellError::Database(_) => "DATABASE_ERROR",
            CronwellError::NotFound { .. } => "NOT_FOUND",
            CronwellError::ClusterConflict(_) => "CLUSTER_CONFLICT",
            CronwellError::ClusterJoin(_) => "CLUSTER_JOIN_FAILED",
            CronwellError::PeerUnavailable { .. } => "PEER_UNAVAILABLE",
            CronwellError::HistoryAlreadyFinalized { .. } => "HISTORY_FINALIZED",
            CronwellError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CronwellError::Execution(_) => "EXECUTION_ERROR",
            CronwellError::Hook { .. } => "HOOK_ERROR",
            CronwellError::Serialization(_) => "SERIALIZATION_ERROR",
            CronwellError::Io(_) => "IO_ERROR",
            CronwellError::Timeout { .. } => "TIMEOUT",
            CronwellError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        CronwellError::NotFound {
            entity,
            key: key.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CronwellError>;
