use cronwell_core::CronwellError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// Peer unreachable, timed out, or answered with a transport error.
    #[error("rpc to {node} failed: {reason}")]
    Rpc { node: String, reason: String },

    /// Peer answered with a non-success status.
    #[error("rpc to {node} returned {status}: {message}")]
    Api {
        node: String,
        status: u16,
        message: String,
    },

    /// A non-clustered node found live cluster members in its database.
    #[error("cluster conflict: {0}")]
    Conflict(String),

    #[error("registry error: {0}")]
    Store(#[from] CronwellError),
}

impl ClusterError {
    pub fn rpc(node: impl ToString, reason: impl ToString) -> Self {
        ClusterError::Rpc {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<ClusterError> for CronwellError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::Rpc { node, reason } => CronwellError::PeerUnavailable { node, reason },
            ClusterError::Api {
                node,
                status,
                message,
            } => CronwellError::PeerUnavailable {
                node,
                reason: format!("status {status}: {message}"),
            },
            ClusterError::Conflict(msg) => CronwellError::ClusterConflict(msg),
            ClusterError::Store(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
