use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(server, port)` identity of a cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub server: String,
    pub port: u16,
}

impl NodeKey {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
        }
    }

    /// Server names compare case-insensitively (host names).
    pub fn same_as(&self, other: &NodeKey) -> bool {
        self.port == other.port && self.server.eq_ignore_ascii_case(&other.server)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.port)
    }
}

/// One row of the node registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub server: String,
    pub port: u16,
    pub instance_id: String,
    /// Port the node's cluster RPC server listens on.
    pub cluster_port: u16,
    pub join_date: DateTime<Utc>,
    pub health_check_date: DateTime<Utc>,
}

impl ClusterNode {
    pub fn new(key: &NodeKey, instance_id: impl Into<String>, cluster_port: u16) -> Self {
        let now = Utc::now();
        Self {
            server: key.server.clone(),
            port: key.port,
            instance_id: instance_id.into(),
            cluster_port,
            join_date: now,
            health_check_date: now,
        }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::new(self.server.clone(), self.port)
    }

    /// Live iff the last heartbeat is younger than `tolerance`.
    pub fn is_live(&self, now: DateTime<Utc>, tolerance: chrono::Duration) -> bool {
        now - self.health_check_date < tolerance
    }

    /// Base URL of the node's cluster RPC server.
    pub fn rpc_address(&self) -> String {
        format!("http://{}:{}", self.server, self.cluster_port)
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server, self.port)
    }
}
