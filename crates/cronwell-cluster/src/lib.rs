//! Cluster coordination: retrying peer RPC, node heartbeats, startup
//! conflict detection and cross-node running-job queries.

pub mod client;
pub mod error;
pub mod gossip;
pub mod retry;

pub use client::{HttpPeerClient, PeerClient};
pub use error::ClusterError;
pub use gossip::{ClusterEvent, ClusterGossip, GossipSettings, LocalSchedulerState};
pub use retry::RetryPolicy;
