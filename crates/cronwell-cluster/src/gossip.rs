use std::sync::Arc;

use chrono::Utc;
use cronwell_core::cluster::{ClusterNode, NodeKey};
use cronwell_core::config::CronwellConfig;
use cronwell_core::ports::ClusterStore;
use cronwell_core::types::JobKey;
use cronwell_protocol::messages::{PersistenceRunningJobInfo, RunningData, RunningJobDetails};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::client::PeerClient;
use crate::error::{ClusterError, Result};
use crate::retry::RetryPolicy;

/// What the gossip layer needs to know about the local scheduler.
pub trait LocalSchedulerState: Send + Sync {
    fn instance_id(&self) -> String;
    /// Trigger clock started and not in standby.
    fn is_running(&self) -> bool;
}

/// Membership changes observed by this node.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    Joined(ClusterNode),
    Removed(ClusterNode),
}

#[derive(Debug, Clone)]
pub struct GossipSettings {
    /// This node's identity: server name + HTTP port.
    pub current: NodeKey,
    pub cluster_port: u16,
    pub clustering: bool,
    /// Heartbeat age beyond which a node counts as dead.
    pub live_tolerance: chrono::Duration,
    pub retry: RetryPolicy,
}

impl GossipSettings {
    pub fn from_config(cfg: &CronwellConfig) -> Self {
        Self {
            current: NodeKey::new(cfg.service.server_name(), cfg.service.http_port),
            cluster_port: cfg.cluster.port,
            clustering: cfg.cluster.clustering,
            live_tolerance: cfg.cluster.live_tolerance(),
            retry: RetryPolicy::from_config(&cfg.cluster),
        }
    }
}

/// Node-to-node coordination over the registry and the peer RPC port.
///
/// Peer failures never fail the aggregate operation: they are logged and
/// the peer counts as having no answer.
pub struct ClusterGossip {
    store: Arc<dyn ClusterStore>,
    peers: Arc<dyn PeerClient>,
    local: Arc<dyn LocalSchedulerState>,
    settings: GossipSettings,
    events: Option<mpsc::UnboundedSender<ClusterEvent>>,
}

impl ClusterGossip {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        peers: Arc<dyn PeerClient>,
        local: Arc<dyn LocalSchedulerState>,
        settings: GossipSettings,
    ) -> Self {
        Self {
            store,
            peers,
            local,
            settings,
            events: None,
        }
    }

    /// Report joins and evictions on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<ClusterEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn current_node(&self) -> &NodeKey {
        &self.settings.current
    }

    pub fn settings(&self) -> &GossipSettings {
        &self.settings
    }

    fn is_current(&self, node: &ClusterNode) -> bool {
        node.key().same_as(&self.settings.current)
    }

    fn emit(&self, event: ClusterEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn peers_of(&self, nodes: Vec<ClusterNode>) -> Vec<ClusterNode> {
        nodes.into_iter().filter(|n| !self.is_current(n)).collect()
    }

    async fn load_peers(&self) -> Result<Vec<ClusterNode>> {
        let nodes = self.store.get_cluster_nodes()?;
        Ok(self.peers_of(nodes))
    }

    /// Periodic heartbeat: register self if missing, refresh own row, probe
    /// every peer and evict peers that were already dead and stay silent.
    #[instrument(skip(self), fields(node = %self.settings.current))]
    pub async fn health_check_with_update(&self) -> Result<()> {
        let nodes = self.store.get_cluster_nodes()?;

        if !nodes.iter().any(|n| self.is_current(n)) && self.local.is_running() {
            let node = self.new_current_node();
            self.store.add_cluster_node(&node)?;
            info!("registered current node in cluster");
            self.emit(ClusterEvent::Joined(node));
        }

        for mut node in nodes {
            if self.is_current(&node) {
                self.verify_current_node(&mut node);
                continue;
            }

            // Liveness is judged on the heartbeat as loaded, before probing.
            let was_live = node.is_live(Utc::now(), self.settings.live_tolerance);
            let name = node.to_string();
            let peers = &self.peers;
            let target = &node;
            let probe = self
                .settings
                .retry
                .run("health_check", &name, || async move {
                    peers.health_check(target).await
                })
                .await;

            match probe {
                Ok(_) => {
                    node.health_check_date = Utc::now();
                    if let Err(e) = self.store.update_cluster_node(&node) {
                        warn!(node = %node, err = %e, "failed to store peer heartbeat");
                    }
                }
                Err(e) => {
                    error!(node = %node, err = %e, "health check failed");
                    if !was_live {
                        error!(node = %node, "removing node from cluster after health check failure");
                        if let Err(e) = self.store.remove_cluster_node(&node.key()) {
                            error!(node = %node, err = %e, "failed to remove dead node");
                            continue;
                        }
                        self.emit(ClusterEvent::Removed(node));
                    }
                }
            }
        }
        Ok(())
    }

    fn new_current_node(&self) -> ClusterNode {
        ClusterNode::new(
            &self.settings.current,
            self.local.instance_id(),
            self.settings.cluster_port,
        )
    }

    /// Refresh own row independently of RPC. A new instance id counts as a re-join.
    fn verify_current_node(&self, node: &mut ClusterNode) {
        let now = Utc::now();
        let instance_id = self.local.instance_id();
        if node.instance_id != instance_id {
            node.instance_id = instance_id;
            node.join_date = now;
        }
        node.cluster_port = self.settings.cluster_port;
        node.health_check_date = now;
        if let Err(e) = self.store.update_cluster_node(node) {
            warn!(err = %e, "failed to refresh current node heartbeat");
        }
    }

    /// Insert or refresh this node's registry row.
    #[instrument(skip(self), fields(node = %self.settings.current))]
    pub async fn join(&self) -> Result<()> {
        let node = match self.store.get_cluster_node(&self.settings.current)? {
            None => {
                let node = self.new_current_node();
                self.store.add_cluster_node(&node)?;
                node
            }
            Some(mut existing) => {
                let now = Utc::now();
                existing.instance_id = self.local.instance_id();
                existing.cluster_port = self.settings.cluster_port;
                existing.join_date = now;
                existing.health_check_date = now;
                self.store.update_cluster_node(&existing)?;
                existing
            }
        };
        info!(instance_id = %node.instance_id, "joined cluster");
        self.emit(ClusterEvent::Joined(node));
        Ok(())
    }

    /// Fails when this node is not clustering but another live node shares the database.
    pub fn validate_cluster_conflict(&self, nodes: &[ClusterNode]) -> Result<()> {
        if self.settings.clustering {
            return Ok(());
        }
        let now = Utc::now();
        if let Some(live) = nodes
            .iter()
            .filter(|n| !self.is_current(n))
            .find(|n| n.is_live(now, self.settings.live_tolerance))
        {
            return Err(ClusterError::Conflict(format!(
                "node {} is not clustering but the database contains live cluster node {}",
                self.settings.current, live
            )));
        }
        Ok(())
    }

    /// True only when every peer answered a (retried) health check.
    #[instrument(skip(self, nodes), fields(count = nodes.len()))]
    pub async fn health_check(&self, nodes: &[ClusterNode]) -> bool {
        let mut all_ok = true;
        for node in nodes.iter().filter(|n| !self.is_current(n)) {
            let name = node.to_string();
            let peers = &self.peers;
            let result = self
                .settings
                .retry
                .run("health_check", &name, || async move {
                    peers.health_check(node).await
                })
                .await;
            if let Err(e) = result {
                error!(node = %node, err = %e, "health check failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Put every peer's clock in standby.
    #[instrument(skip(self))]
    pub async fn stop_scheduler(&self) -> Result<()> {
        for node in self.load_peers().await? {
            let name = node.to_string();
            let peers = &self.peers;
            let target = &node;
            if let Err(e) = self
                .settings
                .retry
                .run("stop_scheduler", &name, || async move {
                    peers.stop_scheduler(target).await
                })
                .await
            {
                error!(node = %node, err = %e, "failed to stop scheduler at remote cluster node");
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn start_scheduler(&self) -> Result<()> {
        for node in self.load_peers().await? {
            let name = node.to_string();
            let peers = &self.peers;
            let target = &node;
            if let Err(e) = self
                .settings
                .retry
                .run("start_scheduler", &name, || async move {
                    peers.start_scheduler(target).await
                })
                .await
            {
                error!(node = %node, err = %e, "failed to start scheduler at remote cluster node");
            }
        }
        Ok(())
    }

    /// Asks peers one at a time and stops at the first that runs the job.
    #[instrument(skip(self), fields(job = %job))]
    pub async fn is_job_running(&self, job: &JobKey) -> Result<bool> {
        for node in self.load_peers().await? {
            let name = node.to_string();
            let peers = &self.peers;
            let target = &node;
            match self
                .settings
                .retry
                .run("is_job_running", &name, || async move {
                    peers.is_job_running(target, job).await
                })
                .await
            {
                Ok(true) => {
                    debug!(node = %node, "job is running on peer");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => error!(node = %node, err = %e, "is-job-running query failed"),
            }
        }
        Ok(false)
    }

    /// First peer that knows the fire instance wins.
    #[instrument(skip(self))]
    pub async fn get_running_job(&self, fire_instance_id: &str) -> Result<Option<RunningJobDetails>> {
        for node in self.load_peers().await? {
            match self.peers.get_running_job(&node, fire_instance_id).await {
                Ok(Some(job)) => return Ok(Some(job)),
                Ok(None) => {}
                Err(e) => warn!(node = %node, err = %e, "running-job query failed"),
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    pub async fn get_running_jobs(&self) -> Result<Vec<RunningJobDetails>> {
        let mut all = Vec::new();
        for node in self.load_peers().await? {
            match self.peers.get_running_jobs(&node).await {
                Ok(jobs) => all.extend(jobs),
                Err(e) => warn!(node = %node, err = %e, "running-jobs query failed"),
            }
        }
        Ok(all)
    }

    #[instrument(skip(self))]
    pub async fn get_running_data(&self, fire_instance_id: &str) -> Result<Option<RunningData>> {
        for node in self.load_peers().await? {
            match self.peers.get_running_data(&node, fire_instance_id).await {
                Ok(Some(data)) => return Ok(Some(data)),
                Ok(None) => {}
                Err(e) => warn!(node = %node, err = %e, "running-data query failed"),
            }
        }
        Ok(None)
    }

    #[instrument(skip(self))]
    pub async fn get_persistence_running_jobs_info(&self) -> Result<Vec<PersistenceRunningJobInfo>> {
        let mut all = Vec::new();
        for node in self.load_peers().await? {
            match self.peers.get_persistence_running_jobs_info(&node).await {
                Ok(jobs) => all.extend(jobs),
                Err(e) => warn!(node = %node, err = %e, "persistence-running-jobs query failed"),
            }
        }
        Ok(all)
    }

    /// Stops the fire on whichever peer runs it. True if some peer stopped it.
    #[instrument(skip(self))]
    pub async fn stop_running_job(&self, fire_instance_id: &str) -> Result<bool> {
        for node in self.load_peers().await? {
            match self.peers.stop_running_job(&node, fire_instance_id).await {
                Ok(true) => {
                    info!(node = %node, "running job stopped on peer");
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => warn!(node = %node, err = %e, "stop-running-job call failed"),
            }
        }
        Ok(false)
    }

    #[instrument(skip(self))]
    pub async fn is_job_folder_exist(&self, folder: &str) -> Result<bool> {
        for node in self.load_peers().await? {
            match self.peers.is_job_folder_exist(&node, folder).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => warn!(node = %node, err = %e, "job-folder query failed"),
            }
        }
        Ok(false)
    }

    #[instrument(skip(self))]
    pub async fn is_job_file_exist(&self, folder: &str, filename: &str) -> Result<bool> {
        for node in self.load_peers().await? {
            match self.peers.is_job_file_exist(&node, folder, filename).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => warn!(node = %node, err = %e, "job-file query failed"),
            }
        }
        Ok(false)
    }

    /// Graceful shutdown: drop this node's registry row.
    #[instrument(skip(self), fields(node = %self.settings.current))]
    pub async fn remove_self(&self) -> Result<()> {
        if let Some(node) = self.store.get_cluster_node(&self.settings.current)? {
            self.store.remove_cluster_node(&node.key())?;
            info!("removed current node from cluster");
            self.emit(ClusterEvent::Removed(node));
        }
        Ok(())
    }
}
