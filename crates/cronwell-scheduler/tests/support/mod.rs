// Shared harness: in-memory stores, a scripted in-process job and a fake
// peer client behind a fully wired facade.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronwell_cluster::{ClusterError, PeerClient};
use cronwell_core::cluster::{ClusterNode, NodeKey};
use cronwell_core::config::CronwellConfig;
use cronwell_core::history::HistoryLogEntry;
use cronwell_core::job::{JobDefinition, JobKind};
use cronwell_core::ports::ClusterStore;
use cronwell_core::types::{generate_id, JobKey};
use cronwell_execution::{
    ExecutionError, InProcessJobHost, JobContext, JobHandler, JobRunner, LifecycleSink,
    ProcessJobHost, RestJobHost,
};
use cronwell_monitor::HookRegistry;
use cronwell_protocol::messages::{
    HealthCheckReply, PersistenceRunningJobInfo, RunningData, RunningJobDetails,
};
use cronwell_scheduler::{SchedulerFacade, SchedulerServices, SqliteTriggerClock};
use cronwell_store::{db, HistoryManager, MonitorManager, NodeRegistry};
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;

pub const HANDLER: &str = "scripted";

/// Behaviour picked by the `Outcome` data key: `fail`, `block` until
/// cancelled, anything else succeeds with a log line, 5 rows and a job data
/// update.
pub struct Scripted;

#[async_trait]
impl JobHandler for Scripted {
    async fn execute(
        &self,
        ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> cronwell_execution::Result<()> {
        match ctx.data.get("Outcome").map(String::as_str) {
            Some("fail") => Err(ExecutionError::JobFailed("boom".into())),
            Some("block") => {
                sink.append_log("waiting");
                cancel.cancelled().await;
                Ok(())
            }
            _ => {
                sink.append_log("hello");
                sink.set_effected_rows(5);
                sink.put_job_data("LastRun", Some("ok".into()));
                Ok(())
            }
        }
    }
}

#[derive(Default)]
pub struct FakePeers {
    down: AtomicBool,
    health_checks: AtomicUsize,
}

impl FakePeers {
    pub fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    fn reach(&self, node: &ClusterNode) -> cronwell_cluster::error::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ClusterError::rpc(node, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerClient for FakePeers {
    async fn health_check(&self, node: &ClusterNode) -> cronwell_cluster::error::Result<HealthCheckReply> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        self.reach(node)?;
        Ok(HealthCheckReply {
            instance_id: node.instance_id.clone(),
            server: node.server.clone(),
            port: node.port,
            scheduler_running: true,
        })
    }

    async fn stop_scheduler(&self, node: &ClusterNode) -> cronwell_cluster::error::Result<()> {
        self.reach(node)
    }

    async fn start_scheduler(&self, node: &ClusterNode) -> cronwell_cluster::error::Result<()> {
        self.reach(node)
    }

    async fn is_job_running(&self, node: &ClusterNode, _job: &JobKey) -> cronwell_cluster::error::Result<bool> {
        self.reach(node)?;
        Ok(false)
    }

    async fn get_running_job(
        &self,
        node: &ClusterNode,
        _fire_instance_id: &str,
    ) -> cronwell_cluster::error::Result<Option<RunningJobDetails>> {
        self.reach(node)?;
        Ok(None)
    }

    async fn get_running_jobs(&self, node: &ClusterNode) -> cronwell_cluster::error::Result<Vec<RunningJobDetails>> {
        self.reach(node)?;
        Ok(Vec::new())
    }

    async fn get_running_data(
        &self,
        node: &ClusterNode,
        _fire_instance_id: &str,
    ) -> cronwell_cluster::error::Result<Option<RunningData>> {
        self.reach(node)?;
        Ok(None)
    }

    async fn get_persistence_running_jobs_info(
        &self,
        node: &ClusterNode,
    ) -> cronwell_cluster::error::Result<Vec<PersistenceRunningJobInfo>> {
        self.reach(node)?;
        Ok(Vec::new())
    }

    async fn stop_running_job(&self, node: &ClusterNode, _id: &str) -> cronwell_cluster::error::Result<bool> {
        self.reach(node)?;
        Ok(false)
    }

    async fn is_job_folder_exist(&self, node: &ClusterNode, _folder: &str) -> cronwell_cluster::error::Result<bool> {
        self.reach(node)?;
        Ok(false)
    }

    async fn is_job_file_exist(&self, node: &ClusterNode, _f: &str, _n: &str) -> cronwell_cluster::error::Result<bool> {
        self.reach(node)?;
        Ok(false)
    }
}

pub struct Harness {
    pub facade: SchedulerFacade,
    pub clock: Arc<SqliteTriggerClock>,
    pub history: Arc<HistoryManager>,
    pub registry: Arc<NodeRegistry>,
    pub peers: Arc<FakePeers>,
    pub jobs_folder: PathBuf,
}

pub fn config(clustering: bool) -> CronwellConfig {
    let mut cfg = CronwellConfig::default();
    cfg.service.server = Some("node1".into());
    cfg.service.instance_id = Some("inst-node1".into());
    cfg.service.start_delay_secs = 0;
    cfg.cluster.clustering = clustering;
    cfg.cluster.retry_delay_ms = 1;
    let folder = std::env::temp_dir().join(format!("cronwell-jobs-{}", generate_id()));
    cfg.service.jobs_folder = folder.to_string_lossy().into_owned();
    cfg
}

pub fn harness(clustering: bool) -> Harness {
    harness_with(config(clustering))
}

pub fn harness_with(cfg: CronwellConfig) -> Harness {
    let jobs_folder = PathBuf::from(&cfg.service.jobs_folder);
    std::fs::create_dir_all(&jobs_folder).unwrap();

    let clock = Arc::new(SqliteTriggerClock::new(Connection::open_in_memory().unwrap()).unwrap());
    let history = Arc::new(HistoryManager::new(store_conn()));
    let monitors = Arc::new(MonitorManager::new(store_conn()));
    let registry = Arc::new(NodeRegistry::new(store_conn()).unwrap());
    let peers = Arc::new(FakePeers::default());

    let runner = Arc::new(JobRunner::new(
        ProcessJobHost::new(),
        RestJobHost::new().unwrap(),
        InProcessJobHost::new(),
    ));
    runner.in_process().register(HANDLER, Arc::new(Scripted));

    let facade = SchedulerFacade::new(
        cfg,
        SchedulerServices {
            clock: clock.clone(),
            history: history.clone(),
            monitors,
            cluster: registry.clone(),
            peers: peers.clone(),
            hooks: Arc::new(HookRegistry::new()),
            runner,
        },
    );
    Harness {
        facade,
        clock,
        history,
        registry,
        peers,
        jobs_folder,
    }
}

fn store_conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    db::init_db(&conn).unwrap();
    conn
}

impl Harness {
    pub fn add_job(&self, group: &str, name: &str, concurrent: bool) -> JobKey {
        let key = JobKey::new(group, name);
        let mut job = JobDefinition::new(
            key.clone(),
            JobKind::InProcess {
                handler: HANDLER.into(),
            },
        );
        if !concurrent {
            job = job.non_concurrent();
        }
        self.facade.add_job(&job).unwrap();
        key
    }

    pub fn add_peer(&self, server: &str, heartbeat_age_secs: i64) {
        let mut node = ClusterNode::new(&NodeKey::new(server, 2306), format!("inst-{server}"), 12306);
        node.health_check_date = Utc::now() - chrono::Duration::seconds(heartbeat_age_secs);
        node.join_date = node.health_check_date;
        ClusterStore::add_cluster_node(self.registry.as_ref(), &node).unwrap();
    }

    pub fn node(&self, server: &str) -> Option<ClusterNode> {
        ClusterStore::get_cluster_node(self.registry.as_ref(), &NodeKey::new(server, 2306)).unwrap()
    }

    pub fn row(&self, fire_instance_id: &str) -> Option<HistoryLogEntry> {
        self.history.get_history_by_instance_id(fire_instance_id).unwrap()
    }
}

/// Poll `check` for up to two seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
