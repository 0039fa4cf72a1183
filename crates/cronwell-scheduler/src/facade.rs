use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use cronwell_cluster::{ClusterEvent, ClusterGossip, GossipSettings, LocalSchedulerState, PeerClient};
use cronwell_core::config::CronwellConfig;
use cronwell_core::history::MANUAL_TRIGGER_ID;
use cronwell_core::job::{JobDefinition, NewTrigger, Schedule, TriggerDetails, TriggerState};
use cronwell_core::monitor::MonitorEvent;
use cronwell_core::ports::{ClusterStore, HistoryStore, MonitorStore};
use cronwell_core::types::{
    generate_id, is_reserved_key, visible_data, DataMap, FireInstanceId, JobKey, TriggerKey,
    MANUAL_TRIGGER_GROUP,
};
use cronwell_execution::JobRunner;
use cronwell_monitor::{CircuitBreaker, CircuitBreakerMetadata, ExecutionSnapshot, HookRegistry, MonitorEngine};
use cronwell_protocol::messages::{
    HealthCheckReply, PersistenceRunningJobInfo, RunningData, RunningJobDetails,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::clock::SqliteTriggerClock;
use crate::engine::SchedulerEngine;
use crate::error::{Result, SchedulerError};
use crate::listener::HistoryListener;
use crate::running::RunningJobs;
use crate::system_jobs::{SystemJob, SystemJobs};

/// Bound on removing this node from the registry at shutdown.
const REMOVE_SELF_TIMEOUT: Duration = Duration::from_secs(3);
/// How long shutdown waits for stopped runs to record their outcome.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

/// Instance id and clock state, shared with the gossip layer.
pub struct SchedulerState {
    instance_id: String,
    running: AtomicBool,
}

impl SchedulerState {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            running: AtomicBool::new(false),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl LocalSchedulerState for SchedulerState {
    fn instance_id(&self) -> String {
        self.instance_id.clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Everything the facade is wired from.
pub struct SchedulerServices {
    pub clock: Arc<SqliteTriggerClock>,
    pub history: Arc<dyn HistoryStore>,
    pub monitors: Arc<dyn MonitorStore>,
    pub cluster: Arc<dyn ClusterStore>,
    pub peers: Arc<dyn PeerClient>,
    pub hooks: Arc<HookRegistry>,
    pub runner: Arc<JobRunner>,
}

/// Entry point for job management, startup and shutdown, and the local
/// side of every cluster RPC.
pub struct SchedulerFacade {
    config: CronwellConfig,
    server: String,
    state: Arc<SchedulerState>,
    clock: Arc<SqliteTriggerClock>,
    cluster: Arc<dyn ClusterStore>,
    gossip: Arc<ClusterGossip>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<MonitorEngine>,
    engine: Arc<SchedulerEngine>,
    running: Arc<RunningJobs>,
    shutdown_tx: watch::Sender<bool>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ClusterEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerFacade {
    pub fn new(config: CronwellConfig, services: SchedulerServices) -> Self {
        let server = config.service.server_name();
        let state = Arc::new(SchedulerState::new(config.instance_id()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let gossip = Arc::new(
            ClusterGossip::new(
                services.cluster.clone(),
                services.peers,
                state.clone(),
                GossipSettings::from_config(&config),
            )
            .with_events(events_tx),
        );
        let monitor = Arc::new(MonitorEngine::new(
            services.monitors.clone(),
            services.history.clone(),
            services.hooks,
        ));
        let breaker = Arc::new(CircuitBreaker::new(services.clock.clone()));
        let running = Arc::new(RunningJobs::new(server.clone(), state.instance_id()));
        let history = Arc::new(HistoryListener::new(
            services.history.clone(),
            services.clock.clone(),
            breaker.clone(),
            monitor.clone(),
            server.clone(),
        ));
        let system = Arc::new(
            SystemJobs::new(
                services.history,
                services.monitors,
                services.clock.clone(),
                breaker.clone(),
                monitor.clone(),
                running.clone(),
                config.retention.clone(),
                server.clone(),
            )
            .with_gossip(gossip.clone()),
        );
        let engine = Arc::new(
            SchedulerEngine::new(
                services.clock.clone(),
                services.runner,
                running.clone(),
                history,
                system,
                state.clone(),
                config.execution.clone(),
                config.service.max_concurrency,
            )
            .with_gossip(gossip.clone()),
        );
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            server,
            state,
            clock: services.clock,
            cluster: services.cluster,
            gossip,
            breaker,
            monitor,
            engine,
            running,
            shutdown_tx,
            events: Mutex::new(Some(events_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn clock(&self) -> &Arc<SqliteTriggerClock> {
        &self.clock
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    pub fn gossip(&self) -> &Arc<ClusterGossip> {
        &self.gossip
    }

    pub fn monitor(&self) -> &Arc<MonitorEngine> {
        &self.monitor
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    // ----- lifecycle -------------------------------------------------------

    /// Startup sequence: conflict check, housekeeping jobs, warm-up delay,
    /// clock start, then the cluster join gate. A failed gate leaves the
    /// clock in standby and returns the error; the caller shuts down.
    #[instrument(skip(self), fields(node = %self.gossip.current_node()))]
    pub async fn start(&self) -> Result<()> {
        let nodes = self.cluster.get_cluster_nodes()?;
        self.gossip.validate_cluster_conflict(&nodes)?;

        self.install_system_jobs()?;
        self.spawn_background();

        let delay = Duration::from_secs(self.config.service.start_delay_secs);
        if !delay.is_zero() {
            info!(delay_secs = delay.as_secs(), "waiting before starting the trigger clock");
            tokio::time::sleep(delay).await;
        }
        self.start_clock();

        if self.config.cluster.clustering {
            if let Err(e) = self.join_cluster().await {
                self.standby();
                return Err(e);
            }
        }
        info!(instance_id = %self.state.instance_id(), "scheduler started");
        Ok(())
    }

    /// Gate on the peers believed live, then register this node.
    async fn join_cluster(&self) -> Result<()> {
        let now = Utc::now();
        let tolerance = self.gossip.settings().live_tolerance;
        let live: Vec<_> = self
            .cluster
            .get_cluster_nodes()?
            .into_iter()
            .filter(|n| n.is_live(now, tolerance))
            .collect();
        if !self.gossip.health_check(&live).await {
            return Err(SchedulerError::Startup(
                "cluster health check failed, node will not join".into(),
            ));
        }
        self.gossip.join().await?;
        Ok(())
    }

    fn install_system_jobs(&self) -> Result<()> {
        for job in SystemJob::ALL {
            self.clock.add_job(&job.definition())?;
            match job.trigger(&self.config) {
                Some(trigger) => {
                    self.clock.schedule_trigger(&trigger)?;
                }
                None => {
                    let key = job.trigger_key();
                    if self.clock.get_trigger(&key)?.is_some() {
                        self.clock.unschedule_trigger(&key)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_background(&self) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return;
        }
        tasks.push(tokio::spawn(
            self.engine.clone().run(self.shutdown_tx.subscribe()),
        ));

        let Some(mut events) = lock(&self.events).take() else {
            return;
        };
        let monitor = self.monitor.clone();
        let server = self.server.clone();
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = events.recv() => forward_cluster_event(&monitor, &server, event).await,
                    _ = shutdown.changed() => {
                        while let Ok(event) = events.try_recv() {
                            forward_cluster_event(&monitor, &server, event).await;
                        }
                        break;
                    }
                }
            }
        }));
    }

    /// Stand by, stop running fires, leave the cluster and stop the loops.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.standby();
        let stopped = self.running.stop_all();
        let deadline = Instant::now() + SHUTDOWN_DRAIN;
        while !self.running.is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        if !self.running.is_empty() {
            warn!(remaining = self.running.len(), "jobs still running at shutdown");
        }

        if self.config.cluster.clustering {
            match tokio::time::timeout(REMOVE_SELF_TIMEOUT, self.gossip.remove_self()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(err = %e, "failed to leave cluster"),
                Err(_) => warn!("timed out leaving cluster"),
            }
        }

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            let _ = task.await;
        }
        info!(stopped, "scheduler shut down");
    }

    /// Stop firing triggers. Running fires continue.
    pub fn standby(&self) {
        if self.state.is_running() {
            info!("scheduler in standby");
        }
        self.state.set_running(false);
    }

    pub fn start_clock(&self) {
        if !self.state.is_running() {
            info!("trigger clock started");
        }
        self.state.set_running(true);
    }

    /// Stand by this node and every peer.
    pub async fn stop_cluster(&self) -> Result<()> {
        self.standby();
        self.gossip.stop_scheduler().await?;
        Ok(())
    }

    pub async fn start_cluster(&self) -> Result<()> {
        self.start_clock();
        self.gossip.start_scheduler().await?;
        Ok(())
    }

    // ----- jobs and triggers -----------------------------------------------

    pub fn add_job(&self, job: &JobDefinition) -> Result<()> {
        reject_reserved_group(&job.key.group)?;
        reject_reserved_keys(&job.data)?;
        self.clock.add_job(job)?;
        info!(job = %job.key, "job added");
        Ok(())
    }

    pub fn remove_job(&self, job: &JobKey) -> Result<()> {
        reject_reserved_group(&job.group)?;
        self.clock.remove_job(job)?;
        info!(job = %job, "job removed");
        Ok(())
    }

    pub fn schedule_trigger(&self, trigger: &NewTrigger) -> Result<TriggerDetails> {
        reject_reserved_group(&trigger.key.group)?;
        reject_reserved_group(&trigger.job_key.group)?;
        reject_reserved_keys(&trigger.data)?;
        let details = self.clock.schedule_trigger(trigger)?;
        info!(trigger = %details.key, job = %details.job_key, next_fire = ?details.next_fire, "trigger scheduled");
        Ok(details)
    }

    pub fn unschedule_trigger(&self, key: &TriggerKey) -> Result<()> {
        reject_reserved_group(&key.group)?;
        self.clock.unschedule_trigger(key)
    }

    pub fn configure_circuit_breaker(&self, job: &JobKey, metadata: &CircuitBreakerMetadata) -> Result<()> {
        self.require_job(job)?;
        self.breaker.configure(job, metadata)?;
        info!(job = %job, breaker = %metadata, "circuit breaker configured");
        Ok(())
    }

    fn require_job(&self, job: &JobKey) -> Result<JobDefinition> {
        self.clock
            .get_job(job)?
            .ok_or_else(|| SchedulerError::JobNotFound {
                key: job.to_string(),
            })
    }

    /// Fire `job` now, outside its schedule. `data` overlays the job data.
    #[instrument(skip(self, data), fields(job = %job))]
    pub fn invoke_job(&self, job: &JobKey, data: DataMap) -> Result<FireInstanceId> {
        reject_reserved_group(&job.group)?;
        self.require_job(job)?;
        let now = Utc::now();
        let trigger = TriggerDetails {
            key: TriggerKey::new(MANUAL_TRIGGER_GROUP, generate_id()),
            id: MANUAL_TRIGGER_ID.to_string(),
            job_key: job.clone(),
            schedule: Schedule::Once { at: now },
            state: TriggerState::Normal,
            timeout_secs: None,
            retry_span_secs: None,
            max_retries: None,
            data: visible_data(&data),
            next_fire: None,
            previous_fire: Some(now),
            created_at: now,
        };
        let id = self.engine.dispatch(trigger, now);
        info!(fire_instance_id = %id, "job invoked");
        Ok(id)
    }

    /// Pause every active trigger of `job`. Returns the triggers paused.
    #[instrument(skip(self), fields(job = %job))]
    pub async fn pause_job(&self, job: &JobKey) -> Result<Vec<TriggerKey>> {
        self.require_job(job)?;
        let mut paused = Vec::new();
        for trigger in self.clock.triggers_of_job(job)? {
            if trigger.state.is_active() {
                self.clock.pause_trigger(&trigger.key)?;
                paused.push(trigger.key);
            }
        }
        info!(paused = paused.len(), "job paused");
        let snapshot = ExecutionSnapshot::for_job(job.clone(), self.server.clone())
            .with_message(format!("{} trigger(s) paused", paused.len()));
        self.monitor.scan(MonitorEvent::JobPaused, &snapshot).await;
        Ok(paused)
    }

    /// Resume every paused trigger of `job`. Returns the triggers resumed.
    #[instrument(skip(self), fields(job = %job))]
    pub async fn resume_job(&self, job: &JobKey) -> Result<Vec<TriggerKey>> {
        self.require_job(job)?;
        let mut resumed = Vec::new();
        for trigger in self.clock.triggers_of_job(job)? {
            if trigger.state == TriggerState::Paused {
                self.clock.resume_trigger(&trigger.key)?;
                resumed.push(trigger.key);
            }
        }
        info!(resumed = resumed.len(), "job resumed");
        let snapshot = ExecutionSnapshot::for_job(job.clone(), self.server.clone())
            .with_message(format!("{} trigger(s) resumed", resumed.len()));
        self.monitor.scan(MonitorEvent::JobResumed, &snapshot).await;
        Ok(resumed)
    }

    // ----- running jobs, cluster wide --------------------------------------

    fn clustering(&self) -> bool {
        self.config.cluster.clustering
    }

    /// Stop a fire wherever it runs.
    pub async fn stop_running_job(&self, fire_instance_id: &str) -> Result<bool> {
        if self.running.stop(fire_instance_id) {
            return Ok(true);
        }
        if self.clustering() {
            return Ok(self.gossip.stop_running_job(fire_instance_id).await?);
        }
        Ok(false)
    }

    pub async fn is_job_running(&self, job: &JobKey) -> Result<bool> {
        if self.running.is_job_running(job) {
            return Ok(true);
        }
        if self.clustering() {
            return Ok(self.gossip.is_job_running(job).await?);
        }
        Ok(false)
    }

    pub async fn get_running_job(&self, fire_instance_id: &str) -> Result<Option<RunningJobDetails>> {
        if let Some(job) = self.running.get(fire_instance_id) {
            return Ok(Some(job));
        }
        if self.clustering() {
            return Ok(self.gossip.get_running_job(fire_instance_id).await?);
        }
        Ok(None)
    }

    pub async fn get_running_jobs(&self) -> Result<Vec<RunningJobDetails>> {
        let mut jobs = self.running.list();
        if self.clustering() {
            jobs.extend(self.gossip.get_running_jobs().await?);
        }
        Ok(jobs)
    }

    pub async fn get_running_data(&self, fire_instance_id: &str) -> Result<Option<RunningData>> {
        if let Some(data) = self.running.running_data(fire_instance_id) {
            return Ok(Some(data));
        }
        if self.clustering() {
            return Ok(self.gossip.get_running_data(fire_instance_id).await?);
        }
        Ok(None)
    }

    // ----- local answers to peer RPCs --------------------------------------

    pub fn health_check_reply(&self) -> HealthCheckReply {
        HealthCheckReply {
            instance_id: self.state.instance_id(),
            server: self.server.clone(),
            port: self.config.service.http_port,
            scheduler_running: self.state.is_running(),
        }
    }

    pub fn local_is_job_running(&self, job: &JobKey) -> bool {
        self.running.is_job_running(job)
    }

    pub fn local_running_job(&self, fire_instance_id: &str) -> Option<RunningJobDetails> {
        self.running.get(fire_instance_id)
    }

    pub fn local_running_jobs(&self) -> Vec<RunningJobDetails> {
        self.running.list()
    }

    pub fn local_running_data(&self, fire_instance_id: &str) -> Option<RunningData> {
        self.running.running_data(fire_instance_id)
    }

    pub fn local_persistence_info(&self) -> Vec<PersistenceRunningJobInfo> {
        self.running.persistence_info()
    }

    pub fn local_stop_running_job(&self, fire_instance_id: &str) -> bool {
        self.running.stop(fire_instance_id)
    }

    pub fn job_folder_exists(&self, folder: &str) -> bool {
        self.job_path(&[folder]).is_some_and(|p| p.is_dir())
    }

    pub fn job_file_exists(&self, folder: &str, filename: &str) -> bool {
        self.job_path(&[folder, filename]).is_some_and(|p| p.is_file())
    }

    /// Resolve under the jobs folder. Absolute paths and `..` are refused.
    fn job_path(&self, parts: &[&str]) -> Option<PathBuf> {
        let mut path = PathBuf::from(&self.config.service.jobs_folder);
        for part in parts {
            let relative = Path::new(part);
            if part.is_empty()
                || !relative
                    .components()
                    .all(|c| matches!(c, Component::Normal(_)))
            {
                return None;
            }
            path.push(relative);
        }
        Some(path)
    }
}

async fn forward_cluster_event(monitor: &MonitorEngine, server: &str, event: ClusterEvent) {
    let (kind, message) = match &event {
        ClusterEvent::Joined(node) => (MonitorEvent::ClusterNodeJoined, format!("{node} joined the cluster")),
        ClusterEvent::Removed(node) => (MonitorEvent::ClusterNodeRemoved, format!("{node} left the cluster")),
    };
    monitor
        .scan(kind, &ExecutionSnapshot::system(message, server))
        .await;
}

fn reject_reserved_group(group: &str) -> Result<()> {
    if is_reserved_key(group) {
        return Err(SchedulerError::Reserved(format!("group {group} is reserved")));
    }
    Ok(())
}

fn reject_reserved_keys(data: &DataMap) -> Result<()> {
    match data.keys().find(|k| is_reserved_key(k)) {
        Some(key) => Err(SchedulerError::Reserved(format!("data key {key} is reserved"))),
        None => Ok(()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
