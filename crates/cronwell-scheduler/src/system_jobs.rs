//! Housekeeping jobs that live in the reserved `__system` group.
//!
//! They are stored like any other job so the trigger clock drives them, but
//! the engine runs them directly and writes no history rows for them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cronwell_cluster::ClusterGossip;
use cronwell_core::config::{CronwellConfig, RetentionConfig};
use cronwell_core::history::HistoryProgress;
use cronwell_core::job::{JobDefinition, JobKind, NewTrigger, Schedule, TriggerDetails};
use cronwell_core::monitor::MonitorEvent;
use cronwell_core::ports::{HistoryStore, MonitorStore, TriggerClock};
use cronwell_core::types::{JobKey, TriggerKey, SYSTEM_GROUP};
use cronwell_monitor::circuit_breaker::CIRCUIT_BREAKER_JOB;
use cronwell_monitor::{CircuitBreaker, ExecutionSnapshot, MonitorEngine};
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::running::RunningJobs;

const PERSIST_DATA_JOB: &str = "PersistData";
const HEALTH_CHECK_JOB: &str = "ClusterHealthCheck";
const RETENTION_JOB: &str = "Retention";

/// Writes of the persist-data job are retried this many times, waiting
/// 1, 2, 3 units.
const PERSIST_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemJob {
    PersistData,
    ClusterHealthCheck,
    Retention,
    CircuitBreakerResume,
}

impl SystemJob {
    pub const ALL: [SystemJob; 4] = [
        SystemJob::PersistData,
        SystemJob::ClusterHealthCheck,
        SystemJob::Retention,
        SystemJob::CircuitBreakerResume,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemJob::PersistData => PERSIST_DATA_JOB,
            SystemJob::ClusterHealthCheck => HEALTH_CHECK_JOB,
            SystemJob::Retention => RETENTION_JOB,
            SystemJob::CircuitBreakerResume => CIRCUIT_BREAKER_JOB,
        }
    }

    pub fn key(self) -> JobKey {
        JobKey::new(SYSTEM_GROUP, self.name())
    }

    pub fn from_key(key: &JobKey) -> Option<Self> {
        if !key.is_system() {
            return None;
        }
        Self::ALL.into_iter().find(|j| j.name() == key.name)
    }

    pub fn definition(self) -> JobDefinition {
        let mut job = JobDefinition::new(
            self.key(),
            JobKind::InProcess {
                handler: self.name().to_string(),
            },
        )
        .non_concurrent();
        job.description = Some(
            match self {
                SystemJob::PersistData => "flush running job logs into history",
                SystemJob::ClusterHealthCheck => "cluster heartbeat and dead node eviction",
                SystemJob::Retention => "delete old history rows and monitor alerts",
                SystemJob::CircuitBreakerResume => "resume jobs paused by a circuit breaker",
            }
            .to_string(),
        );
        job
    }

    /// The job's own recurring trigger. The resume job is only fired by
    /// one-shot triggers queued by the circuit breaker; the health check only
    /// runs when clustering.
    pub fn trigger(self, cfg: &CronwellConfig) -> Option<NewTrigger> {
        let schedule = match self {
            SystemJob::PersistData => Schedule::Interval {
                every_secs: cfg.execution.persist_running_jobs_secs.max(1),
            },
            SystemJob::ClusterHealthCheck if cfg.cluster.clustering => Schedule::Interval {
                every_secs: cfg.cluster.health_check_interval_secs.max(1),
            },
            SystemJob::Retention => Schedule::Daily { hour: 0, minute: 30 },
            SystemJob::ClusterHealthCheck | SystemJob::CircuitBreakerResume => return None,
        };
        Some(NewTrigger::new(self.trigger_key(), self.key(), schedule))
    }

    pub fn trigger_key(self) -> TriggerKey {
        TriggerKey::new(SYSTEM_GROUP, self.name())
    }
}

/// Runs the housekeeping jobs.
pub struct SystemJobs {
    history: Arc<dyn HistoryStore>,
    monitors: Arc<dyn MonitorStore>,
    clock: Arc<dyn TriggerClock>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<MonitorEngine>,
    running: Arc<RunningJobs>,
    gossip: Option<Arc<ClusterGossip>>,
    retention: RetentionConfig,
    server: String,
    backoff_unit: Duration,
}

impl SystemJobs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        history: Arc<dyn HistoryStore>,
        monitors: Arc<dyn MonitorStore>,
        clock: Arc<dyn TriggerClock>,
        breaker: Arc<CircuitBreaker>,
        monitor: Arc<MonitorEngine>,
        running: Arc<RunningJobs>,
        retention: RetentionConfig,
        server: impl Into<String>,
    ) -> Self {
        Self {
            history,
            monitors,
            clock,
            breaker,
            monitor,
            running,
            gossip: None,
            retention,
            server: server.into(),
            backoff_unit: Duration::from_secs(1),
        }
    }

    /// Cluster-wide persistence and the heartbeat job need the gossip layer.
    pub fn with_gossip(mut self, gossip: Arc<ClusterGossip>) -> Self {
        self.gossip = Some(gossip);
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    #[instrument(skip(self, trigger), fields(trigger = %trigger.key))]
    pub async fn run(&self, job: SystemJob, trigger: &TriggerDetails) -> Result<()> {
        match job {
            SystemJob::PersistData => {
                let flushed = self.persist_running_data().await;
                debug!(flushed, "running job data persisted");
            }
            SystemJob::ClusterHealthCheck => match &self.gossip {
                Some(gossip) => gossip.health_check_with_update().await?,
                None => debug!("clustering disabled, health check skipped"),
            },
            SystemJob::Retention => {
                self.apply_retention()?;
            }
            SystemJob::CircuitBreakerResume => {
                let (job, resumed) = self.breaker.resume(&trigger.data)?;
                let snapshot = ExecutionSnapshot::for_job(job, self.server.clone())
                    .with_message(format!("{} trigger(s) resumed by circuit breaker", resumed.len()));
                self.monitor.scan(MonitorEvent::JobResumed, &snapshot).await;
            }
        }
        Ok(())
    }

    /// Flush log, exceptions and duration of every running fire (this node
    /// and its peers) into its `Running` history row. Returns rows updated.
    pub async fn persist_running_data(&self) -> usize {
        let mut infos = self.running.persistence_info();
        if let Some(gossip) = &self.gossip {
            if gossip.settings().clustering {
                match gossip.get_persistence_running_jobs_info().await {
                    Ok(remote) => infos.extend(remote),
                    Err(e) => warn!(err = %e, "failed to collect running jobs from peers"),
                }
            }
        }

        let mut flushed = 0;
        for info in infos {
            let progress = HistoryProgress {
                instance_id: info.fire_instance_id,
                log: info.log,
                exception: info.exceptions,
                duration_ms: info.duration_ms,
            };
            let history = &self.history;
            let result = with_linear_backoff(self.backoff_unit, PERSIST_RETRIES, || {
                let progress = &progress;
                async move { history.persist_job_instance_data(progress) }
            })
            .await;
            match result {
                Ok(true) => flushed += 1,
                Ok(false) => debug!(fire_instance_id = %progress.instance_id, "history row no longer running"),
                Err(e) => error!(fire_instance_id = %progress.instance_id, err = %e, "failed to persist running job data"),
            }
        }
        flushed
    }

    /// Delete history and alerts past their retention. Jobs with their own
    /// `log_retention_days` are trimmed to that window as well.
    pub fn apply_retention(&self) -> Result<usize> {
        let now = Utc::now();
        let mut removed = 0;

        let before = now - chrono::Duration::days(i64::from(self.retention.history_days));
        removed += self.history.clear_history_older_than(before)?;

        for job in self.clock.list_jobs()? {
            if let Some(days) = job.log_retention_days {
                let before = now - chrono::Duration::days(i64::from(days));
                removed += self.history.clear_job_history_older_than(&job.key, before)?;
            }
        }

        let before = now - chrono::Duration::days(i64::from(self.retention.alert_days));
        let alerts = self.monitors.clear_alerts_older_than(before)?;
        info!(history = removed, alerts, "retention applied");
        Ok(removed + alerts)
    }
}

/// Run `op`, retrying up to `retries` times and waiting `unit * attempt`
/// before each retry.
async fn with_linear_backoff<T, F, Fut>(
    unit: Duration,
    retries: u32,
    mut op: F,
) -> cronwell_core::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = cronwell_core::Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < retries => {
                attempt += 1;
                warn!(attempt, err = %e, "write failed, retrying");
                tokio::time::sleep(unit * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
