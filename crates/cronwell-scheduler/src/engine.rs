use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cronwell_cluster::{ClusterGossip, LocalSchedulerState};
use cronwell_core::config::ExecutionConfig;
use cronwell_core::history::ExecutionStatus;
use cronwell_core::job::TriggerDetails;
use cronwell_core::types::FireInstanceId;
use cronwell_core::CronwellError;
use cronwell_execution::{ExecutionLimits, ExecutionTracker, JobRunner};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock::SqliteTriggerClock;
use crate::error::{Result, SchedulerError};
use crate::fire::Fire;
use crate::listener::{HistoryListener, RetryListener};
use crate::running::{RunningJob, RunningJobs};
use crate::system_jobs::{SystemJob, SystemJobs};

/// Drives the trigger clock: polls due triggers every second and runs each
/// fire on its own task, at most `max_concurrency` at a time.
pub struct SchedulerEngine {
    clock: Arc<SqliteTriggerClock>,
    runner: Arc<JobRunner>,
    tracker: ExecutionTracker,
    running: Arc<RunningJobs>,
    history: Arc<HistoryListener>,
    retry: RetryListener,
    system: Arc<SystemJobs>,
    gossip: Option<Arc<ClusterGossip>>,
    state: Arc<dyn LocalSchedulerState>,
    permits: Arc<Semaphore>,
    execution: ExecutionConfig,
    poll_interval: Duration,
}

impl SchedulerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<SqliteTriggerClock>,
        runner: Arc<JobRunner>,
        running: Arc<RunningJobs>,
        history: Arc<HistoryListener>,
        system: Arc<SystemJobs>,
        state: Arc<dyn LocalSchedulerState>,
        execution: ExecutionConfig,
        max_concurrency: usize,
    ) -> Self {
        Self {
            retry: RetryListener::new(clock.clone()),
            tracker: ExecutionTracker::new(execution.max_aggregate_exceptions),
            clock,
            runner,
            running,
            history,
            system,
            gossip: None,
            state,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            execution,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Non-concurrent jobs are checked against the whole cluster.
    pub fn with_gossip(mut self, gossip: Arc<ClusterGossip>) -> Self {
        self.gossip = Some(gossip);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn running(&self) -> &Arc<RunningJobs> {
        &self.running
    }

    /// Main event loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()) {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fire every due trigger. Nothing fires while the scheduler stands by.
    pub fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> Result<usize> {
        if !self.state.is_running() {
            return Ok(0);
        }
        let mut fired = 0;
        for trigger in self.clock.due_triggers(now)? {
            // Another node sharing the database may have claimed it first.
            if self.clock.mark_fired(&trigger, now)? {
                self.dispatch(trigger, now);
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Run `trigger` on a new task. Returns the fire instance id.
    pub fn dispatch(self: &Arc<Self>, trigger: TriggerDetails, fire_time: DateTime<Utc>) -> FireInstanceId {
        let id = FireInstanceId::new();
        let engine = Arc::clone(self);
        let fire_id = id.clone();
        tokio::spawn(async move {
            let key = trigger.key.clone();
            if let Err(e) = engine.fire(fire_id, trigger, fire_time).await {
                error!(trigger = %key, err = %e, "trigger fire failed");
            }
        });
        id
    }

    /// Run one fire to completion. `None` for housekeeping jobs.
    pub async fn fire(
        &self,
        id: FireInstanceId,
        trigger: TriggerDetails,
        fire_time: DateTime<Utc>,
    ) -> Result<Option<ExecutionStatus>> {
        let job = self
            .clock
            .get_job(&trigger.job_key)?
            .ok_or_else(|| SchedulerError::JobNotFound {
                key: trigger.job_key.to_string(),
            })?;

        if job.key.is_system() {
            let system = SystemJob::from_key(&job.key).ok_or_else(|| SchedulerError::JobNotFound {
                key: job.key.to_string(),
            })?;
            self.system.run(system, &trigger).await?;
            return Ok(None);
        }

        let fire = Fire::new(id, job, trigger, fire_time);
        let fire_id = fire.id.to_string();
        let key = fire.job.key.clone();

        if !fire.job.concurrent {
            if !self.running.claim(&key, &fire_id) {
                self.history
                    .job_vetoed(&fire, "previous fire is still running on this node")
                    .await?;
                return Ok(Some(ExecutionStatus::Veto));
            }
            if self.is_running_elsewhere(&fire).await {
                self.running.release(&key, &fire_id);
                self.history
                    .job_vetoed(&fire, "previous fire is still running on another node")
                    .await?;
                return Ok(Some(ExecutionStatus::Veto));
            }
        }

        let result = self.execute(&fire).await;
        self.running.release(&key, &fire_id);
        result.map(Some)
    }

    async fn is_running_elsewhere(&self, fire: &Fire) -> bool {
        let Some(gossip) = &self.gossip else {
            return false;
        };
        if !gossip.settings().clustering {
            return false;
        }
        match gossip.is_job_running(&fire.job.key).await {
            Ok(running) => running,
            Err(e) => {
                warn!(job = %fire.job.key, err = %e, "cluster running check failed");
                false
            }
        }
    }

    async fn execute(&self, fire: &Fire) -> Result<ExecutionStatus> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CronwellError::Internal("execution permits closed".into()))?;

        self.history.job_to_be_executed(fire).await?;

        let fire_id = fire.id.to_string();
        let sink = self.tracker.get_or_create(&fire_id);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        self.running.insert(RunningJob {
            fire_instance_id: fire_id.clone(),
            job_key: fire.job.key.clone(),
            job_id: fire.job.id.clone(),
            trigger_key: fire.trigger.key.clone(),
            trigger_id: fire.trigger.id.clone(),
            data: fire.data.clone(),
            fire_time: fire.fire_time,
            started,
            sink: sink.clone(),
            cancel: cancel.clone(),
        });
        debug!(job = %fire.job.key, fire_instance_id = %fire_id, "job to be executed");

        let limits = ExecutionLimits::for_trigger(fire.trigger.timeout_secs, &self.execution);
        let outcome = self
            .runner
            .execute(&fire.context(), &sink, limits, &cancel)
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let metadata = self.tracker.take(&fire_id).unwrap_or(sink).finalize();
        let report = self
            .history
            .job_was_executed(fire, outcome, &metadata, duration_ms)
            .await;
        // Listed as running until the terminal row is written.
        self.running.remove(&fire_id);

        if !report.breaker_opened() {
            if let Err(e) = self.retry.on_fire_finished(fire, report.status) {
                error!(job = %fire.job.key, err = %e, "failed to schedule retry");
            }
        }
        Ok(report.status)
    }
}
