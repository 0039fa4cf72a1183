use std::sync::Arc;

use chrono::Utc;
use cronwell_core::history::{ExecutionStatus, HistoryCompletion};
use cronwell_core::job::{NewTrigger, Schedule, TriggerDetails};
use cronwell_core::monitor::MonitorEvent;
use cronwell_core::ports::{HistoryStore, TriggerClock};
use cronwell_core::types::{is_reserved_key, TriggerKey, RETRY_COUNTER_KEY, RETRY_TRIGGER_GROUP};
use cronwell_execution::{ExecutionOutcome, JobExecutionMetadata};
use cronwell_monitor::{events_for_outcome, BreakerTransition, CircuitBreaker, MonitorEngine};
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::fire::Fire;

/// What the history listener concluded about a finished fire.
#[derive(Debug, Clone, PartialEq)]
pub struct FireReport {
    pub status: ExecutionStatus,
    pub breaker: Option<BreakerTransition>,
}

impl FireReport {
    pub fn breaker_opened(&self) -> bool {
        matches!(self.breaker, Some(BreakerTransition::Opened { .. }))
    }
}

/// Persists the history row of every fire and raises the monitor events of
/// its lifecycle.
///
/// The `Running` row is written before the job starts; an error there
/// aborts the fire. Everything after the terminal update is best effort.
pub struct HistoryListener {
    history: Arc<dyn HistoryStore>,
    clock: Arc<dyn TriggerClock>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<MonitorEngine>,
    server: String,
}

impl HistoryListener {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        clock: Arc<dyn TriggerClock>,
        breaker: Arc<CircuitBreaker>,
        monitor: Arc<MonitorEngine>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            history,
            clock,
            breaker,
            monitor,
            server: server.into(),
        }
    }

    #[instrument(skip_all, fields(job = %fire.job.key, fire_instance_id = %fire.id))]
    pub async fn job_to_be_executed(&self, fire: &Fire) -> Result<()> {
        self.history
            .create_job_instance_log(&fire.history_entry(&self.server))?;
        self.monitor
            .scan(MonitorEvent::ExecutionStart, &fire.snapshot(&self.server))
            .await;
        Ok(())
    }

    #[instrument(skip_all, fields(job = %fire.job.key, fire_instance_id = %fire.id))]
    pub async fn job_vetoed(&self, fire: &Fire, reason: &str) -> Result<()> {
        warn!(reason, "job execution vetoed");
        self.history
            .create_job_instance_log(&fire.history_entry(&self.server))?;
        self.history
            .set_job_instance_log_status(&fire.id.to_string(), ExecutionStatus::Veto)?;
        let snapshot = fire
            .snapshot(&self.server)
            .with_result(ExecutionStatus::Veto, None, 0, None)
            .with_message(reason);
        self.monitor.scan(MonitorEvent::ExecutionVetoed, &snapshot).await;
        Ok(())
    }

    #[instrument(skip_all, fields(job = %fire.job.key, fire_instance_id = %fire.id))]
    pub async fn job_was_executed(
        &self,
        fire: &Fire,
        outcome: ExecutionOutcome,
        metadata: &JobExecutionMetadata,
        duration_ms: i64,
    ) -> FireReport {
        let status = outcome.status();
        let log = metadata.log_text();
        let exception = metadata.exception_column();
        let completion = HistoryCompletion {
            instance_id: fire.id.to_string(),
            status,
            end_date: Utc::now(),
            duration_ms,
            effected_rows: metadata.effected_rows(),
            log: (!log.is_empty()).then_some(log),
            exception: exception.clone(),
            is_stopped: outcome.is_stopped(),
        };
        if let Err(e) = self.history.update_history_job_run_log(&completion) {
            error!(err = %e, "failed to store job completion");
        }

        self.apply_data_updates(fire, metadata);

        let breaker = match self.breaker.on_outcome(&fire.job.key, status, Utc::now()) {
            Ok(transition) => transition,
            Err(e) => {
                error!(err = %e, "circuit breaker update failed");
                None
            }
        };

        let snapshot = fire.snapshot(&self.server).with_result(
            status,
            metadata.effected_rows(),
            duration_ms,
            exception,
        );
        match &breaker {
            Some(BreakerTransition::Opened { paused, resume_at }) => {
                let message = match resume_at {
                    Some(at) => format!("{} trigger(s) paused until {at}", paused.len()),
                    None => format!("{} trigger(s) paused", paused.len()),
                };
                let snapshot = snapshot.clone().with_message(message);
                self.monitor
                    .scan(MonitorEvent::CircuitBreakerOpened, &snapshot)
                    .await;
                self.monitor.scan(MonitorEvent::JobPaused, &snapshot).await;
            }
            Some(BreakerTransition::Reset) => {
                self.monitor
                    .scan(MonitorEvent::CircuitBreakerReset, &snapshot)
                    .await;
            }
            None => {}
        }

        for event in events_for_outcome(status, metadata.effected_rows()) {
            self.monitor.scan(event, &snapshot).await;
        }

        info!(%status, duration_ms, "job execution recorded");
        FireReport { status, breaker }
    }

    fn apply_data_updates(&self, fire: &Fire, metadata: &JobExecutionMetadata) {
        for (key, value) in metadata.job_data_updates() {
            if is_reserved_key(key) {
                warn!(key, "job tried to write a reserved data key");
                continue;
            }
            if let Err(e) = self.clock.put_job_data(&fire.job.key, key, value.as_deref()) {
                warn!(key, err = %e, "failed to update job data");
            }
        }
        // One-shot triggers of the reserved groups are gone by now.
        if is_reserved_key(&fire.trigger.key.group) {
            return;
        }
        for (key, value) in metadata.trigger_data_updates() {
            if is_reserved_key(key) {
                warn!(key, "job tried to write a reserved data key");
                continue;
            }
            if let Err(e) = self
                .clock
                .put_trigger_data(&fire.trigger.key, key, value.as_deref())
            {
                warn!(key, err = %e, "failed to update trigger data");
            }
        }
    }
}

/// Schedules a one-shot retry when a fire of a retrying trigger fails.
pub struct RetryListener {
    clock: Arc<dyn TriggerClock>,
}

impl RetryListener {
    pub fn new(clock: Arc<dyn TriggerClock>) -> Self {
        Self { clock }
    }

    /// Returns the retry trigger, if one was scheduled.
    #[instrument(skip_all, fields(job = %fire.job.key, trigger = %fire.trigger.key))]
    pub fn on_fire_finished(&self, fire: &Fire, status: ExecutionStatus) -> Result<Option<TriggerDetails>> {
        if status != ExecutionStatus::Fail {
            return Ok(None);
        }
        let trigger = &fire.trigger;
        let Some(span) = trigger.retry_span_secs.filter(|s| *s > 0) else {
            return Ok(None);
        };
        let max = trigger.max_retries.unwrap_or(0);
        let counter = trigger.retry_counter();
        if counter >= max {
            if max > 0 {
                warn!(retries = counter, "retries exhausted");
            }
            return Ok(None);
        }

        let at = Utc::now() + chrono::Duration::seconds(span as i64);
        let mut retry = NewTrigger::new(
            TriggerKey::new(RETRY_TRIGGER_GROUP, format!("{}.{}", fire.job.key, fire.id)),
            fire.job.key.clone(),
            Schedule::Once { at },
        )
        .with_retry(span, max);
        retry.timeout_secs = trigger.timeout_secs;
        retry.data = trigger.data.clone();
        retry
            .data
            .insert(RETRY_COUNTER_KEY.to_string(), (counter + 1).to_string());

        let scheduled = self.clock.schedule_trigger(&retry)?;
        info!(retry = counter + 1, max, at = %at, "retry scheduled");
        Ok(Some(scheduled))
    }
}
