use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cronwell_core::monitor::{MonitorAction, MonitorAlert, MonitorEvent};
use cronwell_core::ports::{HistoryStore, MonitorStore};
use futures_util::future::join_all;
use tracing::{debug, error, instrument, warn};

use crate::error::MonitorError;
use crate::events::{ExecutionSnapshot, MonitorMessage};
use crate::hooks::HookRegistry;

pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Matches monitor actions against execution events and dispatches each
/// match to its hook.
///
/// Dispatch is best effort: a failing hook is logged and recorded as an
/// alert with `has_error`, and never affects other hooks or the job.
pub struct MonitorEngine {
    monitors: Arc<dyn MonitorStore>,
    history: Arc<dyn HistoryStore>,
    hooks: Arc<HookRegistry>,
    hook_timeout: Duration,
}

impl MonitorEngine {
    pub fn new(
        monitors: Arc<dyn MonitorStore>,
        history: Arc<dyn HistoryStore>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        Self {
            monitors,
            history,
            hooks,
            hook_timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    /// Evaluate `event` for `snapshot` and run every matching hook
    /// concurrently. Returns the recorded alerts.
    #[instrument(skip(self, snapshot), fields(event = %event))]
    pub async fn scan(&self, event: MonitorEvent, snapshot: &ExecutionSnapshot) -> Vec<MonitorAlert> {
        let actions = match self.monitors.get_monitor_actions_for_event(event) {
            Ok(actions) => actions,
            Err(e) => {
                error!(err = %e, "failed to load monitor actions");
                return Vec::new();
            }
        };

        let matched: Vec<MonitorAction> = actions
            .into_iter()
            .filter(|a| a.active && a.matches(event, snapshot.job_key.as_ref()))
            .filter(|a| self.condition_holds(a, event, snapshot))
            .collect();

        if matched.is_empty() {
            return Vec::new();
        }
        debug!(count = matched.len(), "dispatching monitor actions");

        let tasks = matched.into_iter().map(|action| {
            let hooks = Arc::clone(&self.hooks);
            let message = MonitorMessage::new(&action, event, snapshot);
            let timeout = self.hook_timeout;
            tokio::spawn(async move {
                let outcome = dispatch(&hooks, &action, &message, timeout).await;
                alert_for(&action, event, &message, outcome)
            })
        });

        let mut alerts = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok(mut alert) => {
                    match self.monitors.add_monitor_alert(&alert) {
                        Ok(id) => alert.id = id,
                        Err(e) => error!(err = %e, "failed to record monitor alert"),
                    }
                    alerts.push(alert);
                }
                Err(e) => error!(err = %e, "monitor hook task panicked"),
            }
        }
        alerts
    }

    /// Threshold and counter rules. Plain events always hold.
    fn condition_holds(&self, action: &MonitorAction, event: MonitorEvent, snapshot: &ExecutionSnapshot) -> bool {
        if !event.requires_argument() {
            return true;
        }
        let Some(arg) = action.argument_as_i64() else {
            warn!(monitor_id = action.id, argument = ?action.event_argument, "monitor argument is not a number");
            return false;
        };
        let Some(job) = snapshot.job_key.as_ref() else {
            return false;
        };

        match event {
            MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX => {
                snapshot.effected_rows.is_some_and(|rows| rows > arg)
            }
            MonitorEvent::ExecutionEndWithEffectedRowsLessThanX => {
                snapshot.effected_rows.is_some_and(|rows| rows < arg)
            }
            MonitorEvent::ExecutionFailXTimesInRow => {
                if arg <= 0 {
                    return false;
                }
                match self.history.count_fails_in_row(job, arg as u32) {
                    Ok(count) => i64::from(count) >= arg,
                    Err(e) => {
                        error!(job = %job, err = %e, "failed to count fails in row");
                        false
                    }
                }
            }
            MonitorEvent::ExecutionFailXTimesInHour => {
                if arg <= 0 {
                    return false;
                }
                let since = Utc::now() - chrono::Duration::hours(1);
                match self.history.count_fails_since(job, since) {
                    Ok(count) => i64::from(count) >= arg,
                    Err(e) => {
                        error!(job = %job, err = %e, "failed to count fails in hour");
                        false
                    }
                }
            }
            _ => true,
        }
    }
}

async fn dispatch(
    hooks: &HookRegistry,
    action: &MonitorAction,
    message: &MonitorMessage,
    timeout: Duration,
) -> Result<(), String> {
    let Some(hook) = hooks.get(&action.hook) else {
        warn!(hook = %action.hook, monitor_id = action.id, "monitor references unknown hook");
        return Err(MonitorError::UnknownHook(action.hook.clone()).to_string());
    };

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, hook.handle(message)).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(())) => {
            debug!(hook = %action.hook, duration_ms, "monitor hook completed");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(hook = %action.hook, monitor_id = action.id, duration_ms, err = %e, "monitor hook failed");
            Err(e.to_string())
        }
        Err(_) => {
            error!(hook = %action.hook, monitor_id = action.id, duration_ms, "monitor hook timed out");
            Err(format!("hook timed out after {}ms", timeout.as_millis()))
        }
    }
}

fn alert_for(
    action: &MonitorAction,
    event: MonitorEvent,
    message: &MonitorMessage,
    outcome: Result<(), String>,
) -> MonitorAlert {
    let details = &message.details;
    MonitorAlert {
        id: 0,
        monitor_id: action.id,
        monitor_title: action.title.clone(),
        event,
        job_group: details.job_key.as_ref().map(|k| k.group.clone()),
        job_name: details.job_key.as_ref().map(|k| k.name.clone()),
        fire_instance_id: details.fire_instance_id.clone(),
        hook: action.hook.clone(),
        group_id: action.group_id,
        has_error: outcome.is_err(),
        error_message: outcome.err(),
        alert_date: Utc::now(),
    }
}
