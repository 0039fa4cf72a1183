use chrono::{DateTime, Utc};
use cronwell_core::history::ExecutionStatus;
use cronwell_core::monitor::{MonitorAction, MonitorEvent};
use cronwell_core::types::{JobKey, TriggerKey};
use serde::{Deserialize, Serialize};

/// What monitor rules are evaluated against: a finished (or starting) run,
/// or a system occurrence with no job attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_key: Option<JobKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_key: Option<TriggerKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effected_rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Free text for system events (node name, paused triggers, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub server: String,
    pub created: DateTime<Utc>,
}

impl ExecutionSnapshot {
    pub fn for_job(job_key: JobKey, server: impl Into<String>) -> Self {
        Self {
            fire_instance_id: None,
            job_key: Some(job_key),
            job_id: None,
            trigger_key: None,
            status: None,
            effected_rows: None,
            duration_ms: None,
            exception: None,
            message: None,
            server: server.into(),
            created: Utc::now(),
        }
    }

    pub fn system(message: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            job_key: None,
            message: Some(message.into()),
            ..Self::for_job(JobKey::new("", ""), server)
        }
    }

    pub fn with_fire(
        mut self,
        fire_instance_id: impl Into<String>,
        job_id: impl Into<String>,
        trigger_key: TriggerKey,
    ) -> Self {
        self.fire_instance_id = Some(fire_instance_id.into());
        self.job_id = Some(job_id.into());
        self.trigger_key = Some(trigger_key);
        self
    }

    pub fn with_result(
        mut self,
        status: ExecutionStatus,
        effected_rows: Option<i64>,
        duration_ms: i64,
        exception: Option<String>,
    ) -> Self {
        self.status = Some(status);
        self.effected_rows = effected_rows;
        self.duration_ms = Some(duration_ms);
        self.exception = exception;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Body delivered to a hook for one matched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorMessage {
    pub event: MonitorEvent,
    pub monitor_id: i64,
    pub monitor_title: String,
    pub group_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_argument: Option<String>,
    pub details: ExecutionSnapshot,
}

impl MonitorMessage {
    pub fn new(action: &MonitorAction, event: MonitorEvent, details: &ExecutionSnapshot) -> Self {
        Self {
            event,
            monitor_id: action.id,
            monitor_title: action.title.clone(),
            group_id: action.group_id,
            event_argument: action.event_argument.clone(),
            details: details.clone(),
        }
    }
}

/// Events to scan once a run has its terminal status. Threshold events are
/// always listed; each action's own argument decides whether it fires.
pub fn events_for_outcome(status: ExecutionStatus, effected_rows: Option<i64>) -> Vec<MonitorEvent> {
    let mut events = vec![
        MonitorEvent::ExecutionEnd,
        MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX,
        MonitorEvent::ExecutionEndWithEffectedRowsLessThanX,
    ];
    match status {
        ExecutionStatus::Success => {
            events.push(MonitorEvent::ExecutionSuccess);
            if effected_rows == Some(0) {
                events.push(MonitorEvent::ExecutionSuccessWithNoEffectedRows);
            }
        }
        ExecutionStatus::Fail => {
            events.push(MonitorEvent::ExecutionFail);
            events.push(MonitorEvent::ExecutionFailXTimesInRow);
            events.push(MonitorEvent::ExecutionFailXTimesInHour);
        }
        ExecutionStatus::Running | ExecutionStatus::Veto | ExecutionStatus::Stopped => {}
    }
    events
}
