use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::JobKey;

/// Events a monitor action can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorEvent {
    ExecutionStart,
    ExecutionVetoed,
    ExecutionEnd,
    ExecutionSuccess,
    ExecutionSuccessWithNoEffectedRows,
    ExecutionFail,
    ExecutionFailXTimesInRow,
    ExecutionFailXTimesInHour,
    ExecutionEndWithEffectedRowsGreaterThanX,
    ExecutionEndWithEffectedRowsLessThanX,
    JobPaused,
    JobResumed,
    CircuitBreakerOpened,
    CircuitBreakerReset,
    ClusterNodeJoined,
    ClusterNodeRemoved,
}

impl MonitorEvent {
    pub const ALL: [MonitorEvent; 16] = [
        MonitorEvent::ExecutionStart,
        MonitorEvent::ExecutionVetoed,
        MonitorEvent::ExecutionEnd,
        MonitorEvent::ExecutionSuccess,
        MonitorEvent::ExecutionSuccessWithNoEffectedRows,
        MonitorEvent::ExecutionFail,
        MonitorEvent::ExecutionFailXTimesInRow,
        MonitorEvent::ExecutionFailXTimesInHour,
        MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX,
        MonitorEvent::ExecutionEndWithEffectedRowsLessThanX,
        MonitorEvent::JobPaused,
        MonitorEvent::JobResumed,
        MonitorEvent::CircuitBreakerOpened,
        MonitorEvent::CircuitBreakerReset,
        MonitorEvent::ClusterNodeJoined,
        MonitorEvent::ClusterNodeRemoved,
    ];

    /// Events whose action needs a numeric `event_argument`.
    pub fn requires_argument(self) -> bool {
        matches!(
            self,
            MonitorEvent::ExecutionFailXTimesInRow
                | MonitorEvent::ExecutionFailXTimesInHour
                | MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX
                | MonitorEvent::ExecutionEndWithEffectedRowsLessThanX
        )
    }

    /// Events raised outside a job execution.
    pub fn is_system(self) -> bool {
        matches!(
            self,
            MonitorEvent::ClusterNodeJoined | MonitorEvent::ClusterNodeRemoved
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MonitorEvent::ExecutionStart => "ExecutionStart",
            MonitorEvent::ExecutionVetoed => "ExecutionVetoed",
            MonitorEvent::ExecutionEnd => "ExecutionEnd",
            MonitorEvent::ExecutionSuccess => "ExecutionSuccess",
            MonitorEvent::ExecutionSuccessWithNoEffectedRows => {
                "ExecutionSuccessWithNoEffectedRows"
            }
            MonitorEvent::ExecutionFail => "ExecutionFail",
            MonitorEvent::ExecutionFailXTimesInRow => "ExecutionFailXTimesInRow",
            MonitorEvent::ExecutionFailXTimesInHour => "ExecutionFailXTimesInHour",
            MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX => {
                "ExecutionEndWithEffectedRowsGreaterThanX"
            }
            MonitorEvent::ExecutionEndWithEffectedRowsLessThanX => {
                "ExecutionEndWithEffectedRowsLessThanX"
            }
            MonitorEvent::JobPaused => "JobPaused",
            MonitorEvent::JobResumed => "JobResumed",
            MonitorEvent::CircuitBreakerOpened => "CircuitBreakerOpened",
            MonitorEvent::CircuitBreakerReset => "CircuitBreakerReset",
            MonitorEvent::ClusterNodeJoined => "ClusterNodeJoined",
            MonitorEvent::ClusterNodeRemoved => "ClusterNodeRemoved",
        }
    }
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MonitorEvent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        MonitorEvent::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("unknown monitor event: {s}"))
    }
}

/// A monitor rule. `None` job group/name match every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAction {
    /// 0 until persisted.
    #[serde(default)]
    pub id: i64,
    pub title: String,
    pub event: MonitorEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Name of the hook in the hook registry.
    pub hook: String,
    /// Distribution group the hook notifies.
    pub group_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_argument: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl MonitorAction {
    pub fn new(
        title: impl Into<String>,
        event: MonitorEvent,
        hook: impl Into<String>,
        group_id: i64,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            event,
            job_group: None,
            job_name: None,
            hook: hook.into(),
            group_id,
            event_argument: None,
            active: true,
        }
    }

    pub fn for_job(mut self, group: Option<&str>, name: Option<&str>) -> Self {
        self.job_group = group.map(String::from);
        self.job_name = name.map(String::from);
        self
    }

    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        self.event_argument = Some(arg.into());
        self
    }

    /// Same event and, when scoped, same job group and name. Events raised
    /// outside a job only match unscoped actions.
    pub fn matches(&self, event: MonitorEvent, job: Option<&JobKey>) -> bool {
        if self.event != event {
            return false;
        }
        match job {
            Some(job) => {
                self.job_group.as_deref().map_or(true, |g| g == job.group)
                    && self.job_name.as_deref().map_or(true, |n| n == job.name)
            }
            None => self.job_group.is_none() && self.job_name.is_none(),
        }
    }

    /// `event_argument` as an integer threshold, if it parses.
    pub fn argument_as_i64(&self) -> Option<i64> {
        self.event_argument.as_deref()?.trim().parse().ok()
    }
}

/// Record of one hook dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAlert {
    pub id: i64,
    pub monitor_id: i64,
    pub monitor_title: String,
    pub event: MonitorEvent,
    pub job_group: Option<String>,
    pub job_name: Option<String>,
    pub fire_instance_id: Option<String>,
    pub hook: String,
    pub group_id: i64,
    pub has_error: bool,
    pub error_message: Option<String>,
    pub alert_date: DateTime<Utc>,
}
