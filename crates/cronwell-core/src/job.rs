//! Job and trigger model shared by the trigger clock, the facade and the
//! cluster RPC payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{DataMap, JobKey, TriggerKey, RETRY_COUNTER_KEY};

/// Defines when and how often a trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Fire repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Fire every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },

    /// Fire on a specific weekday (0 = Monday … 6 = Sunday) at the given time (UTC).
    Weekly { day: u8, hour: u8, minute: u8 },

    /// Cron expression. Stored and listed, but never fires: cron parsing is
    /// outside this engine.
    Cron { expression: String },
}

/// Trigger state as the clock reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    /// Waiting for its next fire time.
    Normal,
    /// Paused by an operator or a tripped circuit breaker.
    Paused,
    /// Will never fire again (one-shot trigger already fired).
    Complete,
    /// Could not compute a fire time (e.g. unsupported cron).
    Error,
}

impl TriggerState {
    /// Triggers a circuit breaker is allowed to pause.
    pub fn is_active(self) -> bool {
        matches!(self, TriggerState::Normal)
    }
}

impl std::fmt::Display for TriggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerState::Normal => "normal",
            TriggerState::Paused => "paused",
            TriggerState::Complete => "complete",
            TriggerState::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "normal" => Ok(TriggerState::Normal),
            "paused" => Ok(TriggerState::Paused),
            "complete" => Ok(TriggerState::Complete),
            "error" => Ok(TriggerState::Error),
            other => Err(format!("unknown trigger state: {other}")),
        }
    }
}

/// HTTP method of a REST job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RestMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// What a job actually runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// External process. Its stdout may carry lifecycle events.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
    },

    /// Single HTTP call; a non-2xx response fails the run.
    Rest {
        #[serde(default)]
        method: RestMethod,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_token: Option<String>,
        #[serde(default)]
        log_response: bool,
    },

    /// Handler registered in the host process under `handler`.
    InProcess { handler: String },
}

/// A persisted job definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub key: JobKey,
    /// Short id recorded in history rows.
    pub id: String,
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When false, a fire is vetoed while another fire of the job runs anywhere in the cluster.
    #[serde(default = "default_true")]
    pub concurrent: bool,
    /// Overrides the global history retention for this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_retention_days: Option<u32>,
    #[serde(default)]
    pub data: DataMap,
}

fn default_true() -> bool {
    true
}

impl JobDefinition {
    pub fn new(key: JobKey, kind: JobKind) -> Self {
        Self {
            key,
            id: crate::types::generate_id(),
            kind,
            description: None,
            concurrent: true,
            log_retention_days: None,
            data: DataMap::new(),
        }
    }

    pub fn non_concurrent(mut self) -> Self {
        self.concurrent = false;
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Request to schedule a trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    /// Wall-clock limit for one run. Default applies when unset or under 1 s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Delay before a failed fire is retried. No retries when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_span_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub data: DataMap,
}

impl NewTrigger {
    pub fn new(key: TriggerKey, job_key: JobKey, schedule: Schedule) -> Self {
        Self {
            key,
            job_key,
            schedule,
            timeout_secs: None,
            retry_span_secs: None,
            max_retries: None,
            data: DataMap::new(),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_retry(mut self, span_secs: u64, max_retries: u32) -> Self {
        self.retry_span_secs = Some(span_secs);
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A trigger as stored by the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDetails {
    pub key: TriggerKey,
    /// Short id recorded in history rows.
    pub id: String,
    pub job_key: JobKey,
    pub schedule: Schedule,
    pub state: TriggerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_span_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub data: DataMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_fire: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_fire: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TriggerDetails {
    /// How many retries this fire already represents (0 for ordinary triggers).
    pub fn retry_counter(&self) -> u32 {
        self.data
            .get(RETRY_COUNTER_KEY)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RETRY_TRIGGER_GROUP;

    #[test]
    fn job_kind_uses_kind_tag() {
        let kind = JobKind::Rest {
            method: RestMethod::Post,
            url: "http://localhost/ping".into(),
            body: None,
            headers: BTreeMap::new(),
            bearer_token: None,
            log_response: false,
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "rest");
        assert_eq!(json["method"], "POST");
        assert!(json.get("body").is_none());
    }

    #[test]
    fn schedule_deserializes_from_tagged_json() {
        let s: Schedule = serde_json::from_str(r#"{"kind":"interval","every_secs":30}"#).unwrap();
        assert_eq!(s, Schedule::Interval { every_secs: 30 });
    }

    #[test]
    fn only_normal_triggers_are_active() {
        assert!(TriggerState::Normal.is_active());
        assert!(!TriggerState::Paused.is_active());
        assert!(!TriggerState::Complete.is_active());
        assert_eq!("paused".parse::<TriggerState>().unwrap(), TriggerState::Paused);
    }

    #[test]
    fn retry_counter_reads_reserved_key() {
        let trigger = TriggerDetails {
            key: TriggerKey::new(RETRY_TRIGGER_GROUP, "x"),
            id: "t1".into(),
            job_key: JobKey::new("g", "j"),
            schedule: Schedule::Once { at: Utc::now() },
            state: TriggerState::Normal,
            timeout_secs: None,
            retry_span_secs: None,
            max_retries: None,
            data: [(RETRY_COUNTER_KEY.to_string(), "2".to_string())].into(),
            next_fire: None,
            previous_fire: None,
            created_at: Utc::now(),
        };
        assert_eq!(trigger.retry_counter(), 2);
    }
}
