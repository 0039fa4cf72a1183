use chrono::{DateTime, Utc};
use cronwell_core::types::{DataMap, JobKey, TriggerKey};
use serde::{Deserialize, Serialize};

/// Reply to a health check: who answered and whether its clock is ticking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckReply {
    pub instance_id: String,
    pub server: String,
    pub port: u16,
    pub scheduler_running: bool,
}

/// Empty acknowledgement for commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobKeyRequest {
    pub group: String,
    pub name: String,
}

impl From<&JobKey> for JobKeyRequest {
    fn from(key: &JobKey) -> Self {
        Self {
            group: key.group.clone(),
            name: key.name.clone(),
        }
    }
}

impl From<JobKeyRequest> for JobKey {
    fn from(req: JobKeyRequest) -> Self {
        JobKey::new(req.group, req.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireInstanceRequest {
    pub fire_instance_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsRunningReply {
    pub running: bool,
}

/// Snapshot of a fire that is executing right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJobDetails {
    pub fire_instance_id: String,
    pub job_key: JobKey,
    pub job_id: String,
    pub trigger_key: TriggerKey,
    pub trigger_id: String,
    /// Merged job and trigger data, reserved keys excluded.
    #[serde(default)]
    pub data: DataMap,
    pub fire_time: DateTime<Utc>,
    pub run_time_ms: i64,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effected_rows: Option<i64>,
    pub exceptions_count: usize,
    /// Node that runs the fire.
    pub server: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningJobReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<RunningJobDetails>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningJobsReply {
    #[serde(default)]
    pub jobs: Vec<RunningJobDetails>,
}

/// Log and exceptions text collected so far for a running fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningData {
    pub log: String,
    pub exceptions: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningDataReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RunningData>,
}

/// What the persist-data job flushes into a `Running` history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRunningJobInfo {
    pub fire_instance_id: String,
    pub group: String,
    pub name: String,
    pub log: String,
    pub exceptions: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceRunningJobsReply {
    #[serde(default)]
    pub jobs: Vec<PersistenceRunningJobInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopRunningJobReply {
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFolderRequest {
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFileRequest {
    pub folder: String,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExistsReply {
    pub exists: bool,
}

/// Error body returned by cluster routes on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
