use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::clip;

/// Column widths of the history table; longer values are clipped on insert.
pub const MAX_DATA_LEN: usize = 4000;
pub const MAX_ID_LEN: usize = 20;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_INSTANCE_ID_LEN: usize = 250;

/// Trigger id recorded for fires that came from a manual invoke.
pub const MANUAL_TRIGGER_ID: &str = "Manual";

/// Status of a history row. `Running` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Fail,
    Veto,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Fail => "fail",
            ExecutionStatus::Veto => "veto",
            ExecutionStatus::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "fail" => Ok(ExecutionStatus::Fail),
            "veto" => Ok(ExecutionStatus::Veto),
            "stopped" => Ok(ExecutionStatus::Stopped),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryLogEntry {
    pub id: i64,
    pub instance_id: String,
    pub job_id: String,
    pub job_name: String,
    pub job_group: String,
    pub trigger_id: String,
    pub trigger_name: String,
    pub trigger_group: String,
    pub server_name: String,
    pub data: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: ExecutionStatus,
    pub effected_rows: Option<i64>,
    pub log: Option<String>,
    pub exception: Option<String>,
    pub retry: bool,
    pub is_stopped: bool,
}

/// Row created when a fire is about to execute (status `Running`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub instance_id: String,
    pub job_id: String,
    pub job_name: String,
    pub job_group: String,
    pub trigger_id: String,
    pub trigger_name: String,
    pub trigger_group: String,
    pub server_name: String,
    pub data: Option<String>,
    pub start_date: DateTime<Utc>,
    pub retry: bool,
}

impl NewHistoryEntry {
    /// Clip every field to its column width.
    pub fn clipped(mut self) -> Self {
        self.data = self.data.map(|d| clip(&d, MAX_DATA_LEN));
        self.job_id = clip(&self.job_id, MAX_ID_LEN);
        self.job_name = clip(&self.job_name, MAX_NAME_LEN);
        self.job_group = clip(&self.job_group, MAX_NAME_LEN);
        self.trigger_id = clip(&self.trigger_id, MAX_ID_LEN);
        self.trigger_name = clip(&self.trigger_name, MAX_NAME_LEN);
        self.trigger_group = clip(&self.trigger_group, MAX_NAME_LEN);
        self.instance_id = clip(&self.instance_id, MAX_INSTANCE_ID_LEN);
        self.server_name = clip(&self.server_name, MAX_NAME_LEN);
        self
    }
}

/// The single terminal update of a history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryCompletion {
    pub instance_id: String,
    pub status: ExecutionStatus,
    pub end_date: DateTime<Utc>,
    pub duration_ms: i64,
    pub effected_rows: Option<i64>,
    pub log: Option<String>,
    pub exception: Option<String>,
    pub is_stopped: bool,
}

/// Mid-run snapshot flushed into a `Running` row by the persist-data job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryProgress {
    pub instance_id: String,
    pub log: String,
    pub exception: String,
    pub duration_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clipped_applies_column_widths() {
        let entry = NewHistoryEntry {
            instance_id: "i".repeat(300),
            job_id: "j".repeat(30),
            job_name: "n".repeat(60),
            job_group: "g".repeat(60),
            trigger_id: "t".repeat(30),
            trigger_name: "tn".into(),
            trigger_group: "tg".into(),
            server_name: "s".repeat(60),
            data: Some("d".repeat(5000)),
            start_date: Utc::now(),
            retry: false,
        }
        .clipped();

        assert_eq!(entry.instance_id.len(), MAX_INSTANCE_ID_LEN);
        assert_eq!(entry.job_id.len(), MAX_ID_LEN);
        assert_eq!(entry.job_name.len(), MAX_NAME_LEN);
        assert_eq!(entry.job_group.len(), MAX_NAME_LEN);
        assert_eq!(entry.trigger_id.len(), MAX_ID_LEN);
        assert_eq!(entry.trigger_name, "tn");
        assert_eq!(entry.server_name.len(), MAX_NAME_LEN);
        assert_eq!(entry.data.map(|d| d.len()), Some(MAX_DATA_LEN));
    }

    #[test]
    fn only_running_is_non_terminal() {
        assert!(!ExecutionStatus::Running.is_terminal());
        for s in [
            ExecutionStatus::Success,
            ExecutionStatus::Fail,
            ExecutionStatus::Veto,
            ExecutionStatus::Stopped,
        ] {
            assert!(s.is_terminal());
            assert_eq!(s.to_string().parse::<ExecutionStatus>().unwrap(), s);
        }
    }
}
