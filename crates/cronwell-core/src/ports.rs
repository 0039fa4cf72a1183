//! Ports the core components depend on. `cronwell-store` and
//! `cronwell-scheduler` provide the SQLite implementations; tests swap in
//! in-memory databases.

use chrono::{DateTime, Utc};

use crate::cluster::{ClusterNode, NodeKey};
use crate::error::Result;
use crate::history::{ExecutionStatus, HistoryCompletion, HistoryLogEntry, HistoryProgress, NewHistoryEntry};
use crate::job::{JobDefinition, NewTrigger, TriggerDetails, TriggerState};
use crate::monitor::{MonitorAction, MonitorAlert, MonitorEvent};
use crate::types::{DataMap, JobKey, TriggerKey};

/// Node registry persistence.
pub trait ClusterStore: Send + Sync {
    fn get_cluster_nodes(&self) -> Result<Vec<ClusterNode>>;
    fn get_cluster_node(&self, key: &NodeKey) -> Result<Option<ClusterNode>>;
    /// Fails with a database error when `(server, port)` already exists.
    fn add_cluster_node(&self, node: &ClusterNode) -> Result<()>;
    /// Persists instance id, cluster port, join and heartbeat dates of an existing row.
    fn update_cluster_node(&self, node: &ClusterNode) -> Result<()>;
    fn remove_cluster_node(&self, key: &NodeKey) -> Result<()>;
}

/// Execution history persistence.
pub trait HistoryStore: Send + Sync {
    fn create_job_instance_log(&self, entry: &NewHistoryEntry) -> Result<i64>;
    /// Applies the terminal update. Rejects with `HistoryAlreadyFinalized`
    /// unless the row is still `Running`.
    fn update_history_job_run_log(&self, completion: &HistoryCompletion) -> Result<()>;
    /// Terminal status without run data (veto). Same guard as above.
    fn set_job_instance_log_status(&self, instance_id: &str, status: ExecutionStatus) -> Result<()>;
    /// Mid-run flush; only touches `Running` rows. Returns whether a row changed.
    fn persist_job_instance_data(&self, progress: &HistoryProgress) -> Result<bool>;
    fn get_history_by_instance_id(&self, instance_id: &str) -> Result<Option<HistoryLogEntry>>;
    /// Consecutive `Fail` rows among the job's most recent finished runs, up to `limit`.
    fn count_fails_in_row(&self, job: &JobKey, limit: u32) -> Result<u32>;
    fn count_fails_since(&self, job: &JobKey, since: DateTime<Utc>) -> Result<u32>;
    fn clear_history_older_than(&self, before: DateTime<Utc>) -> Result<usize>;
    fn clear_job_history_older_than(&self, job: &JobKey, before: DateTime<Utc>) -> Result<usize>;
}

/// Monitor actions and alerts persistence.
pub trait MonitorStore: Send + Sync {
    fn get_monitor_actions(&self) -> Result<Vec<MonitorAction>>;
    /// Active actions subscribed to `event`, any job scope.
    fn get_monitor_actions_for_event(&self, event: MonitorEvent) -> Result<Vec<MonitorAction>>;
    fn get_monitor_action(&self, id: i64) -> Result<Option<MonitorAction>>;
    fn add_monitor_action(&self, action: &MonitorAction) -> Result<i64>;
    fn update_monitor_action(&self, action: &MonitorAction) -> Result<()>;
    fn delete_monitor_action(&self, id: i64) -> Result<()>;
    /// Same event, job scope and hook already registered.
    fn is_monitor_exists(&self, action: &MonitorAction) -> Result<bool>;
    fn add_monitor_alert(&self, alert: &MonitorAlert) -> Result<i64>;
    fn clear_alerts_older_than(&self, before: DateTime<Utc>) -> Result<usize>;
}

/// The trigger clock: job/trigger persistence and pause/resume state.
pub trait TriggerClock: Send + Sync {
    /// Inserts or replaces the definition.
    fn add_job(&self, job: &JobDefinition) -> Result<()>;
    fn get_job(&self, key: &JobKey) -> Result<Option<JobDefinition>>;
    fn list_jobs(&self) -> Result<Vec<JobDefinition>>;
    /// Removes the job and all its triggers.
    fn remove_job(&self, key: &JobKey) -> Result<()>;

    fn schedule_trigger(&self, trigger: &NewTrigger) -> Result<TriggerDetails>;
    fn unschedule_trigger(&self, key: &TriggerKey) -> Result<()>;
    fn get_trigger(&self, key: &TriggerKey) -> Result<Option<TriggerDetails>>;
    fn triggers_of_job(&self, job: &JobKey) -> Result<Vec<TriggerDetails>>;
    fn trigger_state(&self, key: &TriggerKey) -> Result<TriggerState>;
    fn pause_trigger(&self, key: &TriggerKey) -> Result<()>;
    fn resume_trigger(&self, key: &TriggerKey) -> Result<()>;

    fn job_data(&self, job: &JobKey) -> Result<DataMap>;
    /// `None` removes the key.
    fn put_job_data(&self, job: &JobKey, key: &str, value: Option<&str>) -> Result<()>;
    fn put_trigger_data(&self, trigger: &TriggerKey, key: &str, value: Option<&str>) -> Result<()>;
}
