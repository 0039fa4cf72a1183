use chrono::{DateTime, Utc};
use cronwell_core::history::NewHistoryEntry;
use cronwell_core::job::{JobDefinition, TriggerDetails};
use cronwell_core::types::{visible_data, DataMap, FireInstanceId};
use cronwell_execution::JobContext;
use cronwell_monitor::ExecutionSnapshot;

/// One trigger firing of one job.
#[derive(Debug, Clone)]
pub struct Fire {
    pub id: FireInstanceId,
    pub job: JobDefinition,
    pub trigger: TriggerDetails,
    pub fire_time: DateTime<Utc>,
    /// Job data overlaid with trigger data, reserved keys removed.
    pub data: DataMap,
}

impl Fire {
    pub fn new(
        id: FireInstanceId,
        job: JobDefinition,
        trigger: TriggerDetails,
        fire_time: DateTime<Utc>,
    ) -> Self {
        let mut data = visible_data(&job.data);
        data.extend(visible_data(&trigger.data));
        Self {
            id,
            job,
            trigger,
            fire_time,
            data,
        }
    }

    pub fn is_retry(&self) -> bool {
        self.trigger.key.is_retry()
    }

    pub fn context(&self) -> JobContext {
        JobContext {
            fire_instance_id: self.id.to_string(),
            job_key: self.job.key.clone(),
            trigger_key: self.trigger.key.clone(),
            data: self.data.clone(),
            kind: self.job.kind.clone(),
        }
    }

    /// The `Running` history row, clipped to column widths.
    pub fn history_entry(&self, server: &str) -> NewHistoryEntry {
        let data = if self.data.is_empty() {
            None
        } else {
            serde_json::to_string(&self.data).ok()
        };
        NewHistoryEntry {
            instance_id: self.id.to_string(),
            job_id: self.job.id.clone(),
            job_name: self.job.key.name.clone(),
            job_group: self.job.key.group.clone(),
            trigger_id: self.trigger.id.clone(),
            trigger_name: self.trigger.key.name.clone(),
            trigger_group: self.trigger.key.group.clone(),
            server_name: server.to_string(),
            data,
            start_date: self.fire_time,
            retry: self.is_retry(),
        }
        .clipped()
    }

    pub fn snapshot(&self, server: &str) -> ExecutionSnapshot {
        ExecutionSnapshot::for_job(self.job.key.clone(), server).with_fire(
            self.id.to_string(),
            self.job.id.clone(),
            self.trigger.key.clone(),
        )
    }
}
