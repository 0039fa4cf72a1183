use std::time::Instant;

use chrono::{DateTime, Utc};
use cronwell_core::types::{DataMap, JobKey, TriggerKey};
use cronwell_execution::LifecycleSink;
use cronwell_protocol::messages::{PersistenceRunningJobInfo, RunningData, RunningJobDetails};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One fire executing on this node.
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub fire_instance_id: String,
    pub job_key: JobKey,
    pub job_id: String,
    pub trigger_key: TriggerKey,
    pub trigger_id: String,
    pub data: DataMap,
    pub fire_time: DateTime<Utc>,
    pub started: Instant,
    pub sink: LifecycleSink,
    pub cancel: CancellationToken,
}

impl RunningJob {
    fn run_time_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    fn details(&self, server: &str, instance_id: &str) -> RunningJobDetails {
        let metadata = self.sink.snapshot();
        RunningJobDetails {
            fire_instance_id: self.fire_instance_id.clone(),
            job_key: self.job_key.clone(),
            job_id: self.job_id.clone(),
            trigger_key: self.trigger_key.clone(),
            trigger_id: self.trigger_id.clone(),
            data: self.data.clone(),
            fire_time: self.fire_time,
            run_time_ms: self.run_time_ms(),
            progress: metadata.progress(),
            effected_rows: metadata.effected_rows(),
            exceptions_count: metadata.exceptions_count(),
            server: server.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

/// Fires currently executing on this node, keyed by fire instance id.
pub struct RunningJobs {
    jobs: DashMap<String, RunningJob>,
    /// Non-concurrent jobs and the fire that holds them.
    claims: DashMap<JobKey, String>,
    server: String,
    instance_id: String,
}

impl RunningJobs {
    pub fn new(server: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            jobs: DashMap::new(),
            claims: DashMap::new(),
            server: server.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn insert(&self, job: RunningJob) {
        self.jobs.insert(job.fire_instance_id.clone(), job);
    }

    pub fn remove(&self, fire_instance_id: &str) -> Option<RunningJob> {
        self.jobs.remove(fire_instance_id).map(|(_, job)| job)
    }

    /// Reserve `job` for one fire. False when another fire holds it.
    pub fn claim(&self, job: &JobKey, fire_instance_id: &str) -> bool {
        match self.claims.entry(job.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(fire_instance_id.to_string());
                true
            }
        }
    }

    pub fn release(&self, job: &JobKey, fire_instance_id: &str) {
        self.claims.remove_if(job, |_, holder| holder == fire_instance_id);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_job_running(&self, job: &JobKey) -> bool {
        self.claims.contains_key(job) || self.jobs.iter().any(|e| &e.job_key == job)
    }

    pub fn get(&self, fire_instance_id: &str) -> Option<RunningJobDetails> {
        self.jobs
            .get(fire_instance_id)
            .map(|e| e.details(&self.server, &self.instance_id))
    }

    pub fn list(&self) -> Vec<RunningJobDetails> {
        let mut jobs: Vec<RunningJobDetails> = self
            .jobs
            .iter()
            .map(|e| e.details(&self.server, &self.instance_id))
            .collect();
        jobs.sort_by(|a, b| a.fire_time.cmp(&b.fire_time));
        jobs
    }

    pub fn running_data(&self, fire_instance_id: &str) -> Option<RunningData> {
        self.jobs.get(fire_instance_id).map(|e| e.sink.running_data())
    }

    pub fn persistence_info(&self) -> Vec<PersistenceRunningJobInfo> {
        self.jobs
            .iter()
            .map(|e| {
                let data = e.sink.running_data();
                PersistenceRunningJobInfo {
                    fire_instance_id: e.fire_instance_id.clone(),
                    group: e.job_key.group.clone(),
                    name: e.job_key.name.clone(),
                    log: data.log,
                    exceptions: data.exceptions,
                    duration_ms: e.run_time_ms(),
                }
            })
            .collect()
    }

    /// Signal the fire to stop. The run itself records the `Stopped` outcome
    /// once it actually exits.
    pub fn stop(&self, fire_instance_id: &str) -> bool {
        match self.jobs.get(fire_instance_id) {
            Some(e) => {
                info!(job = %e.job_key, fire_instance_id, "stop requested");
                e.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything (shutdown).
    pub fn stop_all(&self) -> usize {
        let mut count = 0;
        for e in self.jobs.iter() {
            if !e.cancel.is_cancelled() {
                e.cancel.cancel();
                count += 1;
            }
        }
        if count > 0 {
            warn!(count, "stopping running jobs");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(id: &str, job: &JobKey) -> RunningJob {
        RunningJob {
            fire_instance_id: id.into(),
            job_key: job.clone(),
            job_id: "j1".into(),
            trigger_key: TriggerKey::new("Etl", "nightly"),
            trigger_id: "t1".into(),
            data: DataMap::new(),
            fire_time: Utc::now(),
            started: Instant::now(),
            sink: LifecycleSink::detached(id, 25),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn answers_running_queries() {
        let jobs = RunningJobs::new("node1", "inst-1");
        let key = JobKey::new("Etl", "Load");
        let job = running("fire-1", &key);
        job.sink.append_log("loading");
        job.sink.set_effected_rows(3);
        jobs.insert(job);

        assert!(jobs.is_job_running(&key));
        assert!(!jobs.is_job_running(&JobKey::new("Etl", "Other")));

        let details = jobs.get("fire-1").unwrap();
        assert_eq!(details.server, "node1");
        assert_eq!(details.effected_rows, Some(3));
        assert_eq!(jobs.running_data("fire-1").unwrap().log, "loading\n");
        assert_eq!(jobs.persistence_info()[0].name, "Load");
        assert!(jobs.get("fire-2").is_none());
    }

    #[test]
    fn stop_cancels_the_token() {
        let jobs = RunningJobs::new("node1", "inst-1");
        let job = running("fire-1", &JobKey::new("Etl", "Load"));
        let token = job.cancel.clone();
        jobs.insert(job);

        assert!(jobs.stop("fire-1"));
        assert!(token.is_cancelled());
        assert!(!jobs.stop("fire-2"));
        assert_eq!(jobs.stop_all(), 0);
        assert!(jobs.remove("fire-1").is_some());
        assert!(jobs.is_empty());
    }

    #[test]
    fn claim_is_exclusive_per_job() {
        let jobs = RunningJobs::new("node1", "inst-1");
        let key = JobKey::new("Etl", "Load");

        assert!(jobs.claim(&key, "fire-1"));
        assert!(!jobs.claim(&key, "fire-2"));
        assert!(jobs.is_job_running(&key));

        jobs.release(&key, "fire-2");
        assert!(!jobs.claim(&key, "fire-3"));
        jobs.release(&key, "fire-1");
        assert!(!jobs.is_job_running(&key));
        assert!(jobs.claim(&key, "fire-3"));
    }
}
