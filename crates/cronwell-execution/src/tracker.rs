use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cronwell_protocol::lifecycle::{ExceptionInfo, LifecycleEvent};
use cronwell_protocol::messages::RunningData;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::metadata::JobExecutionMetadata;

/// Handle through which job code reports on its own run.
///
/// Cloning is cheap; every clone writes to the same metadata. Each update
/// takes the metadata lock, so concurrent writers from one job are safe.
#[derive(Debug, Clone)]
pub struct LifecycleSink {
    fire_instance_id: Arc<str>,
    max_aggregate_exceptions: usize,
    inner: Arc<Mutex<JobExecutionMetadata>>,
}

impl LifecycleSink {
    fn new(fire_instance_id: &str, max_aggregate_exceptions: usize) -> Self {
        Self {
            fire_instance_id: Arc::from(fire_instance_id),
            max_aggregate_exceptions,
            inner: Arc::new(Mutex::new(JobExecutionMetadata::default())),
        }
    }

    /// A sink not registered with any tracker.
    pub fn detached(fire_instance_id: &str, max_aggregate_exceptions: usize) -> Self {
        Self::new(fire_instance_id, max_aggregate_exceptions)
    }

    fn lock(&self) -> MutexGuard<'_, JobExecutionMetadata> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fire_instance_id(&self) -> &str {
        &self.fire_instance_id
    }

    pub fn append_log(&self, line: impl Into<String>) {
        self.lock().append_log(line);
    }

    /// `max_items` defaults to the configured limit.
    pub fn add_aggregate_exception(&self, exception: ExceptionInfo, max_items: Option<usize>) {
        let max = max_items.unwrap_or(self.max_aggregate_exceptions);
        if !self.lock().add_aggregate_exception(exception, max) {
            debug!(fire_instance_id = %self.fire_instance_id, max, "aggregate exception dropped");
        }
    }

    pub fn set_effected_rows(&self, value: i64) {
        self.lock().set_effected_rows(value);
    }

    pub fn increase_effected_rows(&self, delta: i64) {
        self.lock().increase_effected_rows(delta);
    }

    pub fn update_progress(&self, progress: u8) {
        self.lock().update_progress(progress);
    }

    pub fn update_progress_of(&self, current: i64, total: i64) {
        self.lock().update_progress_of(current, total);
    }

    pub fn report_exception(&self, exception: ExceptionInfo) {
        if !self.lock().report_exception(exception) {
            debug!(fire_instance_id = %self.fire_instance_id, "exception already reported");
        }
    }

    pub fn set_ambient_exception(&self, exception: ExceptionInfo) {
        self.lock().set_ambient_exception(exception);
    }

    pub fn put_job_data(&self, key: impl Into<String>, value: Option<String>) {
        self.lock().put_job_data(key, value);
    }

    pub fn put_trigger_data(&self, key: impl Into<String>, value: Option<String>) {
        self.lock().put_trigger_data(key, value);
    }

    pub fn has_unhandled_exception(&self) -> bool {
        !self.lock().is_running_success()
    }

    /// Route one decoded callback to the matching operation.
    pub fn apply(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::AppendLog { message } => self.append_log(message),
            LifecycleEvent::AddAggregateException {
                exception,
                max_items,
            } => self.add_aggregate_exception(exception, max_items),
            LifecycleEvent::SetEffectedRows { value } => self.set_effected_rows(value),
            LifecycleEvent::IncreaseEffectedRows { delta } => self.increase_effected_rows(delta),
            LifecycleEvent::UpdateProgress { progress } => self.update_progress(progress),
            LifecycleEvent::UpdateProgressOf { current, total } => {
                self.update_progress_of(current, total)
            }
            LifecycleEvent::ReportException { exception } => self.report_exception(exception),
            LifecycleEvent::PutJobData { key, value } => self.put_job_data(key, value),
            LifecycleEvent::PutTriggerData { key, value } => self.put_trigger_data(key, value),
        }
    }

    /// Force progress to 100 and return the final state.
    pub fn finalize(&self) -> JobExecutionMetadata {
        let mut guard = self.lock();
        guard.finalize();
        guard.clone()
    }

    /// Copy of the current state, for running-job queries.
    pub fn snapshot(&self) -> JobExecutionMetadata {
        self.lock().clone()
    }

    pub fn running_data(&self) -> RunningData {
        let guard = self.lock();
        RunningData {
            log: guard.log_text(),
            exceptions: guard.exceptions_text(),
        }
    }
}

/// Per-process registry of live execution metadata keyed by fire instance id.
pub struct ExecutionTracker {
    sinks: DashMap<String, LifecycleSink>,
    max_aggregate_exceptions: usize,
}

impl ExecutionTracker {
    pub fn new(max_aggregate_exceptions: usize) -> Self {
        Self {
            sinks: DashMap::new(),
            max_aggregate_exceptions,
        }
    }

    /// The sink for `fire_instance_id`, created on first use. Racing callers
    /// all receive the same instance.
    pub fn get_or_create(&self, fire_instance_id: &str) -> LifecycleSink {
        self.sinks
            .entry(fire_instance_id.to_string())
            .or_insert_with(|| LifecycleSink::new(fire_instance_id, self.max_aggregate_exceptions))
            .clone()
    }

    pub fn get(&self, fire_instance_id: &str) -> Option<LifecycleSink> {
        self.sinks.get(fire_instance_id).map(|s| s.clone())
    }

    /// Remove and return the sink once its run is persisted.
    pub fn take(&self, fire_instance_id: &str) -> Option<LifecycleSink> {
        let removed = self.sinks.remove(fire_instance_id).map(|(_, sink)| sink);
        if removed.is_none() {
            warn!(fire_instance_id, "no execution metadata to take");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn racing_initialisers_share_one_instance() {
        let tracker = Arc::new(ExecutionTracker::new(25));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    let sink = tracker.get_or_create("fire-1");
                    sink.increase_effected_rows(1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.len(), 1);
        let sink = tracker.get("fire-1").unwrap();
        assert_eq!(sink.snapshot().effected_rows(), Some(8));
    }

    #[test]
    fn apply_routes_events() {
        let sink = LifecycleSink::detached("f", 25);
        sink.apply(LifecycleEvent::AppendLog {
            message: "started".into(),
        });
        sink.apply(LifecycleEvent::IncreaseEffectedRows { delta: 3 });
        sink.apply(LifecycleEvent::UpdateProgressOf {
            current: 1,
            total: 2,
        });
        sink.apply(LifecycleEvent::PutJobData {
            key: "LastId".into(),
            value: Some("42".into()),
        });
        let m = sink.snapshot();
        assert_eq!(m.log_text(), "started\n");
        assert_eq!(m.effected_rows(), Some(3));
        assert_eq!(m.progress(), 50);
        assert_eq!(m.job_data_updates(), &[("LastId".to_string(), Some("42".to_string()))]);
    }

    #[test]
    fn configured_limit_applies_when_event_has_none() {
        let sink = LifecycleSink::detached("f", 1);
        for msg in ["a", "b"] {
            sink.apply(LifecycleEvent::AddAggregateException {
                exception: ExceptionInfo::new(msg),
                max_items: None,
            });
        }
        assert_eq!(sink.snapshot().exceptions_count(), 1);
    }

    #[test]
    fn finalize_forces_full_progress() {
        let sink = LifecycleSink::detached("f", 25);
        sink.update_progress(10);
        assert_eq!(sink.finalize().progress(), 100);
    }

    #[test]
    fn take_removes_entry() {
        let tracker = ExecutionTracker::new(25);
        tracker.get_or_create("a").append_log("x");
        let taken = tracker.take("a").unwrap();
        assert_eq!(taken.running_data().log, "x\n");
        assert!(tracker.is_empty());
        assert!(tracker.take("a").is_none());
    }
}
