use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cronwell_core::history::{ExecutionStatus, HistoryCompletion, NewHistoryEntry};
use cronwell_core::monitor::{MonitorAction, MonitorEvent};
use cronwell_core::types::{JobKey, TriggerKey};
use cronwell_monitor::{
    ExecutionSnapshot, HookRegistry, MonitorEngine, MonitorError, MonitorHook, MonitorMessage,
};
use cronwell_store::{db, HistoryManager, MonitorManager};
use rusqlite::Connection;

#[derive(Default)]
struct Recording {
    name: &'static str,
    fail: bool,
    delay: Option<Duration>,
    seen: Mutex<Vec<MonitorMessage>>,
}

impl Recording {
    fn named(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            ..Self::default()
        })
    }

    fn seen(&self) -> Vec<MonitorMessage> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitorHook for Recording {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, message: &MonitorMessage) -> cronwell_monitor::Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen.lock().unwrap().push(message.clone());
        if self.fail {
            return Err(MonitorError::hook(self.name, "endpoint refused"));
        }
        Ok(())
    }
}

struct Harness {
    monitors: Arc<MonitorManager>,
    history: Arc<HistoryManager>,
    hooks: Arc<HookRegistry>,
}

impl Harness {
    fn new() -> Self {
        let monitor_conn = Connection::open_in_memory().unwrap();
        db::init_db(&monitor_conn).unwrap();
        let history_conn = Connection::open_in_memory().unwrap();
        db::init_db(&history_conn).unwrap();
        Self {
            monitors: Arc::new(MonitorManager::new(monitor_conn)),
            history: Arc::new(HistoryManager::new(history_conn)),
            hooks: Arc::new(HookRegistry::new()),
        }
    }

    fn engine(&self) -> MonitorEngine {
        MonitorEngine::new(self.monitors.clone(), self.history.clone(), self.hooks.clone())
    }

    fn add(&self, action: MonitorAction) -> i64 {
        self.monitors.add_monitor_action(&action).unwrap()
    }

    fn finished_run(&self, job: &JobKey, id: &str, status: ExecutionStatus) {
        let now = Utc::now();
        self.history
            .create_job_instance_log(&NewHistoryEntry {
                instance_id: id.into(),
                job_id: "j1".into(),
                job_name: job.name.clone(),
                job_group: job.group.clone(),
                trigger_id: "t1".into(),
                trigger_name: "nightly".into(),
                trigger_group: job.group.clone(),
                server_name: "node1".into(),
                data: None,
                start_date: now,
                retry: false,
            })
            .unwrap();
        self.history
            .update_history_job_run_log(&HistoryCompletion {
                instance_id: id.into(),
                status,
                end_date: now,
                duration_ms: 10,
                effected_rows: None,
                log: None,
                exception: None,
                is_stopped: false,
            })
            .unwrap();
    }
}

fn backup() -> JobKey {
    JobKey::new("Infra", "Backup")
}

fn ended(rows: Option<i64>) -> ExecutionSnapshot {
    ExecutionSnapshot::for_job(backup(), "node1")
        .with_fire("fire-1", "j1", TriggerKey::new("Infra", "nightly"))
        .with_result(ExecutionStatus::Success, rows, 1200, None)
}

#[tokio::test]
async fn rows_greater_than_fires_only_above_threshold() {
    let h = Harness::new();
    let hook = Recording::named("ops");
    h.hooks.register(hook.clone());
    h.add(
        MonitorAction::new("too many rows", MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX, "ops", 7)
            .with_argument("10"),
    );
    let engine = h.engine();
    let event = MonitorEvent::ExecutionEndWithEffectedRowsGreaterThanX;

    assert_eq!(engine.scan(event, &ended(Some(11))).await.len(), 1);
    assert!(engine.scan(event, &ended(Some(10))).await.is_empty());
    assert!(engine.scan(event, &ended(None)).await.is_empty());

    let seen = hook.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].group_id, 7);
    assert_eq!(seen[0].details.effected_rows, Some(11));
    assert_eq!(h.monitors.count_alerts().unwrap(), 1);
}

#[tokio::test]
async fn scoped_and_wildcard_actions_both_match() {
    let h = Harness::new();
    let hook = Recording::named("ops");
    h.hooks.register(hook.clone());
    h.add(MonitorAction::new("any job", MonitorEvent::ExecutionEnd, "ops", 1));
    h.add(MonitorAction::new("infra", MonitorEvent::ExecutionEnd, "ops", 2).for_job(Some("Infra"), None));
    h.add(
        MonitorAction::new("restore", MonitorEvent::ExecutionEnd, "ops", 3)
            .for_job(Some("Infra"), Some("Restore")),
    );

    let alerts = h.engine().scan(MonitorEvent::ExecutionEnd, &ended(Some(1))).await;

    let mut groups: Vec<i64> = alerts.iter().map(|a| a.group_id).collect();
    groups.sort();
    assert_eq!(groups, vec![1, 2]);
    assert!(alerts.iter().all(|a| a.job_name.as_deref() == Some("Backup")));
    assert!(alerts.iter().all(|a| a.id > 0));
}

#[tokio::test]
async fn inactive_action_is_ignored() {
    let h = Harness::new();
    let hook = Recording::named("ops");
    h.hooks.register(hook.clone());
    let mut action = MonitorAction::new("muted", MonitorEvent::ExecutionEnd, "ops", 1);
    action.active = false;
    h.add(action);

    assert!(h.engine().scan(MonitorEvent::ExecutionEnd, &ended(None)).await.is_empty());
    assert!(hook.seen().is_empty());
}

#[tokio::test]
async fn fail_streak_needs_enough_consecutive_failures() {
    let h = Harness::new();
    let hook = Recording::named("ops");
    h.hooks.register(hook.clone());
    h.add(MonitorAction::new("3 in row", MonitorEvent::ExecutionFailXTimesInRow, "ops", 1).with_argument("3"));
    let job = backup();
    let snapshot = ExecutionSnapshot::for_job(job.clone(), "node1")
        .with_result(ExecutionStatus::Fail, None, 5, Some("boom".into()));
    let engine = h.engine();
    let event = MonitorEvent::ExecutionFailXTimesInRow;

    h.finished_run(&job, "r1", ExecutionStatus::Fail);
    h.finished_run(&job, "r2", ExecutionStatus::Success);
    h.finished_run(&job, "r3", ExecutionStatus::Fail);
    h.finished_run(&job, "r4", ExecutionStatus::Fail);
    assert!(engine.scan(event, &snapshot).await.is_empty());

    h.finished_run(&job, "r5", ExecutionStatus::Fail);
    assert_eq!(engine.scan(event, &snapshot).await.len(), 1);
}

#[tokio::test]
async fn fail_count_in_hour_counts_recent_failures() {
    let h = Harness::new();
    h.add(MonitorAction::new("2 in hour", MonitorEvent::ExecutionFailXTimesInHour, "log", 1).with_argument("2"));
    let job = backup();
    let snapshot = ExecutionSnapshot::for_job(job.clone(), "node1")
        .with_result(ExecutionStatus::Fail, None, 5, None);
    let engine = h.engine();

    h.finished_run(&job, "r1", ExecutionStatus::Fail);
    assert!(engine.scan(MonitorEvent::ExecutionFailXTimesInHour, &snapshot).await.is_empty());
    h.finished_run(&job, "r2", ExecutionStatus::Success);
    h.finished_run(&job, "r3", ExecutionStatus::Fail);
    assert_eq!(engine.scan(MonitorEvent::ExecutionFailXTimesInHour, &snapshot).await.len(), 1);
}

#[tokio::test]
async fn failing_hook_does_not_block_the_others() {
    let h = Harness::new();
    let good = Recording::named("good");
    let bad = Arc::new(Recording {
        name: "bad",
        fail: true,
        ..Recording::default()
    });
    h.hooks.register(good.clone());
    h.hooks.register(bad.clone());
    h.add(MonitorAction::new("good", MonitorEvent::ExecutionFail, "good", 1));
    h.add(MonitorAction::new("bad", MonitorEvent::ExecutionFail, "bad", 2));

    let alerts = h.engine().scan(MonitorEvent::ExecutionFail, &ended(None)).await;

    assert_eq!(alerts.len(), 2);
    assert_eq!(good.seen().len(), 1);
    let failed = alerts.iter().find(|a| a.hook == "bad").unwrap();
    assert!(failed.has_error);
    assert!(failed.error_message.as_deref().unwrap().contains("endpoint refused"));
    let ok = alerts.iter().find(|a| a.hook == "good").unwrap();
    assert!(!ok.has_error);
    assert_eq!(h.monitors.count_alerts().unwrap(), 2);
}

#[tokio::test]
async fn slow_hook_is_cut_off() {
    let h = Harness::new();
    h.hooks.register(Arc::new(Recording {
        name: "slow",
        delay: Some(Duration::from_secs(5)),
        ..Recording::default()
    }));
    h.add(MonitorAction::new("slow", MonitorEvent::ExecutionEnd, "slow", 1));

    let alerts = h
        .engine()
        .with_hook_timeout(Duration::from_millis(50))
        .scan(MonitorEvent::ExecutionEnd, &ended(None))
        .await;

    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].has_error);
    assert!(alerts[0].error_message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn unknown_hook_is_recorded_as_error() {
    let h = Harness::new();
    h.add(MonitorAction::new("teams", MonitorEvent::ExecutionEnd, "teams", 1));

    let alerts = h.engine().scan(MonitorEvent::ExecutionEnd, &ended(None)).await;

    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].has_error);
    assert!(alerts[0].error_message.as_deref().unwrap().contains("teams"));
}

#[tokio::test]
async fn system_event_reaches_unscoped_actions() {
    let h = Harness::new();
    let hook = Recording::named("ops");
    h.hooks.register(hook.clone());
    h.add(MonitorAction::new("nodes", MonitorEvent::ClusterNodeRemoved, "ops", 1));
    h.add(MonitorAction::new("ends", MonitorEvent::ExecutionEnd, "ops", 2));

    let alerts = h
        .engine()
        .scan(
            MonitorEvent::ClusterNodeRemoved,
            &ExecutionSnapshot::system("node2:2306 removed", "node1"),
        )
        .await;

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].group_id, 1);
    assert_eq!(hook.seen()[0].details.message.as_deref(), Some("node2:2306 removed"));
}
