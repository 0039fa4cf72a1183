// Nodes of one cluster poll the same trigger tables; each due fire must be
// claimed by exactly one of them.

use std::path::PathBuf;
use std::sync::{Arc, Barrier};

use chrono::Duration;
use cronwell_core::job::{JobDefinition, JobKind, NewTrigger, Schedule, TriggerDetails};
use cronwell_core::types::{generate_id, JobKey, TriggerKey, RETRY_TRIGGER_GROUP};
use cronwell_scheduler::SqliteTriggerClock;
use cronwell_store::db;

struct SharedDb {
    dir: PathBuf,
    path: String,
}

impl SharedDb {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("cronwell-shared-{}", generate_id()));
        let path = dir.join("cronwell.db").to_string_lossy().into_owned();
        Self { dir, path }
    }

    fn node(&self) -> SqliteTriggerClock {
        SqliteTriggerClock::new(db::open(&self.path).unwrap()).unwrap()
    }
}

impl Drop for SharedDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn add_job(clock: &SqliteTriggerClock) -> JobKey {
    let key = JobKey::new("Etl", "Load");
    clock
        .add_job(&JobDefinition::new(
            key.clone(),
            JobKind::InProcess {
                handler: "load".into(),
            },
        ))
        .unwrap();
    key
}

fn claims(clock: &SqliteTriggerClock, due: &[TriggerDetails], now: chrono::DateTime<chrono::Utc>) -> usize {
    due.iter()
        .filter(|t| clock.mark_fired(t, now).unwrap())
        .count()
}

#[test]
fn two_nodes_reading_the_same_due_trigger_fire_it_once() {
    let shared = SharedDb::new();
    let (node_a, node_b) = (shared.node(), shared.node());
    let job = add_job(&node_a);
    let details = node_a
        .schedule_trigger(&NewTrigger::new(
            TriggerKey::new("Etl", "every-minute"),
            job,
            Schedule::Interval { every_secs: 60 },
        ))
        .unwrap();
    let now = details.next_fire.unwrap() + Duration::seconds(1);

    let due_a = node_a.due_triggers(now).unwrap();
    let due_b = node_b.due_triggers(now).unwrap();
    assert_eq!((due_a.len(), due_b.len()), (1, 1));

    assert_eq!(claims(&node_a, &due_a, now) + claims(&node_b, &due_b, now), 1);
    assert!(node_b.due_triggers(now).unwrap().is_empty());
}

#[test]
fn reserved_one_shot_is_claimed_by_one_node() {
    let shared = SharedDb::new();
    let (node_a, node_b) = (shared.node(), shared.node());
    let job = add_job(&node_a);
    let at = chrono::Utc::now() + Duration::seconds(5);
    node_a
        .schedule_trigger(&NewTrigger::new(
            TriggerKey::new(RETRY_TRIGGER_GROUP, "Load.1"),
            job,
            Schedule::Once { at },
        ))
        .unwrap();
    let now = at + Duration::seconds(1);

    let due_a = node_a.due_triggers(now).unwrap();
    let due_b = node_b.due_triggers(now).unwrap();
    assert_eq!(claims(&node_b, &due_b, now), 1);
    assert_eq!(claims(&node_a, &due_a, now), 0);
    assert!(node_a
        .get_trigger(&TriggerKey::new(RETRY_TRIGGER_GROUP, "Load.1"))
        .unwrap()
        .is_none());
}

#[test]
fn racing_nodes_split_fires_without_duplicates() {
    const NODES: usize = 4;
    const TRIGGERS: usize = 20;

    let shared = SharedDb::new();
    let first = shared.node();
    let job = add_job(&first);
    let mut latest = None;
    for i in 0..TRIGGERS {
        let details = first
            .schedule_trigger(&NewTrigger::new(
                TriggerKey::new("Etl", format!("t{i}")),
                job.clone(),
                Schedule::Interval { every_secs: 60 },
            ))
            .unwrap();
        latest = latest.max(details.next_fire);
    }
    let now = latest.unwrap() + Duration::seconds(1);

    let barrier = Arc::new(Barrier::new(NODES));
    let handles: Vec<_> = (0..NODES)
        .map(|_| {
            let clock = shared.node();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let due = clock.due_triggers(now).unwrap();
                barrier.wait();
                claims(&clock, &due, now)
            })
        })
        .collect();

    let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(fired, TRIGGERS);
}
