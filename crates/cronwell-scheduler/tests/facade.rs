// Startup and shutdown sequences, job management and the local RPC answers.

mod support;

use cronwell_cluster::ClusterError;
use cronwell_core::history::{ExecutionStatus, MANUAL_TRIGGER_ID};
use cronwell_core::job::{JobDefinition, JobKind, NewTrigger, Schedule, TriggerState};
use cronwell_core::types::{DataMap, JobKey, TriggerKey, MANUAL_TRIGGER_GROUP};
use cronwell_scheduler::{SchedulerError, SystemJob};
use support::{config, eventually, harness, harness_with};

fn interval(job: &JobKey, name: &str) -> NewTrigger {
    NewTrigger::new(
        TriggerKey::new(&job.group, name),
        job.clone(),
        Schedule::Interval { every_secs: 3600 },
    )
}

#[tokio::test]
async fn startup_refuses_a_database_with_a_live_cluster_node() {
    let h = harness(false);
    h.add_peer("node2", 10);

    let err = h.facade.start().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Cluster(ClusterError::Conflict(_))));
    assert!(!h.facade.is_running());
    assert!(h.clock.get_job(&SystemJob::PersistData.key()).unwrap().is_none());
}

#[tokio::test]
async fn dead_cluster_rows_do_not_block_a_standalone_node() {
    let h = harness(false);
    h.add_peer("node2", 3600);

    h.facade.start().await.unwrap();
    assert!(h.facade.is_running());
    h.facade.shutdown().await;
}

#[tokio::test]
async fn startup_installs_housekeeping_jobs_and_starts_the_clock() {
    let h = harness(false);
    h.facade.start().await.unwrap();
    assert!(h.facade.is_running());

    for job in SystemJob::ALL {
        assert!(h.clock.get_job(&job.key()).unwrap().is_some(), "{}", job.name());
    }
    let persist = h.clock.get_trigger(&SystemJob::PersistData.trigger_key()).unwrap().unwrap();
    assert_eq!(persist.schedule, Schedule::Interval { every_secs: 300 });
    let retention = h.clock.get_trigger(&SystemJob::Retention.trigger_key()).unwrap().unwrap();
    assert_eq!(retention.schedule, Schedule::Daily { hour: 0, minute: 30 });
    assert!(h
        .clock
        .get_trigger(&SystemJob::ClusterHealthCheck.trigger_key())
        .unwrap()
        .is_none());
    assert!(h.node("node1").is_none());

    h.facade.shutdown().await;
    assert!(!h.facade.is_running());
}

#[tokio::test]
async fn clustering_node_joins_after_a_healthy_check() {
    let h = harness(true);
    h.add_peer("node2", 10);

    h.facade.start().await.unwrap();
    assert!(h.facade.is_running());
    assert!(h.peers.health_checks() >= 1);
    let me = h.node("node1").unwrap();
    assert_eq!(me.instance_id, "inst-node1");
    assert!(h
        .clock
        .get_trigger(&SystemJob::ClusterHealthCheck.trigger_key())
        .unwrap()
        .is_some());

    h.facade.shutdown().await;
    assert!(h.node("node1").is_none());
    assert!(h.node("node2").is_some());
}

#[tokio::test]
async fn failed_join_gate_leaves_the_clock_in_standby() {
    let h = harness(true);
    h.add_peer("node2", 10);
    h.peers.take_down();

    let err = h.facade.start().await.unwrap_err();
    assert!(matches!(err, SchedulerError::Startup(_)));
    assert!(!h.facade.is_running());
    assert!(h.node("node1").is_none());
    h.facade.shutdown().await;
}

#[tokio::test]
async fn reserved_names_are_rejected() {
    let h = harness(false);
    let system = JobDefinition::new(
        JobKey::new("__system", "Mine"),
        JobKind::InProcess {
            handler: support::HANDLER.into(),
        },
    );
    assert!(matches!(h.facade.add_job(&system), Err(SchedulerError::Reserved(_))));

    let job = h.add_job("Etl", "Load", true);
    let sneaky = interval(&job, "nightly").with_data("__circuit_breaker", "FC:0,SC:0,FT:1,ST:,PS:null");
    assert!(matches!(h.facade.schedule_trigger(&sneaky), Err(SchedulerError::Reserved(_))));
    assert!(matches!(
        h.facade.remove_job(&SystemJob::Retention.key()),
        Err(SchedulerError::Reserved(_))
    ));
}

#[tokio::test]
async fn pause_and_resume_report_the_triggers_they_touched() {
    let h = harness(false);
    let job = h.add_job("Etl", "Load", true);
    let a = h.facade.schedule_trigger(&interval(&job, "a")).unwrap();
    let b = h.facade.schedule_trigger(&interval(&job, "b")).unwrap();
    h.clock.pause_trigger(&b.key).unwrap();

    let paused = h.facade.pause_job(&job).await.unwrap();
    assert_eq!(paused, vec![a.key.clone()]);
    assert_eq!(h.clock.trigger_state(&a.key).unwrap(), TriggerState::Paused);

    let mut resumed = h.facade.resume_job(&job).await.unwrap();
    resumed.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(resumed, vec![a.key.clone(), b.key.clone()]);
    assert_eq!(h.clock.trigger_state(&b.key).unwrap(), TriggerState::Normal);

    let missing = h.facade.pause_job(&JobKey::new("Etl", "Nope")).await;
    assert!(matches!(missing, Err(SchedulerError::JobNotFound { .. })));
}

#[tokio::test]
async fn invoked_job_runs_outside_its_schedule() {
    let h = harness(false);
    let job = h.add_job("Etl", "Load", true);

    let data = DataMap::from([("Mode".to_string(), "full".to_string())]);
    let id = h.facade.invoke_job(&job, data).unwrap().to_string();
    eventually("manual fire", || {
        h.row(&id).is_some_and(|r| r.status == ExecutionStatus::Success)
    })
    .await;

    let row = h.row(&id).unwrap();
    assert_eq!(row.trigger_group, MANUAL_TRIGGER_GROUP);
    assert_eq!(row.trigger_id, MANUAL_TRIGGER_ID);
    assert!(row.data.unwrap().contains("\"Mode\""));
    assert!(h.clock.triggers_of_job(&job).unwrap().is_empty());

    let unknown = h.facade.invoke_job(&JobKey::new("Etl", "Nope"), DataMap::new());
    assert!(matches!(unknown, Err(SchedulerError::JobNotFound { .. })));
}

#[tokio::test]
async fn shutdown_stops_running_fires() {
    let h = harness(false);
    let job = h.add_job("Etl", "Load", true);
    let data = DataMap::from([("Outcome".to_string(), "block".to_string())]);
    let id = h.facade.invoke_job(&job, data).unwrap().to_string();
    eventually("fire to start", || h.facade.local_running_job(&id).is_some()).await;

    let infos = h.facade.local_persistence_info();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].fire_instance_id, id);

    h.facade.shutdown().await;
    let row = h.row(&id).unwrap();
    assert_eq!(row.status, ExecutionStatus::Stopped);
    assert!(row.is_stopped);
    assert!(h.facade.local_running_jobs().is_empty());
}

#[tokio::test]
async fn health_reply_follows_the_clock() {
    let h = harness(false);
    let reply = h.facade.health_check_reply();
    assert_eq!(reply.server, "node1");
    assert_eq!(reply.port, 2306);
    assert_eq!(reply.instance_id, "inst-node1");
    assert!(!reply.scheduler_running);

    h.facade.start_clock();
    assert!(h.facade.health_check_reply().scheduler_running);
    h.facade.standby();
    assert!(!h.facade.health_check_reply().scheduler_running);
}

#[tokio::test]
async fn job_assets_resolve_only_under_the_jobs_folder() {
    let h = harness_with(config(false));
    std::fs::create_dir_all(h.jobs_folder.join("etl")).unwrap();
    std::fs::write(h.jobs_folder.join("etl").join("run.sh"), "echo hi").unwrap();

    assert!(h.facade.job_folder_exists("etl"));
    assert!(!h.facade.job_folder_exists("missing"));
    assert!(!h.facade.job_folder_exists("../etl"));
    assert!(!h.facade.job_folder_exists(""));
    assert!(h.facade.job_file_exists("etl", "run.sh"));
    assert!(!h.facade.job_file_exists("etl", "other.sh"));
    assert!(!h.facade.job_file_exists("etl", "/etc/passwd"));
    assert!(!h.facade.job_file_exists("etl", "run.sh/.."));
    assert!(!h.facade.job_folder_exists("etl/run.sh"));

    let _ = std::fs::remove_dir_all(&h.jobs_folder);
}

#[tokio::test]
async fn standalone_queries_stay_local() {
    let h = harness(false);
    let job = h.add_job("Etl", "Load", true);
    assert!(!h.facade.is_job_running(&job).await.unwrap());
    assert!(h.facade.get_running_jobs().await.unwrap().is_empty());
    assert!(h.facade.get_running_job("nope").await.unwrap().is_none());
    assert!(h.facade.get_running_data("nope").await.unwrap().is_none());
    assert!(!h.facade.stop_running_job("nope").await.unwrap());
    assert_eq!(h.peers.health_checks(), 0);
}
