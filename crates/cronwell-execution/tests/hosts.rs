// End-to-end runs through JobRunner for each host kind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cronwell_core::job::{JobKind, RestMethod};
use cronwell_core::types::{DataMap, JobKey, TriggerKey};
use cronwell_execution::{
    ExecutionError, ExecutionLimits, ExecutionOutcome, ExecutionTracker, InProcessJobHost,
    JobContext, JobHandler, JobRunner, LifecycleSink, ProcessJobHost, RestJobHost,
};
use cronwell_protocol::lifecycle::ExceptionInfo;
use tokio_util::sync::CancellationToken;

fn runner() -> JobRunner {
    JobRunner::new(
        ProcessJobHost::new(),
        RestJobHost::new().unwrap(),
        InProcessJobHost::new(),
    )
}

fn context(kind: JobKind) -> JobContext {
    JobContext {
        fire_instance_id: "fire-1".into(),
        job_key: JobKey::new("etl", "load"),
        trigger_key: TriggerKey::new("etl", "nightly"),
        data: DataMap::new(),
        kind,
    }
}

fn shell(script: &str) -> JobKind {
    JobKind::Process {
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        working_dir: None,
    }
}

struct Counting;

#[async_trait]
impl JobHandler for Counting {
    async fn execute(
        &self,
        _ctx: &JobContext,
        sink: &LifecycleSink,
        _cancel: CancellationToken,
    ) -> cronwell_execution::Result<()> {
        for _ in 0..3 {
            sink.increase_effected_rows(1);
        }
        sink.update_progress_of(3, 3);
        Ok(())
    }
}

struct Reporting;

#[async_trait]
impl JobHandler for Reporting {
    async fn execute(
        &self,
        _ctx: &JobContext,
        sink: &LifecycleSink,
        _cancel: CancellationToken,
    ) -> cronwell_execution::Result<()> {
        sink.report_exception(ExceptionInfo::new("input file missing"));
        Err(ExecutionError::JobFailed("secondary".into()))
    }
}

struct Sleepy;

#[async_trait]
impl JobHandler for Sleepy {
    async fn execute(
        &self,
        _ctx: &JobContext,
        _sink: &LifecycleSink,
        _cancel: CancellationToken,
    ) -> cronwell_execution::Result<()> {
        tokio::time::sleep(Duration::from_secs(3 * 3600)).await;
        Ok(())
    }
}

struct Cooperative;

#[async_trait]
impl JobHandler for Cooperative {
    async fn execute(
        &self,
        _ctx: &JobContext,
        sink: &LifecycleSink,
        cancel: CancellationToken,
    ) -> cronwell_execution::Result<()> {
        cancel.cancelled().await;
        sink.append_log("cleaned up");
        Ok(())
    }
}

#[tokio::test]
async fn in_process_success_keeps_counters() {
    let runner = runner();
    runner.in_process().register("count", Arc::new(Counting));
    let tracker = ExecutionTracker::new(25);
    let sink = tracker.get_or_create("fire-1");

    let outcome = runner
        .execute(
            &context(JobKind::InProcess {
                handler: "count".into(),
            }),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::Success);
    let m = sink.finalize();
    assert_eq!(m.effected_rows(), Some(3));
    assert_eq!(m.progress(), 100);
}

#[tokio::test]
async fn reported_exception_wins_over_returned_error() {
    let runner = runner();
    runner.in_process().register("report", Arc::new(Reporting));
    let sink = LifecycleSink::detached("fire-1", 25);

    let outcome = runner
        .execute(
            &context(JobKind::InProcess {
                handler: "report".into(),
            }),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::Fail);
    let m = sink.snapshot();
    assert_eq!(m.unhandled_exception().unwrap().message, "input file missing");
}

#[tokio::test]
async fn unknown_handler_fails_the_run() {
    let sink = LifecycleSink::detached("fire-1", 25);
    let outcome = runner()
        .execute(
            &context(JobKind::InProcess {
                handler: "missing".into(),
            }),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::Fail);
    assert!(sink
        .snapshot()
        .exception_column()
        .unwrap()
        .contains("Unknown job handler: missing"));
}

#[tokio::test(start_paused = true)]
async fn default_timeout_ends_runaway_job() {
    let runner = runner();
    runner.in_process().register("sleepy", Arc::new(Sleepy));
    let sink = LifecycleSink::detached("fire-1", 25);
    let started = tokio::time::Instant::now();

    let outcome = runner
        .execute(
            &context(JobKind::InProcess {
                handler: "sleepy".into(),
            }),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7200 + 180));
    assert!(elapsed < Duration::from_secs(7200 + 181));
    let m = sink.snapshot();
    assert!(m.log_text().contains("[timeout] timeout occurred"));
    assert!(m.log_text().contains("grace period"));
    assert!(!m.is_running_success());
}

#[tokio::test(start_paused = true)]
async fn cooperative_job_stops_within_grace() {
    let runner = runner();
    runner.in_process().register("coop", Arc::new(Cooperative));
    let sink = LifecycleSink::detached("fire-1", 25);

    let outcome = runner
        .execute(
            &context(JobKind::InProcess {
                handler: "coop".into(),
            }),
            &sink,
            ExecutionLimits::new(Duration::from_secs(60), Duration::from_secs(180)),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::TimedOut);
    let log = sink.snapshot().log_text();
    assert!(log.contains("cleaned up"));
    assert!(!log.contains("grace period"));
}

#[tokio::test]
async fn stop_request_marks_run_stopped() {
    let runner = runner();
    runner.in_process().register("coop", Arc::new(Cooperative));
    let sink = LifecycleSink::detached("fire-1", 25);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = runner
        .execute(
            &context(JobKind::InProcess {
                handler: "coop".into(),
            }),
            &sink,
            ExecutionLimits::default(),
            &cancel,
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::Stopped);
    assert!(sink.snapshot().is_running_success());
}

#[cfg(unix)]
#[tokio::test]
async fn process_output_feeds_log_and_events() {
    let script = r#"printf '\033[32mstarting\033[0m\n'
echo '::cronwell:: {"type":"set_effected_rows","value":7}'
echo '::cronwell:: {"type":"update_progress","progress":40}'
echo "warn from stderr" >&2
echo "job=$CRONWELL_JOB_GROUP.$CRONWELL_JOB_NAME""#;
    let sink = LifecycleSink::detached("fire-1", 25);

    let outcome = runner()
        .execute(
            &context(shell(script)),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, ExecutionOutcome::Success);
    let m = sink.snapshot();
    let log = m.log_text();
    assert!(log.contains("starting\n"));
    assert!(!log.contains('\u{1b}'));
    assert!(log.contains("warn from stderr"));
    assert!(log.contains("job=etl.load"));
    assert!(!log.contains("::cronwell::"));
    assert_eq!(m.effected_rows(), Some(7));
    assert_eq!(m.progress(), 40);
}

#[cfg(unix)]
#[tokio::test]
async fn process_exit_code_fails_the_run() {
    let sink = LifecycleSink::detached("fire-1", 25);
    let outcome = runner()
        .execute(
            &context(shell("echo partial; exit 3")),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::Fail);
    let m = sink.snapshot();
    assert_eq!(
        m.unhandled_exception().unwrap().message,
        "Process exited with code 3"
    );
    assert!(m.log_text().contains("partial"));
}

#[cfg(unix)]
#[tokio::test]
async fn process_is_killed_on_timeout() {
    let sink = LifecycleSink::detached("fire-1", 25);
    let started = std::time::Instant::now();
    let outcome = runner()
        .execute(
            &context(shell("sleep 30")),
            &sink,
            ExecutionLimits::new(Duration::from_millis(100), Duration::from_secs(5)),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::TimedOut);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(sink.snapshot().log_text().contains("[timeout]"));
}

#[tokio::test]
async fn missing_executable_fails_the_run() {
    let sink = LifecycleSink::detached("fire-1", 25);
    let kind = JobKind::Process {
        command: "/nonexistent/cronwell-test-binary".into(),
        args: Vec::new(),
        working_dir: None,
    };
    let outcome = runner()
        .execute(
            &context(kind),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::Fail);
    assert!(sink
        .snapshot()
        .exception_column()
        .unwrap()
        .starts_with("Spawn error"));
}

#[tokio::test]
async fn unreachable_rest_endpoint_fails_the_run() {
    let sink = LifecycleSink::detached("fire-1", 25);
    let kind = JobKind::Rest {
        method: RestMethod::Post,
        url: "http://127.0.0.1:1/ping".into(),
        body: Some("{}".into()),
        headers: Default::default(),
        bearer_token: None,
        log_response: false,
    };
    let outcome = runner()
        .execute(
            &context(kind),
            &sink,
            ExecutionLimits::default(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome, ExecutionOutcome::Fail);
    assert!(sink.snapshot().log_text().starts_with("[rest] POST http://127.0.0.1:1/ping"));
}
