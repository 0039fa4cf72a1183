// Verify the JSON shapes nodes of different versions exchange.
// Field names here are a cross-node contract; renaming one breaks mixed clusters.

use cronwell_core::types::{JobKey, TriggerKey};
use cronwell_protocol::lifecycle::{parse_line, ExceptionInfo, LifecycleEvent, OutputLine};
use cronwell_protocol::messages::{
    ErrorBody, IsRunningReply, JobKeyRequest, RunningJobDetails, RunningJobReply,
};

#[test]
fn job_key_request_shape() {
    let req = JobKeyRequest::from(&JobKey::new("Infra", "Backup"));
    let json = serde_json::to_string(&req).unwrap();
    assert_eq!(json, r#"{"group":"Infra","name":"Backup"}"#);

    let key: JobKey = serde_json::from_str::<JobKeyRequest>(&json).unwrap().into();
    assert_eq!(key, JobKey::new("Infra", "Backup"));
}

#[test]
fn is_running_reply_shape() {
    let reply: IsRunningReply = serde_json::from_str(r#"{"running":true}"#).unwrap();
    assert!(reply.running);
}

#[test]
fn empty_running_job_reply_omits_job() {
    let json = serde_json::to_string(&RunningJobReply { job: None }).unwrap();
    assert_eq!(json, "{}");

    let reply: RunningJobReply = serde_json::from_str("{}").unwrap();
    assert!(reply.job.is_none());
}

#[test]
fn running_job_details_carry_keys_as_objects() {
    let details = RunningJobDetails {
        fire_instance_id: "f1".into(),
        job_key: JobKey::new("g", "j"),
        job_id: "abc".into(),
        trigger_key: TriggerKey::new("tg", "t"),
        trigger_id: "def".into(),
        data: Default::default(),
        fire_time: chrono::Utc::now(),
        run_time_ms: 1200,
        progress: 40,
        effected_rows: None,
        exceptions_count: 0,
        server: "node1".into(),
        instance_id: "i1".into(),
    };
    let value = serde_json::to_value(&details).unwrap();
    assert_eq!(value["job_key"]["group"], "g");
    assert_eq!(value["trigger_key"]["name"], "t");
    assert!(value.get("effected_rows").is_none());
}

#[test]
fn error_body_shape() {
    let json = serde_json::to_string(&ErrorBody::new("NOT_FOUND", "no such job")).unwrap();
    assert!(json.contains(r#""code":"NOT_FOUND""#));
    assert!(json.contains(r#""message":"no such job""#));
}

#[test]
fn lifecycle_events_use_snake_case_type_tag() {
    let line = LifecycleEvent::AppendLog {
        message: "hello".into(),
    }
    .to_line()
    .unwrap();
    assert_eq!(line, r#"::cronwell:: {"type":"append_log","message":"hello"}"#);
}

#[test]
fn report_exception_from_foreign_job() {
    // What a shell script would print by hand.
    let line = r#"::cronwell:: {"type":"report_exception","exception":{"message":"disk full"}}"#;
    match parse_line(line) {
        OutputLine::Event(LifecycleEvent::ReportException { exception }) => {
            assert_eq!(exception, ExceptionInfo::new("disk full"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn put_job_data_without_value_removes_key() {
    let line = r#"::cronwell:: {"type":"put_job_data","key":"Cursor"}"#;
    assert_eq!(
        parse_line(line),
        OutputLine::Event(LifecycleEvent::PutJobData {
            key: "Cursor".into(),
            value: None
        })
    );
}
