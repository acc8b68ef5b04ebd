//! Tests for the API surface in `runtime::api`

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use prometheus_task_scheduler::builders::SchedulerBuilder;
use prometheus_task_scheduler::core::{
    AttemptContext, BackoffPolicy, Schedule, TaskError, TaskPayload, TaskResult, TaskScheduler,
    TaskState, Worker,
};
use prometheus_task_scheduler::runtime::{health, submit_task, task_status, TaskSubmission};
use prometheus_task_scheduler::util::{ManualClock, Priority, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Export {
    report: String,
}

impl TaskPayload for Export {
    const TYPE_ID: &'static str = "test.reports.export.v1";
}

struct Rejecting;

#[async_trait]
impl Worker<Export> for Rejecting {
    async fn run(&self, _: Export, _: AttemptContext) -> Result<TaskResult, TaskError> {
        Err(TaskError::Permanent("report deleted".into()))
    }
}

fn scheduler() -> TaskScheduler {
    SchedulerBuilder::new()
        .register::<Export, _>(Rejecting)
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(5_000)))
        .build()
        .unwrap()
}

#[test]
fn test_submission_defaults_to_one_time() {
    let submission: TaskSubmission<Export> =
        serde_json::from_str(r#"{"payload": {"report": "q3"}}"#).unwrap();
    let request = submission.into_request();
    assert_eq!(request.payload.report, "q3");
    assert_eq!(request.priority, Priority::Medium);
    assert!(matches!(request.schedule, Schedule::OneTime { initial_delay } if initial_delay.is_zero()));
    assert_eq!(request.retry.policy, BackoffPolicy::Exponential);
    assert_eq!(request.retry.max_retries, None);
}

#[test]
fn test_submission_periodic_with_flattened_preconditions() {
    let submission: TaskSubmission<Export> = serde_json::from_str(
        r#"{
            "payload": {"report": "daily"},
            "priority": "high",
            "interval_ms": 86400000,
            "flex_ms": 3600000,
            "initial_delay_ms": 1000,
            "requires_network": true,
            "backoff_policy": "linear",
            "backoff_delay_ms": 2000,
            "max_retries": 5
        }"#,
    )
    .unwrap();
    let request = submission.into_request();
    assert_eq!(request.priority, Priority::High);
    assert!(request.preconditions.requires_network);
    assert!(!request.preconditions.requires_charging);
    let Schedule::Periodic {
        interval,
        flex,
        initial_delay,
    } = request.schedule
    else {
        panic!("expected periodic schedule");
    };
    assert_eq!(interval.as_millis(), 86_400_000);
    assert_eq!(flex.as_millis(), 3_600_000);
    assert_eq!(initial_delay.as_millis(), 1_000);
    assert_eq!(request.retry.policy, BackoffPolicy::Linear);
    assert_eq!(request.retry.delay.map(|d| d.as_millis()), Some(2_000));
    assert_eq!(request.retry.max_retries, Some(5));
}

#[tokio::test]
async fn test_submit_task_reports_enqueued() {
    let scheduler = scheduler();
    let submission: TaskSubmission<Export> =
        serde_json::from_str(r#"{"payload": {"report": "q4"}}"#).unwrap();
    let response = submit_task(&scheduler, submission).await.unwrap();
    assert_eq!(response.status, Some(TaskState::Enqueued));
    assert_eq!(response.reason, None);
}

#[tokio::test]
async fn test_task_status_carries_failure_reason() {
    let scheduler = scheduler();
    let submission: TaskSubmission<Export> =
        serde_json::from_str(r#"{"payload": {"report": "gone"}}"#).unwrap();
    let id = submit_task(&scheduler, submission).await.unwrap().task_id;
    scheduler.dispatch(id).await.unwrap();

    let response = task_status(&scheduler, id).await.unwrap();
    assert_eq!(response.status, Some(TaskState::Failed));
    assert!(response.reason.unwrap().contains("report deleted"));
}

#[tokio::test]
async fn test_task_status_for_unknown_id() {
    let scheduler = scheduler();
    let id = TaskId::new();
    let response = task_status(&scheduler, id).await.unwrap();
    assert_eq!(response.task_id, id);
    assert_eq!(response.status, None);
    assert_eq!(response.reason, None);
}

#[test]
fn test_health_lists_payload_types() {
    let report = health(&scheduler());
    assert!(report.ok);
    assert_eq!(report.payload_types, vec![Export::TYPE_ID.to_string()]);
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["ok"], true);
}
