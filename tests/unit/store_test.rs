//! Tests for the store backends and the SQL schema contract

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use prometheus_task_scheduler::core::{
    BackoffPolicy, Completion, ExecutionLogEntry, Preconditions, ReplaceOutcome, ResultKind,
    ScheduleType, TaskRecord, TaskSpec, TaskState, TaskStore,
};
use prometheus_task_scheduler::infra::store::SqlSchema;
use prometheus_task_scheduler::infra::{FileTaskStore, InMemoryTaskStore};
use prometheus_task_scheduler::util::TaskId;

fn spec(data: &str) -> TaskSpec {
    TaskSpec {
        payload_type_id: "test.store.row.v1".into(),
        payload_data: data.into(),
        priority: 1,
        preconditions: Preconditions::default(),
        schedule_type: ScheduleType::OneTime,
        initial_delay_ms: 0,
        interval_ms: 0,
        flex_ms: 0,
        backoff_policy: BackoffPolicy::Exponential,
        backoff_delay_ms: 1_000,
        backoff_multiplier: Some(2.0),
        backoff_jitter_factor: 0.1,
        max_retries: 3,
    }
}

fn record(next_run_time_ms: u64) -> TaskRecord {
    TaskRecord::new(TaskId::new(), spec("{}"), next_run_time_ms, 100)
}

fn entry(id: TaskId, kind: ResultKind, attempt: u32) -> ExecutionLogEntry {
    ExecutionLogEntry {
        task_id: id,
        created_at_ms: 200,
        result_kind: kind,
        attempt_number: attempt,
        message: Some(format!("{kind} #{attempt}")),
    }
}

fn retry_completion() -> Completion {
    Completion {
        claimed_attempt: 1,
        state: TaskState::Enqueued,
        next_run_time_ms: Some(5_000),
        retry_count: 1,
        updated_at_ms: 200,
    }
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let store = InMemoryTaskStore::new();
    let row = record(0);
    store.insert(row.clone()).await.unwrap();

    let claimed = store.claim(row.id, 150).await.unwrap().unwrap();
    assert_eq!(claimed.state, TaskState::Running);
    assert_eq!(claimed.run_attempt_count, 1);
    assert!(store.claim(row.id, 151).await.unwrap().is_none());
    assert!(store.claim(TaskId::new(), 151).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let store = Arc::new(InMemoryTaskStore::new());
    let row = record(0);
    store.insert(row.clone()).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.claim(row.id, i).await.unwrap() })
        })
        .collect();
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_duplicate_insert_is_rejected() {
    let store = InMemoryTaskStore::new();
    let row = record(0);
    store.insert(row.clone()).await.unwrap();
    assert!(store.insert(row).await.is_err());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_completion_requires_running_row() {
    let store = InMemoryTaskStore::new();
    let row = record(0);
    store.insert(row.clone()).await.unwrap();

    let applied = store
        .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
        .await
        .unwrap();
    assert!(!applied);
    let logged = store.last_log(row.id).await.unwrap().unwrap();
    assert!(logged.message.unwrap().starts_with("discarded"));

    store.claim(row.id, 150).await.unwrap();
    assert!(store
        .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
        .await
        .unwrap());
    let updated = store.get(row.id).await.unwrap().unwrap();
    assert_eq!(updated.state, TaskState::Enqueued);
    assert_eq!(updated.next_run_time_ms, 5_000);
    assert_eq!(updated.retry_count, 1);
    assert_eq!(store.logs(row.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_due_returns_enqueued_rows_in_time_order() {
    let store = InMemoryTaskStore::new();
    let late = record(900);
    let early = record(300);
    let future = record(10_000);
    let running = record(0);
    for row in [&late, &early, &future, &running] {
        store.insert(row.clone()).await.unwrap();
    }
    store.claim(running.id, 150).await.unwrap();

    let due: Vec<TaskId> = store.due(1_000).await.unwrap().iter().map(|r| r.id).collect();
    assert_eq!(due, vec![early.id, late.id]);
}

#[tokio::test]
async fn test_transition_and_replace_guards() {
    let store = InMemoryTaskStore::new();
    let row = record(0);
    store.insert(row.clone()).await.unwrap();

    store.claim(row.id, 150).await.unwrap();
    assert_eq!(
        store.replace_spec(row.id, spec("{\"v\":2}"), 0, 160).await.unwrap(),
        ReplaceOutcome::Running
    );
    assert_eq!(
        store
            .transition(row.id, &TaskState::CANCELLABLE, TaskState::Cancelled, 170)
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .transition(row.id, &TaskState::CANCELLABLE, TaskState::Cancelled, 171)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        store.replace_spec(row.id, spec("{\"v\":2}"), 0, 180).await.unwrap(),
        ReplaceOutcome::Replaced
    );
    assert_eq!(
        store.replace_spec(TaskId::new(), spec("{}"), 0, 180).await.unwrap(),
        ReplaceOutcome::NotFound
    );
    assert!(store.set_platform_id(TaskId::new(), None).await.is_err());
}

#[tokio::test]
async fn test_file_store_reloads_rows_and_log() {
    let dir = tempfile::tempdir().unwrap();
    let row = record(0);
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        assert_eq!(store.path(), dir.path());
        store.insert(row.clone()).await.unwrap();
        store.claim(row.id, 150).await.unwrap();
        store
            .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
            .await
            .unwrap();
        store
            .set_platform_id(row.id, Some("job-17".into()))
            .await
            .unwrap();
    }

    let reopened = FileTaskStore::open(dir.path()).unwrap();
    let loaded = reopened.get(row.id).await.unwrap().unwrap();
    assert_eq!(loaded.state, TaskState::Enqueued);
    assert_eq!(loaded.run_attempt_count, 1);
    assert_eq!(loaded.retry_count, 1);
    assert_eq!(loaded.platform_id.as_deref(), Some("job-17"));
    assert_eq!(loaded.spec, row.spec);
    let log = reopened.logs(row.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].result_kind, ResultKind::RetryScheduled);
}

#[tokio::test]
async fn test_file_store_completion_is_not_committed_when_log_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    let row = record(0);
    let log_path = dir.path().join("execution_log.jsonl");
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store.insert(row.clone()).await.unwrap();
        store.claim(row.id, 150).await.unwrap();
        fs::create_dir(&log_path).unwrap();

        let result = store
            .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(row.id).await.unwrap().unwrap().state, TaskState::Running);
        assert!(store.logs(row.id).await.unwrap().is_empty());
    }
    fs::remove_dir(&log_path).unwrap();

    let reopened = FileTaskStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get(row.id).await.unwrap().unwrap().state, TaskState::Running);
    assert!(reopened.logs(row.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_file_store_rolls_back_log_when_snapshot_write_fails() {
    let dir = tempfile::tempdir().unwrap();
    let row = record(0);
    let tmp_path = dir.path().join("tasks.json.tmp");
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store.insert(row.clone()).await.unwrap();
        store.claim(row.id, 150).await.unwrap();
        fs::create_dir(&tmp_path).unwrap();

        let result = store
            .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
            .await;
        assert!(result.is_err());
        assert_eq!(store.get(row.id).await.unwrap().unwrap().state, TaskState::Running);
        assert!(store.logs(row.id).await.unwrap().is_empty());
        let log_len = fs::metadata(dir.path().join("execution_log.jsonl")).unwrap().len();
        assert_eq!(log_len, 0);
    }
    fs::remove_dir(&tmp_path).unwrap();

    let reopened = FileTaskStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get(row.id).await.unwrap().unwrap().state, TaskState::Running);
    assert!(reopened.logs(row.id).await.unwrap().is_empty());

    assert!(reopened
        .complete(row.id, retry_completion(), entry(row.id, ResultKind::RetryScheduled, 1))
        .await
        .unwrap());
    let log = FileTaskStore::open(dir.path()).unwrap().logs(row.id).await.unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_file_store_skips_torn_log_line() {
    let dir = tempfile::tempdir().unwrap();
    let row = record(0);
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        store.insert(row.clone()).await.unwrap();
        store
            .append_log(entry(row.id, ResultKind::Succeeded, 1))
            .await
            .unwrap();
    }
    let mut log = OpenOptions::new()
        .append(true)
        .open(dir.path().join("execution_log.jsonl"))
        .unwrap();
    write!(log, "{{\"task_id\":\"{}\",\"created_at", row.id).unwrap();

    let reopened = FileTaskStore::open(dir.path()).unwrap();
    assert_eq!(reopened.logs(row.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_file_store_cancel_all_persists() {
    let dir = tempfile::tempdir().unwrap();
    let rows = [record(0), record(10), record(20)];
    {
        let store = FileTaskStore::open(dir.path()).unwrap();
        for row in &rows {
            store.insert(row.clone()).await.unwrap();
        }
        let cancelled = store
            .transition_all(&TaskState::CANCELLABLE, TaskState::Cancelled, 300)
            .await
            .unwrap();
        assert_eq!(cancelled.len(), 3);
    }
    let reopened = FileTaskStore::open(dir.path()).unwrap();
    let states: Vec<TaskState> = reopened.list().await.unwrap().iter().map(|r| r.state).collect();
    assert_eq!(states, vec![TaskState::Cancelled; 3]);
}

#[test]
fn test_sql_schema_guards() {
    assert!(SqlSchema::CLAIM.contains("state = 'enqueued'"));
    assert!(SqlSchema::COMPLETE.contains("state = 'running'"));
    assert!(SqlSchema::COMPLETE.contains("run_attempt_count = $6"));
    assert!(SqlSchema::CANCEL.contains("IN ('enqueued', 'running')"));
    assert!(SqlSchema::LIST.contains("priority DESC"));
    let migrations = SqlSchema::migrations();
    assert_eq!(migrations.len(), 2);
    assert!(migrations[0].contains("CREATE TABLE IF NOT EXISTS scheduled_tasks"));
    assert!(migrations[0].contains("retry_count"));
    assert!(migrations[1].contains("task_execution_log"));
}
