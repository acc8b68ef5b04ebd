//! Persistent store contract.
//!
//! The store is the single source of truth for task rows and the only
//! serialization point between concurrent executors: [`TaskStore::claim`]
//! must be an atomic conditional update (`Enqueued -> Running`), and every
//! post-execution write must be guarded on the row still being `Running`
//! under the same claim (`run_attempt_count` unchanged since the claim).

use async_trait::async_trait;

use super::error::SchedulerError;
use super::task::{ExecutionLogEntry, TaskRecord, TaskSpec, TaskState};
use crate::util::serde::TaskId;

/// Post-execution update applied by [`TaskStore::complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// `run_attempt_count` returned by the claim this result belongs to.
    pub claimed_attempt: u32,
    /// New state (`Succeeded`, `Failed` or `Enqueued`).
    pub state: TaskState,
    /// Next run time when re-entering `Enqueued`.
    pub next_run_time_ms: Option<u64>,
    /// New consecutive retry count.
    pub retry_count: u32,
    /// Mutation time.
    pub updated_at_ms: u64,
}

/// Result of [`TaskStore::replace_spec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Spec replaced and the row is `Enqueued` again.
    Replaced,
    /// No such row.
    NotFound,
    /// Row is `Running`; nothing changed.
    Running,
}

/// Transactional storage for task rows and the execution log.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new row. Fails if the id already exists.
    async fn insert(&self, record: TaskRecord) -> Result<(), SchedulerError>;

    /// Fetch one row.
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, SchedulerError>;

    /// All rows, in no particular order.
    async fn list(&self) -> Result<Vec<TaskRecord>, SchedulerError>;

    /// `Enqueued` rows with `next_run_time_ms <= now_ms`.
    async fn due(&self, now_ms: u64) -> Result<Vec<TaskRecord>, SchedulerError>;

    /// Atomically move `id` from `Enqueued` to `Running`, increment
    /// `run_attempt_count` and stamp `updated_at_ms`.
    ///
    /// Returns the claimed row, or `None` when zero rows were affected.
    async fn claim(&self, id: TaskId, now_ms: u64) -> Result<Option<TaskRecord>, SchedulerError>;

    /// Apply `completion` if the row is still `Running` under the claim
    /// identified by `completion.claimed_attempt`, and append `entry` in the
    /// same transaction.
    ///
    /// The entry is appended even when the guard fails; in that case its
    /// message is marked as discarded. Returns whether the row was updated.
    async fn complete(
        &self,
        id: TaskId,
        completion: Completion,
        entry: ExecutionLogEntry,
    ) -> Result<bool, SchedulerError>;

    /// Move `id` to `to` if its state is one of `from`. Returns affected rows.
    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<u64, SchedulerError>;

    /// [`TaskStore::transition`] over every row; returns the affected ids.
    async fn transition_all(
        &self,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<Vec<TaskId>, SchedulerError>;

    /// Install new scheduling state under an existing id unless it is running.
    ///
    /// Keeps `id`, `created_at_ms` and `run_attempt_count`; resets
    /// `retry_count` and `platform_id`; sets state `Enqueued`.
    async fn replace_spec(
        &self,
        id: TaskId,
        spec: TaskSpec,
        next_run_time_ms: u64,
        now_ms: u64,
    ) -> Result<ReplaceOutcome, SchedulerError>;

    /// Record the platform wake-up handle.
    async fn set_platform_id(
        &self,
        id: TaskId,
        platform_id: Option<String>,
    ) -> Result<(), SchedulerError>;

    /// Append one log entry.
    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), SchedulerError>;

    /// Log entries of `id` in insertion order.
    async fn logs(&self, id: TaskId) -> Result<Vec<ExecutionLogEntry>, SchedulerError>;

    /// Latest log entry of `id`.
    async fn last_log(&self, id: TaskId) -> Result<Option<ExecutionLogEntry>, SchedulerError> {
        Ok(self.logs(id).await?.pop())
    }
}
