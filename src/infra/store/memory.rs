//! In-memory task store.
//!
//! [`TaskTable`] holds the row/log logic shared with the file-backed store;
//! each store wraps it in a `parking_lot::Mutex`, so every trait method is
//! one short critical section (one "transaction").

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{
    Completion, ExecutionLogEntry, ReplaceOutcome, SchedulerError, TaskRecord, TaskSpec,
    TaskState, TaskStore,
};
use crate::util::serde::TaskId;

/// Prefix added to the log message of a result that arrived after the task
/// left `Running`.
pub const DISCARDED_PREFIX: &str = "discarded (task no longer running): ";

/// Task rows and execution log.
#[derive(Debug, Default, Clone)]
pub struct TaskTable {
    tasks: HashMap<TaskId, TaskRecord>,
    logs: HashMap<TaskId, Vec<ExecutionLogEntry>>,
}

impl TaskTable {
    /// Table seeded with existing rows and log entries.
    pub fn from_parts(
        tasks: impl IntoIterator<Item = TaskRecord>,
        logs: impl IntoIterator<Item = ExecutionLogEntry>,
    ) -> Self {
        let mut table = Self {
            tasks: tasks.into_iter().map(|r| (r.id, r)).collect(),
            logs: HashMap::new(),
        };
        for entry in logs {
            table.append_log(entry);
        }
        table
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Insert a new row.
    pub fn insert(&mut self, record: TaskRecord) -> Result<(), SchedulerError> {
        if self.tasks.contains_key(&record.id) {
            return Err(SchedulerError::Backend(format!(
                "task {} already exists",
                record.id
            )));
        }
        self.tasks.insert(record.id, record);
        Ok(())
    }

    /// One row.
    pub fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.tasks.get(&id).cloned()
    }

    /// All rows, oldest first.
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut rows: Vec<TaskRecord> = self.tasks.values().cloned().collect();
        rows.sort_by_key(|r| (r.created_at_ms, r.id));
        rows
    }

    /// Due `Enqueued` rows, earliest first.
    pub fn due(&self, now_ms: u64) -> Vec<TaskRecord> {
        let mut rows: Vec<TaskRecord> = self
            .tasks
            .values()
            .filter(|r| r.state == TaskState::Enqueued && r.next_run_time_ms <= now_ms)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.next_run_time_ms, r.id));
        rows
    }

    /// Conditional `Enqueued -> Running` update.
    pub fn claim(&mut self, id: TaskId, now_ms: u64) -> Option<TaskRecord> {
        let record = self.tasks.get_mut(&id)?;
        if record.state != TaskState::Enqueued {
            return None;
        }
        record.state = TaskState::Running;
        record.run_attempt_count = record.run_attempt_count.saturating_add(1);
        record.updated_at_ms = now_ms;
        Some(record.clone())
    }

    /// Apply `completion` if the row is still `Running` under the claim that
    /// produced it.
    pub fn apply_completion(&mut self, id: TaskId, completion: Completion) -> bool {
        let Some(record) = self.tasks.get_mut(&id) else {
            return false;
        };
        if record.state != TaskState::Running
            || record.run_attempt_count != completion.claimed_attempt
            || !record.state.can_transition_to(completion.state)
        {
            return false;
        }
        record.state = completion.state;
        if let Some(next) = completion.next_run_time_ms {
            record.next_run_time_ms = next;
        }
        record.retry_count = completion.retry_count;
        record.updated_at_ms = completion.updated_at_ms;
        true
    }

    /// Apply `completion` and append `entry`, marking it discarded when the
    /// guard fails. Returns whether the row changed and the stored entry.
    pub fn complete(
        &mut self,
        id: TaskId,
        completion: Completion,
        mut entry: ExecutionLogEntry,
    ) -> (bool, ExecutionLogEntry) {
        let applied = self.apply_completion(id, completion);
        if !applied {
            entry.message = Some(format!(
                "{DISCARDED_PREFIX}{}",
                entry.message.as_deref().unwrap_or_default()
            ));
        }
        self.append_log(entry.clone());
        (applied, entry)
    }

    /// Move `id` to `to` if its state is in `from`.
    pub fn transition(&mut self, id: TaskId, from: &[TaskState], to: TaskState, now_ms: u64) -> u64 {
        match self.tasks.get_mut(&id) {
            Some(record) if from.contains(&record.state) && record.state.can_transition_to(to) => {
                record.state = to;
                record.updated_at_ms = now_ms;
                1
            }
            _ => 0,
        }
    }

    /// [`TaskTable::transition`] over every row.
    pub fn transition_all(&mut self, from: &[TaskState], to: TaskState, now_ms: u64) -> Vec<TaskId> {
        let mut ids = Vec::new();
        for record in self.tasks.values_mut() {
            if from.contains(&record.state) && record.state.can_transition_to(to) {
                record.state = to;
                record.updated_at_ms = now_ms;
                ids.push(record.id);
            }
        }
        ids.sort();
        ids
    }

    /// Install new scheduling state unless the row is running.
    pub fn replace_spec(
        &mut self,
        id: TaskId,
        spec: TaskSpec,
        next_run_time_ms: u64,
        now_ms: u64,
    ) -> ReplaceOutcome {
        let Some(record) = self.tasks.get_mut(&id) else {
            return ReplaceOutcome::NotFound;
        };
        if !record.state.can_reschedule() {
            return ReplaceOutcome::Running;
        }
        record.spec = spec;
        record.state = TaskState::Enqueued;
        record.next_run_time_ms = next_run_time_ms;
        record.retry_count = 0;
        record.platform_id = None;
        record.updated_at_ms = now_ms;
        ReplaceOutcome::Replaced
    }

    /// Record the platform handle.
    pub fn set_platform_id(&mut self, id: TaskId, platform_id: Option<String>) -> Result<(), SchedulerError> {
        let record = self
            .tasks
            .get_mut(&id)
            .ok_or(SchedulerError::NotFound(id))?;
        record.platform_id = platform_id;
        Ok(())
    }

    /// Append one log entry.
    pub fn append_log(&mut self, entry: ExecutionLogEntry) {
        self.logs.entry(entry.task_id).or_default().push(entry);
    }

    /// Log entries of `id`.
    pub fn logs(&self, id: TaskId) -> Vec<ExecutionLogEntry> {
        self.logs.get(&id).cloned().unwrap_or_default()
    }

    /// Latest log entry of `id`.
    pub fn last_log(&self, id: TaskId) -> Option<ExecutionLogEntry> {
        self.logs.get(&id).and_then(|entries| entries.last().cloned())
    }
}

/// In-memory store for development/testing.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the store has no rows.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        self.table.lock().insert(record)
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>, SchedulerError> {
        Ok(self.table.lock().get(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>, SchedulerError> {
        Ok(self.table.lock().list())
    }

    async fn due(&self, now_ms: u64) -> Result<Vec<TaskRecord>, SchedulerError> {
        Ok(self.table.lock().due(now_ms))
    }

    async fn claim(&self, id: TaskId, now_ms: u64) -> Result<Option<TaskRecord>, SchedulerError> {
        Ok(self.table.lock().claim(id, now_ms))
    }

    async fn complete(
        &self,
        id: TaskId,
        completion: Completion,
        entry: ExecutionLogEntry,
    ) -> Result<bool, SchedulerError> {
        Ok(self.table.lock().complete(id, completion, entry).0)
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<u64, SchedulerError> {
        Ok(self.table.lock().transition(id, from, to, now_ms))
    }

    async fn transition_all(
        &self,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<Vec<TaskId>, SchedulerError> {
        Ok(self.table.lock().transition_all(from, to, now_ms))
    }

    async fn replace_spec(
        &self,
        id: TaskId,
        spec: TaskSpec,
        next_run_time_ms: u64,
        now_ms: u64,
    ) -> Result<ReplaceOutcome, SchedulerError> {
        Ok(self.table.lock().replace_spec(id, spec, next_run_time_ms, now_ms))
    }

    async fn set_platform_id(
        &self,
        id: TaskId,
        platform_id: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.table.lock().set_platform_id(id, platform_id)
    }

    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), SchedulerError> {
        self.table.lock().append_log(entry);
        Ok(())
    }

    async fn logs(&self, id: TaskId) -> Result<Vec<ExecutionLogEntry>, SchedulerError> {
        Ok(self.table.lock().logs(id))
    }

    async fn last_log(&self, id: TaskId) -> Result<Option<ExecutionLogEntry>, SchedulerError> {
        Ok(self.table.lock().last_log(id))
    }
}
