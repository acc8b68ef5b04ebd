//! File-backed durable store.
//!
//! Task rows live in a JSON snapshot (`tasks.json`) that is rewritten after
//! every row mutation via a temp file and rename. The execution log is
//! append-only JSON lines (`execution_log.jsonl`). Both are loaded on open.
//!
//! A completion writes its log line first and then the snapshot, under the
//! table lock; if the snapshot write fails the log is truncated back and the
//! in-memory table is left untouched.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::memory::TaskTable;
use crate::core::{
    Completion, ExecutionLogEntry, ReplaceOutcome, SchedulerError, TaskRecord, TaskSpec,
    TaskState, TaskStore,
};
use crate::util::serde::TaskId;

const SNAPSHOT_FILE: &str = "tasks.json";
const LOG_FILE: &str = "execution_log.jsonl";

fn backend(err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Backend(err.to_string())
}

/// Durable store using a JSON snapshot plus a JSONL execution log.
#[derive(Debug)]
pub struct FileTaskStore {
    dir: PathBuf,
    table: Mutex<TaskTable>,
}

impl FileTaskStore {
    /// Open (or create) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let dir = dir.as_ref().to_path_buf();
        create_dir_all(&dir).map_err(backend)?;
        let tasks = load_snapshot(&dir.join(SNAPSHOT_FILE))?;
        let logs = load_log(&dir.join(LOG_FILE))?;
        tracing::info!(
            path = %dir.display(),
            tasks = tasks.len(),
            log_entries = logs.len(),
            "file task store opened"
        );
        Ok(Self {
            dir,
            table: Mutex::new(TaskTable::from_parts(tasks, logs)),
        })
    }

    /// Directory holding the store files.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn write_snapshot(&self, table: &TaskTable) -> Result<(), SchedulerError> {
        let target = self.snapshot_path();
        let tmp = target.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(&table.list()).map_err(backend)?;
        fs::write(&tmp, json).map_err(backend)?;
        fs::rename(&tmp, &target).map_err(backend)
    }

    /// Append one JSON line; returns the log length before the append.
    fn append_to_log(&self, entry: &ExecutionLogEntry) -> Result<u64, SchedulerError> {
        let line = serde_json::to_string(entry).map_err(backend)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .map_err(backend)?;
        let mark = file.metadata().map_err(backend)?.len();
        if let Err(err) = writeln!(file, "{line}") {
            drop(file);
            self.truncate_log(mark);
            return Err(backend(err));
        }
        Ok(mark)
    }

    fn truncate_log(&self, len: u64) {
        let result = OpenOptions::new()
            .write(true)
            .open(self.log_path())
            .and_then(|file| file.set_len(len));
        if let Err(err) = result {
            tracing::error!(path = %self.log_path().display(), error = %err, "failed to roll back execution log");
        }
    }

    /// Run `mutate` on a copy of the table and commit it only if the snapshot
    /// write succeeds.
    fn mutate<T>(&self, mutate: impl FnOnce(&mut TaskTable) -> T, changed: impl Fn(&T) -> bool) -> Result<T, SchedulerError> {
        let mut table = self.table.lock();
        let mut next = table.clone();
        let out = mutate(&mut next);
        if changed(&out) {
            self.write_snapshot(&next)?;
        }
        *table = next;
        Ok(out)
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<TaskRecord>, SchedulerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path).map_err(backend)?;
    serde_json::from_slice(&bytes).map_err(|e| backend(format!("{}: {e}", path.display())))
}

fn load_log(path: &Path) -> Result<Vec<ExecutionLogEntry>, SchedulerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = OpenOptions::new().read(true).open(path).map_err(backend)?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(backend)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            // A torn final line after a crash is expected; skip it.
            Err(err) => tracing::warn!(line = index + 1, error = %err, "skipping unreadable log line"),
        }
    }
    Ok(entries)
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, record: TaskRecord) -> Result<(), SchedulerError> {
        self.mutate(|t| t.insert(record), Result::is_ok)?
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
        self.mutate(|t| t.claim(id, now_ms), Option::is_some)
    }

    async fn complete(
        &self,
        id: TaskId,
        completion: Completion,
        entry: ExecutionLogEntry,
    ) -> Result<bool, SchedulerError> {
        let mut table = self.table.lock();
        let mut next = table.clone();
        let (applied, stored) = next.complete(id, completion, entry);
        let mark = self.append_to_log(&stored)?;
        if applied {
            if let Err(err) = self.write_snapshot(&next) {
                self.truncate_log(mark);
                return Err(err);
            }
        }
        *table = next;
        Ok(applied)
    }

    async fn transition(
        &self,
        id: TaskId,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<u64, SchedulerError> {
        self.mutate(|t| t.transition(id, from, to, now_ms), |n| *n > 0)
    }

    async fn transition_all(
        &self,
        from: &[TaskState],
        to: TaskState,
        now_ms: u64,
    ) -> Result<Vec<TaskId>, SchedulerError> {
        self.mutate(|t| t.transition_all(from, to, now_ms), |ids| !ids.is_empty())
    }

    async fn replace_spec(
        &self,
        id: TaskId,
        spec: TaskSpec,
        next_run_time_ms: u64,
        now_ms: u64,
    ) -> Result<ReplaceOutcome, SchedulerError> {
        self.mutate(
            |t| t.replace_spec(id, spec, next_run_time_ms, now_ms),
            |o| *o == ReplaceOutcome::Replaced,
        )
    }

    async fn set_platform_id(
        &self,
        id: TaskId,
        platform_id: Option<String>,
    ) -> Result<(), SchedulerError> {
        self.mutate(|t| t.set_platform_id(id, platform_id), Result::is_ok)?
    }

    async fn append_log(&self, entry: ExecutionLogEntry) -> Result<(), SchedulerError> {
        let mut table = self.table.lock();
        self.append_to_log(&entry)?;
        table.append_log(entry);
        Ok(())
    }

    async fn logs(&self, id: TaskId) -> Result<Vec<ExecutionLogEntry>, SchedulerError> {
        Ok(self.table.lock().logs(id))
    }

    async fn last_log(&self, id: TaskId) -> Result<Option<ExecutionLogEntry>, SchedulerError> {
        Ok(self.table.lock().last_log(id))
    }
}
