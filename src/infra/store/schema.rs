//! SQL schema for the durable store contract.
//!
//! Schema and statements only; no driver is wired here. Any SQL engine
//! backing [`TaskStore`](crate::core::TaskStore) must provide these columns
//! and run the claim and completion statements as single conditional
//! updates, checking the affected-row count.

/// SQL definitions for `scheduled_tasks` and `task_execution_log`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlSchema;

impl SqlSchema {
    /// Claim: `Enqueued -> Running`. Zero affected rows means the claim was lost.
    ///
    /// Parameters: `$1` task id, `$2` now (ms).
    pub const CLAIM: &'static str = r"
UPDATE scheduled_tasks
   SET state = 'running',
       run_attempt_count = run_attempt_count + 1,
       updated_at_ms = $2
 WHERE id = $1
   AND state = 'enqueued'";

    /// Post-execution update, guarded on the row still running under the
    /// claim that produced the result.
    ///
    /// Parameters: `$1` task id, `$2` new state, `$3` next run time (nullable,
    /// keeps the old value when null), `$4` retry count, `$5` now (ms),
    /// `$6` `run_attempt_count` returned by the claim.
    pub const COMPLETE: &'static str = r"
UPDATE scheduled_tasks
   SET state = $2,
       next_run_time_ms = COALESCE($3, next_run_time_ms),
       retry_count = $4,
       updated_at_ms = $5
 WHERE id = $1
   AND state = 'running'
   AND run_attempt_count = $6";

    /// Cancellation of one task.
    ///
    /// Parameters: `$1` task id, `$2` now (ms).
    pub const CANCEL: &'static str = r"
UPDATE scheduled_tasks
   SET state = 'cancelled',
       updated_at_ms = $2
 WHERE id = $1
   AND state IN ('enqueued', 'running')";

    /// Due-task query used by the orphan watchdog.
    ///
    /// Parameters: `$1` now (ms).
    pub const DUE: &'static str = r"
SELECT * FROM scheduled_tasks
 WHERE state = 'enqueued'
   AND next_run_time_ms <= $1
 ORDER BY next_run_time_ms";

    /// Listing order used by `list_tasks`.
    pub const LIST: &'static str = r"
SELECT * FROM scheduled_tasks
 ORDER BY priority DESC, next_run_time_ms, created_at_ms";

    /// Append-only log insert.
    ///
    /// Parameters: `$1` task id, `$2` created at (ms), `$3` result kind,
    /// `$4` attempt number, `$5` message.
    pub const APPEND_LOG: &'static str = r"
INSERT INTO task_execution_log (task_id, created_at_ms, result_kind, attempt_number, message)
VALUES ($1, $2, $3, $4, $5)";

    /// Migration statements creating both tables.
    pub fn migrations() -> &'static [&'static str] {
        &[
            r"
CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK (state IN ('enqueued', 'running', 'succeeded', 'failed', 'cancelled')),
    payload_type_id TEXT NOT NULL,
    payload_data TEXT NOT NULL,
    priority SMALLINT NOT NULL,
    requires_network BOOLEAN NOT NULL DEFAULT FALSE,
    requires_charging BOOLEAN NOT NULL DEFAULT FALSE,
    requires_battery_not_low BOOLEAN NOT NULL DEFAULT FALSE,
    schedule_type TEXT NOT NULL,
    initial_delay_ms BIGINT NOT NULL,
    interval_ms BIGINT NOT NULL DEFAULT 0,
    flex_ms BIGINT NOT NULL DEFAULT 0,
    backoff_policy TEXT NOT NULL,
    backoff_delay_ms BIGINT NOT NULL,
    backoff_multiplier DOUBLE PRECISION,
    backoff_jitter_factor DOUBLE PRECISION NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL,
    next_run_time_ms BIGINT NOT NULL,
    run_attempt_count INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    platform_id TEXT,
    created_at_ms BIGINT NOT NULL,
    updated_at_ms BIGINT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks (state, next_run_time_ms);
CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_listing ON scheduled_tasks (priority DESC, next_run_time_ms, created_at_ms);
",
            r"
CREATE TABLE IF NOT EXISTS task_execution_log (
    id BIGSERIAL PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES scheduled_tasks (id),
    created_at_ms BIGINT NOT NULL,
    result_kind TEXT NOT NULL,
    attempt_number INTEGER NOT NULL,
    message TEXT
);
CREATE INDEX IF NOT EXISTS idx_task_execution_log_task ON task_execution_log (task_id, id);
",
        ]
    }
}
