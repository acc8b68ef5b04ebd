//! Persisted task model and the task state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::util::serde::{Priority, TaskId};

/// Lifecycle state of a persisted task.
///
/// ```text
/// Enqueued -> Running, Cancelled
/// Running  -> Succeeded, Failed, Enqueued (retry / periodic re-arm), Cancelled
/// Succeeded, Failed, Cancelled -> (terminal)
/// ```
///
/// Leaving a terminal state requires a reschedule, which installs new
/// scheduling state under the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its next run time.
    Enqueued,
    /// Claimed by exactly one executor.
    Running,
    /// Completed successfully (one-time schedules only).
    Succeeded,
    /// Failed permanently or exhausted its retries.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
}

impl TaskState {
    /// Whether no further execution transitions are allowed.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether moving from `self` to `next` is an edge of the state machine.
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Enqueued => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::Succeeded | Self::Failed | Self::Enqueued | Self::Cancelled
            ),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Whether a reschedule may install new scheduling state. Every state
    /// except `Running` qualifies, terminal ones included.
    pub const fn can_reschedule(self) -> bool {
        !matches!(self, Self::Running)
    }

    /// States a caller may cancel from.
    pub const CANCELLABLE: [Self; 2] = [Self::Enqueued, Self::Running];
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Whether a task runs once or repeats on an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Runs until it succeeds, fails or is cancelled.
    OneTime,
    /// Re-enters `Enqueued` after every success.
    Periodic,
}

/// Growth formula for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// `base * retry`.
    Linear,
    /// `base * multiplier^(retry - 1)`, jittered and capped.
    #[default]
    Exponential,
}

/// Device/runtime conditions the platform adapter should wait for.
///
/// Advisory only: the core passes them through on every `arm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preconditions {
    /// Only run with network connectivity.
    pub requires_network: bool,
    /// Only run while charging.
    pub requires_charging: bool,
    /// Only run when the battery is not low.
    pub requires_battery_not_low: bool,
}

/// Normalized, persistable description of a task (everything but identity
/// and execution bookkeeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Registered payload type id.
    pub payload_type_id: String,
    /// Serialized payload, possibly carrying the cipher marker.
    pub payload_data: String,
    /// Priority ordinal (see [`Priority::ordinal`]).
    pub priority: u8,
    /// Advisory preconditions.
    #[serde(flatten)]
    pub preconditions: Preconditions,
    /// One-time or periodic.
    pub schedule_type: ScheduleType,
    /// Delay before the first run.
    pub initial_delay_ms: u64,
    /// Period for periodic schedules, 0 otherwise.
    pub interval_ms: u64,
    /// Flex window for periodic schedules.
    pub flex_ms: u64,
    /// Retry delay formula.
    pub backoff_policy: BackoffPolicy,
    /// Base retry delay.
    pub backoff_delay_ms: u64,
    /// Exponential multiplier; `None` means 2.0.
    pub backoff_multiplier: Option<f64>,
    /// Jitter fraction in `[0, 1]`, exponential only.
    pub backoff_jitter_factor: f64,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl TaskSpec {
    /// Priority as the API enum.
    pub const fn priority(&self) -> Priority {
        Priority::from_ordinal(self.priority)
    }

    /// Whether this spec repeats.
    pub fn is_periodic(&self) -> bool {
        self.schedule_type == ScheduleType::Periodic
    }
}

/// One row per scheduled unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Immutable identifier.
    pub id: TaskId,
    /// Current state.
    pub state: TaskState,
    /// Normalized task description.
    #[serde(flatten)]
    pub spec: TaskSpec,
    /// Earliest next execution; meaningful only while `Enqueued`.
    pub next_run_time_ms: u64,
    /// Successful claims ever made. Never decremented.
    pub run_attempt_count: u32,
    /// Consecutive retries since the first run or the last periodic success.
    #[serde(default)]
    pub retry_count: u32,
    /// Opaque handle of the platform wake-up registration.
    pub platform_id: Option<String>,
    /// Creation time.
    pub created_at_ms: u64,
    /// Last mutation time.
    pub updated_at_ms: u64,
}

impl TaskRecord {
    /// Fresh `Enqueued` record.
    pub fn new(id: TaskId, spec: TaskSpec, next_run_time_ms: u64, now_ms: u64) -> Self {
        Self {
            id,
            state: TaskState::Enqueued,
            spec,
            next_run_time_ms,
            run_attempt_count: 0,
            retry_count: 0,
            platform_id: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Delay from `now_ms` until the next run, saturating at zero.
    pub const fn delay_from(&self, now_ms: u64) -> u64 {
        self.next_run_time_ms.saturating_sub(now_ms)
    }

    /// Listing view of this record.
    pub fn summary(&self, last_message: Option<String>) -> TaskSummary {
        TaskSummary {
            id: self.id,
            payload_type_id: self.spec.payload_type_id.clone(),
            state: self.state,
            priority: self.spec.priority(),
            schedule_type: self.spec.schedule_type,
            run_attempt_count: self.run_attempt_count,
            next_run_time_ms: self.next_run_time_ms,
            last_message,
        }
    }
}

/// What an execution cycle ended with, as written to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Work unit succeeded.
    Succeeded,
    /// Retry scheduled after a transient failure or retry request.
    RetryScheduled,
    /// Work unit reported (or raised) a permanent failure.
    FailedPermanent,
    /// Transient failure with no retries left.
    FailedRetriesExhausted,
    /// Payload could not be resolved through the registry.
    PayloadUnavailable,
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::RetryScheduled => "retry_scheduled",
            Self::FailedPermanent => "failed_permanent",
            Self::FailedRetriesExhausted => "failed_retries_exhausted",
            Self::PayloadUnavailable => "payload_unavailable",
        };
        f.write_str(s)
    }
}

/// Append-only audit row, one per execution cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    /// Task the entry belongs to.
    pub task_id: TaskId,
    /// When the entry was written.
    pub created_at_ms: u64,
    /// Outcome category.
    pub result_kind: ResultKind,
    /// Value of `run_attempt_count` for this cycle.
    pub attempt_number: u32,
    /// Human-readable summary.
    pub message: Option<String>,
}

/// Listing view returned by `list_tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    /// Task id.
    pub id: TaskId,
    /// Registered payload type.
    pub payload_type_id: String,
    /// Current state.
    pub state: TaskState,
    /// Priority.
    pub priority: Priority,
    /// One-time or periodic.
    pub schedule_type: ScheduleType,
    /// Claims made so far.
    pub run_attempt_count: u32,
    /// Next run time.
    pub next_run_time_ms: u64,
    /// Message of the latest execution log entry.
    pub last_message: Option<String>,
}
