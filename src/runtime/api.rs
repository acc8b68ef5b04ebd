//! API-facing request/response models.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    BackoffPolicy, Preconditions, RetryPolicy, Schedule, SchedulerError, TaskPayload, TaskRequest,
    TaskScheduler, TaskState,
};
use crate::util::serde::{Priority, TaskId};

/// Wire form of a task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSubmission<P> {
    /// Opaque payload.
    pub payload: P,
    /// Priority.
    #[serde(default)]
    pub priority: Priority,
    /// Delay before the first run.
    #[serde(default)]
    pub initial_delay_ms: u64,
    /// Repeat period; absent for one-time tasks.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Flex window for periodic tasks.
    #[serde(default)]
    pub flex_ms: u64,
    /// Platform preconditions.
    #[serde(flatten)]
    pub preconditions: Preconditions,
    /// Retry formula.
    #[serde(default)]
    pub backoff_policy: BackoffPolicy,
    /// Base retry delay; absent means the configured default.
    #[serde(default)]
    pub backoff_delay_ms: Option<u64>,
    /// Exponential multiplier.
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
    /// Jitter fraction.
    #[serde(default)]
    pub backoff_jitter_factor: f64,
    /// Retry limit; absent means the configured default.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl<P: TaskPayload> TaskSubmission<P> {
    /// Convert into a [`TaskRequest`].
    pub fn into_request(self) -> TaskRequest<P> {
        let initial_delay = Duration::from_millis(self.initial_delay_ms);
        let schedule = match self.interval_ms {
            Some(interval) => Schedule::Periodic {
                interval: Duration::from_millis(interval),
                flex: Duration::from_millis(self.flex_ms),
                initial_delay,
            },
            None => Schedule::OneTime { initial_delay },
        };
        TaskRequest {
            payload: self.payload,
            schedule,
            priority: self.priority,
            preconditions: self.preconditions,
            retry: RetryPolicy {
                policy: self.backoff_policy,
                delay: self.backoff_delay_ms.map(Duration::from_millis),
                multiplier: self.backoff_multiplier,
                jitter_factor: self.backoff_jitter_factor,
                max_retries: self.max_retries,
            },
        }
    }
}

/// Task status response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    /// Task identifier.
    pub task_id: TaskId,
    /// Current state; `None` if the task does not exist.
    pub status: Option<TaskState>,
    /// Latest log message for failed or cancelled tasks.
    pub reason: Option<String>,
}

/// Health response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Registered payload type ids.
    pub payload_types: Vec<String>,
}

/// Submit a wire-form task and report its initial status.
pub async fn submit_task<P: TaskPayload>(
    scheduler: &TaskScheduler,
    submission: TaskSubmission<P>,
) -> Result<TaskStatusResponse, SchedulerError> {
    let task_id = scheduler.submit(submission.into_request()).await?;
    task_status(scheduler, task_id).await
}

/// Build the status response for `task_id`.
pub async fn task_status(
    scheduler: &TaskScheduler,
    task_id: TaskId,
) -> Result<TaskStatusResponse, SchedulerError> {
    let status = scheduler.get_status(task_id).await?;
    let reason = match status {
        Some(TaskState::Failed | TaskState::Cancelled) => scheduler
            .execution_log(task_id)
            .await?
            .pop()
            .and_then(|entry| entry.message),
        _ => None,
    };
    Ok(TaskStatusResponse {
        task_id,
        status,
        reason,
    })
}

/// Return a health payload.
pub fn health(scheduler: &TaskScheduler) -> Health {
    Health {
        ok: true,
        payload_types: scheduler.registry().registered_types(),
    }
}
