//! Work-unit traits, payload abstraction and the work-unit result model.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::serde::TaskId;

/// A serializable payload bound to a stable type id.
///
/// The type id is persisted with every task and is how the registry finds
/// the worker again after a restart, so it must never change for a given
/// payload shape. Convention: `{namespace}.{domain}.{action}.v{major}`.
///
/// ```rust,ignore
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct SyncContacts { account: String }
///
/// impl TaskPayload for SyncContacts {
///     const TYPE_ID: &'static str = "acme.contacts.sync.v1";
/// }
/// ```
pub trait TaskPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier persisted alongside the serialized payload.
    const TYPE_ID: &'static str;
}

/// Execution context handed to a work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// Task being executed.
    pub task_id: TaskId,
    /// 1-based claim number (`run_attempt_count` after the claim).
    pub attempt_number: u32,
    /// Consecutive retries that led to this attempt.
    pub retry_count: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl AttemptContext {
    /// Whether a transient failure on this attempt would still be retried.
    pub const fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Errors a work unit can report.
///
/// The variant drives classification and, for rate limits and open circuit
/// breakers, the base delay of the next retry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// Connectivity failure.
    #[error("network error: {0}")]
    Network(String),
    /// Remote side asked us to slow down.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Description.
        message: String,
        /// Server-suggested wait before retrying.
        retry_after_ms: Option<u64>,
    },
    /// The work unit gave up waiting.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Remote service is down or overloaded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Lock or resource held by someone else.
    #[error("resource contention: {0}")]
    ResourceContention(String),
    /// A circuit breaker is open.
    #[error("circuit breaker open: {message}")]
    CircuitOpen {
        /// Description.
        message: String,
        /// Epoch millis at which the breaker half-opens.
        open_until_ms: u64,
    },
    /// Synthesized by the executor when retries run out.
    #[error("max retries exceeded after {attempts} attempts (limit {max_retries} retries)")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Configured retry limit.
        max_retries: u32,
    },
    /// Failure that retrying cannot fix.
    #[error("permanent failure: {0}")]
    Permanent(String),
    /// Input rejected by validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Anything else. Treated as retryable.
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Shorthand for [`TaskError::Other`].
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Whether a failure should be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retry subject to the backoff policy and retry limit.
    Transient,
    /// Fail the task now.
    Permanent,
}

/// Result produced by one invocation of a work unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// The work is done.
    Success,
    /// Run again later without reporting an error.
    Retry,
    /// The work failed.
    Failure {
        /// Retry or give up.
        kind: FailureKind,
        /// What went wrong.
        error: TaskError,
    },
}

impl TaskResult {
    /// Transient failure.
    pub const fn transient(error: TaskError) -> Self {
        Self::Failure {
            kind: FailureKind::Transient,
            error,
        }
    }

    /// Permanent failure.
    pub const fn permanent(error: TaskError) -> Self {
        Self::Failure {
            kind: FailureKind::Permanent,
            error,
        }
    }

    /// Convert an error raised by a work unit, classifying retryability.
    pub fn from_error(error: TaskError) -> Self {
        if crate::core::retry::is_retryable(&error) {
            Self::transient(error)
        } else {
            Self::permanent(error)
        }
    }
}

/// Business logic for one payload type.
///
/// Errors returned with `?` are classified like thrown exceptions: retryable
/// categories become transient failures, permanent/validation errors fail
/// the task.
///
/// # Example
///
/// ```rust,ignore
/// struct ContactSyncWorker;
///
/// #[async_trait]
/// impl Worker<SyncContacts> for ContactSyncWorker {
///     async fn run(&self, payload: SyncContacts, ctx: AttemptContext) -> Result<TaskResult, TaskError> {
///         sync(&payload.account).await.map_err(|e| TaskError::Network(e.to_string()))?;
///         Ok(TaskResult::Success)
///     }
/// }
/// ```
#[async_trait]
pub trait Worker<P: TaskPayload>: Send + Sync + 'static {
    /// Execute the payload.
    async fn run(&self, payload: P, ctx: AttemptContext) -> Result<TaskResult, TaskError>;
}

/// Type-erased, ready-to-run work unit produced by the registry factory.
#[async_trait]
pub trait WorkUnit: Send {
    /// Run once, consuming the bound payload.
    async fn run(self: Box<Self>, ctx: AttemptContext) -> Result<TaskResult, TaskError>;
}
