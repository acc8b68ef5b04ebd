//! Task executor: claim, run, classify, persist.
//!
//! One call to [`TaskExecutor::execute`] is one execution cycle. The claim
//! and the post-execution update are two separate store transactions; the
//! work unit runs between them without holding any lock.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::error::SchedulerError;
use super::registry::PayloadRegistry;
use super::retry::{self, Backoff};
use super::status::StatusBroadcaster;
use super::store::{Completion, TaskStore};
use super::task::{ExecutionLogEntry, ResultKind, TaskRecord, TaskSpec, TaskState};
use super::telemetry::{build_telemetry_event, emit, TelemetryEventKind, TelemetrySink};
use super::work::{AttemptContext, FailureKind, TaskError, TaskResult};
use crate::util::clock::Clock;
use crate::util::serde::TaskId;

/// What the platform adapter should do after an execution cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Task finished successfully; nothing to re-arm.
    TerminalSuccess,
    /// Task failed for good; nothing to re-arm.
    TerminalFailure,
    /// Task is `Enqueued` again; arm a wake-up after `delay`.
    ScheduleNextActivation {
        /// Task to re-arm.
        task_id: TaskId,
        /// Persisted task description (preconditions included).
        spec: TaskSpec,
        /// Delay until the next run.
        delay: Duration,
    },
}

impl ExecutionOutcome {
    /// Whether the task reached a terminal state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::TerminalSuccess | Self::TerminalFailure)
    }
}

struct Decision {
    completion: Completion,
    result_kind: ResultKind,
    message: String,
    event: TelemetryEventKind,
    outcome: ExecutionOutcome,
}

/// Runs execution cycles against a shared store.
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    registry: Arc<PayloadRegistry>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    status: Arc<StatusBroadcaster>,
    max_backoff_ms: u64,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("registry", &self.registry)
            .field("max_backoff_ms", &self.max_backoff_ms)
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    /// Create an executor.
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<PayloadRegistry>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<dyn TelemetrySink>,
        status: Arc<StatusBroadcaster>,
        max_backoff_ms: u64,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            telemetry,
            status,
            max_backoff_ms,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Seed the jitter/flex draws for reproducible runs.
    #[must_use]
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Run one execution cycle for `id`.
    ///
    /// Returns `Ok(None)` when the claim was lost (already running, not
    /// enqueued, or unknown id) or when the task was cancelled while the work
    /// unit ran and its result was discarded.
    ///
    /// # Errors
    /// Store failures during claim or update, and registry failures (the task
    /// is marked `Failed` before the error is returned). Work-unit errors and
    /// panics are never returned; they are classified and logged.
    pub async fn execute(&self, id: TaskId) -> Result<Option<ExecutionOutcome>, SchedulerError> {
        let Some(record) = self.store.claim(id, self.clock.now_ms()).await? else {
            tracing::debug!(task_id = %id, "claim lost; skipping execution");
            return Ok(None);
        };
        let attempt = record.run_attempt_count;
        tracing::info!(
            task_id = %id,
            attempt,
            payload_type = %record.spec.payload_type_id,
            "task claimed"
        );
        self.publish_status(id).await;
        self.notify(TelemetryEventKind::Started, id, attempt, None);

        let unit = match self
            .registry
            .instantiate(&record.spec.payload_type_id, &record.spec.payload_data)
        {
            Ok(unit) => unit,
            Err(err) => {
                tracing::error!(task_id = %id, error = %err, "payload unavailable; failing task");
                let now = self.clock.now_ms();
                let completion = Completion {
                    claimed_attempt: record.run_attempt_count,
                    state: TaskState::Failed,
                    next_run_time_ms: None,
                    retry_count: record.retry_count,
                    updated_at_ms: now,
                };
                let entry = log_entry(id, now, ResultKind::PayloadUnavailable, attempt, err.to_string());
                if self.store.complete(id, completion, entry).await? {
                    self.publish_status(id).await;
                    self.notify(TelemetryEventKind::Failed, id, attempt, Some(err.to_string()));
                }
                return Err(err.into());
            }
        };

        let ctx = AttemptContext {
            task_id: id,
            attempt_number: attempt,
            retry_count: record.retry_count,
            max_retries: record.spec.max_retries,
        };
        let result = match AssertUnwindSafe(unit.run(ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => TaskResult::from_error(err),
            Err(panic) => TaskResult::transient(TaskError::Other(format!(
                "work unit panicked: {}",
                panic_message(&*panic)
            ))),
        };

        let now = self.clock.now_ms();
        let decision = self.decide(&record, result, now);
        let entry = log_entry(id, now, decision.result_kind, attempt, decision.message.clone());
        if !self.store.complete(id, decision.completion, entry).await? {
            tracing::info!(task_id = %id, attempt, "task left running state during execution; result discarded");
            return Ok(None);
        }

        tracing::info!(
            task_id = %id,
            attempt,
            result = %decision.result_kind,
            state = %decision.completion.state,
            "{}",
            decision.message
        );
        self.publish_status(id).await;
        self.notify(decision.event, id, attempt, Some(decision.message));
        Ok(Some(decision.outcome))
    }

    fn decide(&self, record: &TaskRecord, result: TaskResult, now: u64) -> Decision {
        let spec = &record.spec;
        let (error, kind) = match result {
            TaskResult::Success => return self.on_success(record, now),
            TaskResult::Retry => (None, FailureKind::Transient),
            TaskResult::Failure { kind, error } => (Some(error), kind),
        };
        let reason = error.as_ref().map_or_else(
            || "retry requested".to_string(),
            |e| format!("[{}] {e}", retry::classify(e)),
        );

        if kind == FailureKind::Permanent {
            return failed(record, now, ResultKind::FailedPermanent, reason);
        }

        if record.retry_count >= spec.max_retries {
            let exhausted = TaskError::MaxRetriesExceeded {
                attempts: record.run_attempt_count,
                max_retries: spec.max_retries,
            };
            return failed(
                record,
                now,
                ResultKind::FailedRetriesExhausted,
                format!("{exhausted}; last failure: {reason}"),
            );
        }

        let retry = record.retry_count + 1;
        let base = error
            .as_ref()
            .and_then(|e| retry::suggested_base_delay_ms(e, now))
            .unwrap_or(spec.backoff_delay_ms);
        let delay_ms = Backoff::from_spec(spec, self.max_backoff_ms)
            .with_base_delay(base)
            .delay_for_with(&mut *self.rng.lock(), retry);

        Decision {
            completion: Completion {
                claimed_attempt: record.run_attempt_count,
                state: TaskState::Enqueued,
                next_run_time_ms: Some(now.saturating_add(delay_ms)),
                retry_count: retry,
                updated_at_ms: now,
            },
            result_kind: ResultKind::RetryScheduled,
            message: format!(
                "retry {retry}/{} in {delay_ms}ms after {reason}",
                spec.max_retries
            ),
            event: TelemetryEventKind::RetryScheduled,
            outcome: ExecutionOutcome::ScheduleNextActivation {
                task_id: record.id,
                spec: spec.clone(),
                delay: Duration::from_millis(delay_ms),
            },
        }
    }

    fn on_success(&self, record: &TaskRecord, now: u64) -> Decision {
        let spec = &record.spec;
        if !spec.is_periodic() {
            return Decision {
                completion: Completion {
                    claimed_attempt: record.run_attempt_count,
                    state: TaskState::Succeeded,
                    next_run_time_ms: None,
                    retry_count: record.retry_count,
                    updated_at_ms: now,
                },
                result_kind: ResultKind::Succeeded,
                message: "succeeded".into(),
                event: TelemetryEventKind::Succeeded,
                outcome: ExecutionOutcome::TerminalSuccess,
            };
        }

        let next =
            retry::periodic_next_run_with(&mut *self.rng.lock(), now, spec.interval_ms, spec.flex_ms);
        let delay_ms = next - now;
        Decision {
            completion: Completion {
                claimed_attempt: record.run_attempt_count,
                state: TaskState::Enqueued,
                next_run_time_ms: Some(next),
                retry_count: 0,
                updated_at_ms: now,
            },
            result_kind: ResultKind::Succeeded,
            message: format!("succeeded; next run in {delay_ms}ms"),
            event: TelemetryEventKind::Succeeded,
            outcome: ExecutionOutcome::ScheduleNextActivation {
                task_id: record.id,
                spec: spec.clone(),
                delay: Duration::from_millis(delay_ms),
            },
        }
    }

    async fn publish_status(&self, id: TaskId) {
        if let Err(err) = self.status.refresh(id, self.store.as_ref()).await {
            tracing::warn!(task_id = %id, error = %err, "status refresh failed");
        }
    }

    fn notify(&self, kind: TelemetryEventKind, id: TaskId, attempt: u32, detail: Option<String>) {
        emit(
            self.telemetry.as_ref(),
            build_telemetry_event(kind, Some(id), Some(attempt), self.clock.now_ms(), detail),
        );
    }
}

fn failed(record: &TaskRecord, now: u64, result_kind: ResultKind, message: String) -> Decision {
    Decision {
        completion: Completion {
            claimed_attempt: record.run_attempt_count,
            state: TaskState::Failed,
            next_run_time_ms: None,
            retry_count: record.retry_count,
            updated_at_ms: now,
        },
        result_kind,
        message,
        event: TelemetryEventKind::Failed,
        outcome: ExecutionOutcome::TerminalFailure,
    }
}

fn log_entry(
    task_id: TaskId,
    now: u64,
    result_kind: ResultKind,
    attempt_number: u32,
    message: String,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        task_id,
        created_at_ms: now,
        result_kind,
        attempt_number,
        message: Some(message),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
