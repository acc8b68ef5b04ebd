//! Caller-facing scheduler facade.
//!
//! [`TaskScheduler`] ties the normalizer, store, platform adapter, executor
//! and watchdog together. Construct it with
//! [`SchedulerBuilder`](crate::builders::SchedulerBuilder).

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::{Stream, StreamExt};

use super::error::SchedulerError;
use super::executor::{ExecutionOutcome, TaskExecutor};
use super::normalizer::{normalize, TaskRequest};
use super::platform::{arm_and_record, PlatformScheduler};
use super::registry::PayloadRegistry;
use super::status::StatusBroadcaster;
use super::store::{ReplaceOutcome, TaskStore};
use super::task::{ExecutionLogEntry, TaskRecord, TaskState, TaskSummary};
use super::telemetry::{build_telemetry_event, emit, TelemetryEventKind, TelemetrySink};
use super::watchdog::{OrphanWatchdog, WatchdogHandle};
use super::work::TaskPayload;
use crate::config::SchedulerConfig;
use crate::util::clock::Clock;
use crate::util::serde::TaskId;

/// Durable, retry-aware task scheduler.
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    registry: Arc<PayloadRegistry>,
    platform: Arc<dyn PlatformScheduler>,
    telemetry: Arc<dyn TelemetrySink>,
    clock: Arc<dyn Clock>,
    status: Arc<StatusBroadcaster>,
    executor: TaskExecutor,
    config: SchedulerConfig,
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    pub(crate) fn from_parts(
        store: Arc<dyn TaskStore>,
        registry: Arc<PayloadRegistry>,
        platform: Arc<dyn PlatformScheduler>,
        telemetry: Arc<dyn TelemetrySink>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        rng_seed: Option<u64>,
    ) -> Self {
        let status = Arc::new(StatusBroadcaster::new());
        let executor = TaskExecutor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&clock),
            Arc::clone(&telemetry),
            Arc::clone(&status),
            config.max_backoff_ms,
        );
        let executor = match rng_seed {
            Some(seed) => executor.with_rng_seed(seed),
            None => executor,
        };
        Self {
            store,
            registry,
            platform,
            telemetry,
            clock,
            status,
            executor,
            config,
        }
    }

    /// Persist `request` and arm its first wake-up.
    ///
    /// A failure to arm is logged, not returned: the task is already durable
    /// and the orphan watchdog will pick it up once it is due.
    pub async fn submit<P: TaskPayload>(&self, request: TaskRequest<P>) -> Result<TaskId, SchedulerError> {
        let now = self.clock.now_ms();
        let normalized = normalize(&request, &self.registry, now, &self.config)?;
        let record = TaskRecord::new(TaskId::new(), normalized.spec, normalized.next_run_time_ms, now);
        let id = record.id;
        self.store.insert(record.clone()).await?;
        self.publish_status(id).await;

        tracing::info!(
            task_id = %id,
            payload_type = %record.spec.payload_type_id,
            schedule = ?record.spec.schedule_type,
            next_run_time_ms = record.next_run_time_ms,
            "task scheduled"
        );
        self.notify(TelemetryEventKind::Scheduled, id, None);
        self.arm(&record, now).await;
        Ok(id)
    }

    /// Cancel one task.
    ///
    /// Returns `false` when the task is already terminal. A running work unit
    /// is not interrupted; its result is discarded when it arrives.
    pub async fn cancel(&self, id: TaskId) -> Result<bool, SchedulerError> {
        if self.store.get(id).await?.is_none() {
            return Err(SchedulerError::NotFound(id));
        }
        let now = self.clock.now_ms();
        let affected = self
            .store
            .transition(id, &TaskState::CANCELLABLE, TaskState::Cancelled, now)
            .await?;
        if affected == 0 {
            tracing::debug!(task_id = %id, "cancel ignored; task already terminal");
            return Ok(false);
        }
        self.after_cancel(id).await;
        Ok(true)
    }

    /// Cancel every enqueued or running task. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> Result<usize, SchedulerError> {
        let now = self.clock.now_ms();
        let ids = self
            .store
            .transition_all(&TaskState::CANCELLABLE, TaskState::Cancelled, now)
            .await?;
        for id in &ids {
            self.after_cancel(*id).await;
        }
        tracing::info!(cancelled = ids.len(), "cancelled all tasks");
        Ok(ids.len())
    }

    /// Current state, or `None` for an unknown id.
    pub async fn get_status(&self, id: TaskId) -> Result<Option<TaskState>, SchedulerError> {
        Ok(self.store.get(id).await?.map(|r| r.state))
    }

    /// Every task, High priority first, then by next run time and creation.
    pub async fn list_tasks(&self) -> Result<Vec<TaskSummary>, SchedulerError> {
        let mut records = self.store.list().await?;
        records.sort_by_key(|r| (Reverse(r.spec.priority), r.next_run_time_ms, r.created_at_ms));
        let mut summaries = Vec::with_capacity(records.len());
        for record in &records {
            let last = self.store.last_log(record.id).await?;
            summaries.push(record.summary(last.and_then(|e| e.message)));
        }
        Ok(summaries)
    }

    /// Replace payload, schedule, preconditions and retry policy of `id`,
    /// keeping its identity, and re-arm it.
    ///
    /// # Errors
    /// [`SchedulerError::NotFound`] for unknown ids,
    /// [`SchedulerError::TaskRunning`] while the task executes.
    pub async fn reschedule<P: TaskPayload>(
        &self,
        id: TaskId,
        request: TaskRequest<P>,
    ) -> Result<TaskId, SchedulerError> {
        let now = self.clock.now_ms();
        let normalized = normalize(&request, &self.registry, now, &self.config)?;
        match self
            .store
            .replace_spec(id, normalized.spec, normalized.next_run_time_ms, now)
            .await?
        {
            ReplaceOutcome::Replaced => {}
            ReplaceOutcome::NotFound => return Err(SchedulerError::NotFound(id)),
            ReplaceOutcome::Running => return Err(SchedulerError::TaskRunning(id)),
        }
        let record = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;

        tracing::info!(task_id = %id, next_run_time_ms = record.next_run_time_ms, "task rescheduled");
        self.publish_status(id).await;
        self.notify(TelemetryEventKind::Rescheduled, id, None);
        self.arm(&record, now).await;
        Ok(id)
    }

    /// Stream of state changes for `id`, starting with its current state.
    ///
    /// The stream never ends on its own; drop it to unsubscribe. Each call
    /// returns an independent subscription.
    pub async fn observe_status(
        &self,
        id: TaskId,
    ) -> Result<impl Stream<Item = TaskState> + Send + Unpin + 'static, SchedulerError> {
        let current = self
            .store
            .get(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?
            .state;
        let stream = self.status.subscribe(id, Some(current));
        self.status.refresh(id, self.store.as_ref()).await?;
        Ok(stream.filter_map(|state| state))
    }

    /// Run one execution cycle. Called by platform adapters on wake-up.
    pub async fn execute(&self, id: TaskId) -> Result<Option<ExecutionOutcome>, SchedulerError> {
        self.executor.execute(id).await
    }

    /// [`TaskScheduler::execute`], then re-arm or disarm according to the outcome.
    pub async fn dispatch(&self, id: TaskId) -> Result<Option<ExecutionOutcome>, SchedulerError> {
        let outcome = self.execute(id).await?;
        match &outcome {
            Some(ExecutionOutcome::ScheduleNextActivation {
                task_id,
                spec,
                delay,
            }) => match self.platform.arm(*task_id, *delay, spec.preconditions).await {
                Ok(platform_id) => self.store.set_platform_id(*task_id, platform_id).await?,
                Err(err) => {
                    tracing::warn!(task_id = %task_id, error = %err, "re-arm failed; left for watchdog");
                }
            },
            Some(_) => {
                if let Err(err) = self.platform.disarm(id).await {
                    tracing::warn!(task_id = %id, error = %err, "disarm failed");
                }
            }
            None => {}
        }
        Ok(outcome)
    }

    /// Execution log of `id` in insertion order.
    pub async fn execution_log(&self, id: TaskId) -> Result<Vec<ExecutionLogEntry>, SchedulerError> {
        self.store.logs(id).await
    }

    /// Orphan watchdog sharing this scheduler's collaborators.
    pub fn watchdog(&self) -> OrphanWatchdog {
        OrphanWatchdog::new(
            Arc::clone(&self.store),
            Arc::clone(&self.platform),
            Arc::clone(&self.clock),
            Arc::clone(&self.telemetry),
            Duration::from_millis(self.config.watchdog_interval_ms),
        )
    }

    /// Spawn the watchdog loop; `None` when `watchdog_interval_ms` is zero.
    pub fn start_watchdog(&self) -> Option<WatchdogHandle> {
        Arc::new(self.watchdog()).spawn()
    }

    /// Active configuration.
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Payload registry.
    pub fn registry(&self) -> &PayloadRegistry {
        &self.registry
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Platform adapter.
    pub fn platform(&self) -> &Arc<dyn PlatformScheduler> {
        &self.platform
    }

    async fn arm(&self, record: &TaskRecord, now: u64) {
        let delay = Duration::from_millis(record.delay_from(now));
        if let Err(err) = arm_and_record(self.platform.as_ref(), self.store.as_ref(), record, delay).await {
            tracing::warn!(task_id = %record.id, error = %err, "arm failed; left for watchdog");
        }
    }

    async fn after_cancel(&self, id: TaskId) {
        if let Err(err) = self.platform.disarm(id).await {
            tracing::warn!(task_id = %id, error = %err, "disarm failed");
        }
        tracing::info!(task_id = %id, "task cancelled");
        self.publish_status(id).await;
        self.notify(TelemetryEventKind::Cancelled, id, None);
    }

    async fn publish_status(&self, id: TaskId) {
        if let Err(err) = self.status.refresh(id, self.store.as_ref()).await {
            tracing::warn!(task_id = %id, error = %err, "status refresh failed");
        }
    }

    fn notify(&self, kind: TelemetryEventKind, id: TaskId, detail: Option<String>) {
        emit(
            self.telemetry.as_ref(),
            build_telemetry_event(kind, Some(id), None, self.clock.now_ms(), detail),
        );
    }
}
