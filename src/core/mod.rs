//! Core scheduling abstractions: task model, retry engine, payload registry,
//! executor, watchdog and the scheduler facade.

pub mod context;
pub mod error;
pub mod executor;
pub mod normalizer;
pub mod platform;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod watchdog;
pub mod work;

pub use context::SchedulerContext;
pub use error::{AppResult, RegistryError, SchedulerError};
pub use executor::{ExecutionOutcome, TaskExecutor};
pub use normalizer::{normalize, NormalizedRecord, RetryPolicy, Schedule, TaskRequest};
pub use platform::{arm_and_record, PlatformScheduler};
pub use registry::{PayloadCipher, PayloadRegistry, SerializedPayload};
pub use retry::{calculate_delay, classify, is_retryable, Backoff, ErrorCategory};
pub use scheduler::TaskScheduler;
pub use status::StatusBroadcaster;
pub use store::{Completion, ReplaceOutcome, TaskStore};
pub use task::{
    BackoffPolicy, ExecutionLogEntry, Preconditions, ResultKind, ScheduleType, TaskRecord,
    TaskSpec, TaskState, TaskSummary,
};
pub use telemetry::{
    build_telemetry_event, InMemoryTelemetrySink, NoopTelemetrySink, TelemetryEvent,
    TelemetryEventKind, TelemetrySink, TracingTelemetrySink,
};
pub use watchdog::{OrphanWatchdog, WatchdogHandle};
pub use work::{
    AttemptContext, FailureKind, TaskError, TaskPayload, TaskResult, WorkUnit, Worker,
};
