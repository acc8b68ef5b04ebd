//! Lifecycle telemetry: event model and sink implementations.
//!
//! Sinks are best-effort. They are invoked synchronously on the executing
//! task, so they must not block; a panicking sink is contained by [`emit`]
//! and never changes a task outcome.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::serde::TaskId;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventKind {
    /// Task persisted and armed.
    Scheduled,
    /// Claim won; work unit about to run.
    Started,
    /// Work unit succeeded.
    Succeeded,
    /// Task reached `Failed`.
    Failed,
    /// Retry scheduled after a transient failure.
    RetryScheduled,
    /// Task cancelled by a caller.
    Cancelled,
    /// Task rescheduled under the same id.
    Rescheduled,
    /// Watchdog re-armed an orphaned task.
    OrphanRearmed,
    /// A watchdog tick failed.
    WatchdogTickFailed,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Started => "started",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RetryScheduled => "retry_scheduled",
            Self::Cancelled => "cancelled",
            Self::Rescheduled => "rescheduled",
            Self::OrphanRearmed => "orphan_rearmed",
            Self::WatchdogTickFailed => "watchdog_tick_failed",
        };
        f.write_str(s)
    }
}

/// Telemetry event structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// What happened.
    pub kind: TelemetryEventKind,
    /// Related task, if any.
    pub task_id: Option<TaskId>,
    /// Attempt number, when relevant.
    pub attempt: Option<u32>,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    pub detail: Option<String>,
}

/// Event-consuming callback.
pub trait TelemetrySink: Send + Sync {
    /// Record an event. Must not block.
    fn record(&self, event: TelemetryEvent);
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: TelemetryEvent) {}
}

/// In-memory sink with a bounded buffer, for testing and dev.
#[derive(Debug)]
pub struct InMemoryTelemetrySink {
    events: Mutex<VecDeque<TelemetryEvent>>,
    max_events: usize,
}

impl InMemoryTelemetrySink {
    /// Create a sink keeping at most `max_events`, dropping the oldest.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of stored events.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Stored events of one kind.
    pub fn events_of(&self, kind: TelemetryEventKind) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        if self.max_events == 0 {
            return;
        }
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink forwarding events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        tracing::debug!(
            target: "task_scheduler::telemetry",
            kind = %event.kind,
            task_id = ?event.task_id,
            attempt = ?event.attempt,
            detail = ?event.detail,
            "telemetry event"
        );
    }
}

/// Helper to build a telemetry event stamped at `now_ms`.
pub fn build_telemetry_event(
    kind: TelemetryEventKind,
    task_id: Option<TaskId>,
    attempt: Option<u32>,
    now_ms: u64,
    detail: Option<String>,
) -> TelemetryEvent {
    TelemetryEvent {
        kind,
        task_id,
        attempt,
        created_at_ms: now_ms,
        detail,
    }
}

/// Hand `event` to `sink`, containing any panic.
pub fn emit(sink: &dyn TelemetrySink, event: TelemetryEvent) {
    let kind = event.kind;
    if catch_unwind(AssertUnwindSafe(|| sink.record(event))).is_err() {
        tracing::warn!(kind = %kind, "telemetry sink panicked; event dropped");
    }
}
