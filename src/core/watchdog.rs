//! Orphan watchdog: re-arms due tasks the platform adapter has forgotten.
//!
//! A task becomes an orphan when the process dies between persisting it and
//! arming its wake-up, or when the host drops a registration.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::error::SchedulerError;
use super::platform::{arm_and_record, PlatformScheduler};
use super::store::TaskStore;
use super::telemetry::{build_telemetry_event, emit, TelemetryEventKind, TelemetrySink};
use crate::util::clock::Clock;

/// Periodic orphan scan.
pub struct OrphanWatchdog {
    store: Arc<dyn TaskStore>,
    platform: Arc<dyn PlatformScheduler>,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn TelemetrySink>,
    interval: Duration,
}

impl OrphanWatchdog {
    /// Create a watchdog ticking every `interval`. A zero interval disables it.
    pub fn new(
        store: Arc<dyn TaskStore>,
        platform: Arc<dyn PlatformScheduler>,
        clock: Arc<dyn Clock>,
        telemetry: Arc<dyn TelemetrySink>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            platform,
            clock,
            telemetry,
            interval,
        }
    }

    /// Tick period.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Scan once. Returns how many tasks were re-armed.
    ///
    /// A failure on one task is logged and does not stop the scan.
    ///
    /// # Errors
    /// Only if the due-task query itself fails.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        let now = self.clock.now_ms();
        let due = self.store.due(now).await?;
        let mut rearmed = 0;

        for record in due {
            match self.platform.is_armed(record.id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(task_id = %record.id, error = %err, "armed check failed");
                    continue;
                }
            }
            match arm_and_record(self.platform.as_ref(), self.store.as_ref(), &record, Duration::ZERO).await {
                Ok(()) => {
                    rearmed += 1;
                    tracing::info!(
                        task_id = %record.id,
                        overdue_ms = now.saturating_sub(record.next_run_time_ms),
                        "re-armed orphaned task"
                    );
                    emit(
                        self.telemetry.as_ref(),
                        build_telemetry_event(
                            TelemetryEventKind::OrphanRearmed,
                            Some(record.id),
                            None,
                            now,
                            None,
                        ),
                    );
                }
                Err(err) => {
                    tracing::warn!(task_id = %record.id, error = %err, "failed to re-arm orphaned task");
                }
            }
        }

        tracing::debug!(rearmed, "watchdog tick complete");
        Ok(rearmed)
    }

    /// Start ticking on the current tokio runtime.
    ///
    /// Returns `None` when the interval is zero. Tick errors and panics are
    /// contained per tick.
    pub fn spawn(self: Arc<Self>) -> Option<WatchdogHandle> {
        if self.interval.is_zero() {
            tracing::info!("orphan watchdog disabled");
            return None;
        }
        let token = CancellationToken::new();
        let child = token.child_token();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => self.guarded_tick().await,
                }
            }
            tracing::info!("orphan watchdog stopped");
        });
        Some(WatchdogHandle {
            guard: token.drop_guard(),
            join,
        })
    }

    async fn guarded_tick(&self) {
        let failure = match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(Ok(_)) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "watchdog tick panicked".to_string(),
        };
        tracing::error!(error = %failure, "watchdog tick failed");
        emit(
            self.telemetry.as_ref(),
            build_telemetry_event(
                TelemetryEventKind::WatchdogTickFailed,
                None,
                None,
                self.clock.now_ms(),
                Some(failure),
            ),
        );
    }
}

/// Handle to a running watchdog loop. Dropping it cancels the loop without
/// waiting for it to exit.
#[derive(Debug)]
pub struct WatchdogHandle {
    guard: DropGuard,
    join: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for it to exit, dropping its timer.
    pub async fn stop(self) {
        let Self { guard, join } = self;
        drop(guard);
        if let Err(err) = join.await {
            tracing::warn!(error = %err, "watchdog task ended abnormally");
        }
    }
}
