//! In-process timer adapter backed by tokio.
//!
//! Each armed task gets a sleeping tokio task; when it wakes, the task id is
//! pushed into a channel that [`run_dispatch_loop`] drains. Registrations do
//! not survive the process, which is what the orphan watchdog is for.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{PlatformScheduler, Preconditions, SchedulerError, TaskScheduler};
use crate::util::clock::duration_to_ms;
use crate::util::serde::TaskId;

struct Timer {
    generation: u64,
    join: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<TaskId, Timer>>>;

/// Tokio-based wake-up adapter.
pub struct TokioTimerScheduler {
    handle: Handle,
    timers: Timers,
    due_tx: mpsc::UnboundedSender<TaskId>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TokioTimerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioTimerScheduler")
            .field("armed", &self.timers.lock().len())
            .finish_non_exhaustive()
    }
}

impl TokioTimerScheduler {
    /// Create an adapter spawning timers on `handle`. The receiver yields
    /// task ids as their timers fire.
    pub fn new(handle: Handle) -> (Self, mpsc::UnboundedReceiver<TaskId>) {
        let (due_tx, due_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            handle,
            timers: Arc::new(Mutex::new(HashMap::new())),
            due_tx,
            generation: AtomicU64::new(0),
        };
        (scheduler, due_rx)
    }

    /// Create an adapter on the runtime of the calling task.
    pub fn from_current() -> Result<(Self, mpsc::UnboundedReceiver<TaskId>), SchedulerError> {
        let handle = Handle::try_current().map_err(|e| SchedulerError::Platform(e.to_string()))?;
        Ok(Self::new(handle))
    }

    /// Number of live timers.
    pub fn armed_count(&self) -> usize {
        self.timers.lock().len()
    }
}

impl Drop for TokioTimerScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.join.abort();
        }
    }
}

#[async_trait]
impl PlatformScheduler for TokioTimerScheduler {
    async fn arm(
        &self,
        task_id: TaskId,
        delay: Duration,
        preconditions: Preconditions,
    ) -> Result<Option<String>, SchedulerError> {
        if preconditions != Preconditions::default() {
            tracing::debug!(task_id = %task_id, ?preconditions, "in-process timers ignore preconditions");
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let due_tx = self.due_tx.clone();

        // Hold the map lock across spawn so a zero-delay timer cannot fire
        // before its entry exists.
        let mut guard = self.timers.lock();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut timers = timers.lock();
                match timers.get(&task_id) {
                    Some(timer) if timer.generation == generation => {
                        timers.remove(&task_id);
                    }
                    _ => return,
                }
            }
            if due_tx.send(task_id).is_err() {
                tracing::warn!(task_id = %task_id, "dispatch loop gone; wake-up dropped");
            }
        });
        if let Some(previous) = guard.insert(task_id, Timer { generation, join }) {
            previous.join.abort();
        }
        drop(guard);

        tracing::debug!(task_id = %task_id, delay_ms = duration_to_ms(delay), "timer armed");
        Ok(Some(format!("tokio-timer-{generation}")))
    }

    async fn disarm(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        if let Some(timer) = self.timers.lock().remove(&task_id) {
            timer.join.abort();
            tracing::debug!(task_id = %task_id, "timer disarmed");
        }
        Ok(())
    }

    async fn is_armed(&self, task_id: TaskId) -> Result<bool, SchedulerError> {
        Ok(self
            .timers
            .lock()
            .get(&task_id)
            .is_some_and(|timer| !timer.join.is_finished()))
    }
}

/// Drain fired timers and dispatch each task on its own tokio task until
/// `token` is cancelled or the channel closes.
pub async fn run_dispatch_loop(
    scheduler: Arc<TaskScheduler>,
    mut due: mpsc::UnboundedReceiver<TaskId>,
    token: CancellationToken,
) {
    loop {
        let id = tokio::select! {
            () = token.cancelled() => break,
            next = due.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            if let Err(err) = scheduler.dispatch(id).await {
                tracing::error!(task_id = %id, error = %err, "dispatch failed");
            }
        });
    }
    tracing::info!("dispatch loop stopped");
}
