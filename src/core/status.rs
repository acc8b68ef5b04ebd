//! Per-task state broadcasting backing `observe_status`.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use super::error::SchedulerError;
use super::store::TaskStore;
use super::task::TaskState;
use crate::util::serde::TaskId;

/// Fan-out of state changes, one watch channel per task id.
///
/// Each subscriber gets its own stream that starts with the latest known
/// state and then yields every change it observes. Slow subscribers only
/// see the most recent state.
///
/// Channels of tasks in a terminal state are dropped once nobody observes
/// them; a later subscription reseeds from the store.
#[derive(Debug, Default)]
pub struct StatusBroadcaster {
    channels: Mutex<HashMap<TaskId, watch::Sender<Option<TaskState>>>>,
    refresh: tokio::sync::Mutex<()>,
}

impl StatusBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `state` for `id`. Subscribers are only woken when the state
    /// differs from the last one published.
    pub fn publish(&self, id: TaskId, state: TaskState) {
        let mut channels = self.channels.lock();
        if state.is_terminal() {
            if let Some(tx) = channels.get(&id) {
                send_if_changed(tx, state);
            }
            channels.retain(|_, tx| tx.receiver_count() > 0 || !is_finished(tx));
            return;
        }
        match channels.get(&id) {
            Some(tx) => send_if_changed(tx, state),
            None => {
                let (tx, _rx) = watch::channel(Some(state));
                channels.insert(id, tx);
            }
        }
    }

    /// Re-read `id` from `store` and publish what it holds.
    ///
    /// Refreshes are serialized, so the last refresh after a store mutation
    /// always publishes that mutation's state, whatever order concurrent
    /// callers finish in.
    pub async fn refresh(&self, id: TaskId, store: &dyn TaskStore) -> Result<Option<TaskState>, SchedulerError> {
        let _serial = self.refresh.lock().await;
        let state = store.get(id).await?.map(|r| r.state);
        if let Some(state) = state {
            self.publish(id, state);
        }
        Ok(state)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    /// Whether no channel is live.
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Subscribe to `id`, seeding the channel with `current` if nothing
    /// has been published yet.
    pub fn subscribe(&self, id: TaskId, current: Option<TaskState>) -> WatchStream<Option<TaskState>> {
        let mut channels = self.channels.lock();
        let tx = channels
            .entry(id)
            .or_insert_with(|| watch::channel(current).0);
        WatchStream::new(tx.subscribe())
    }
}

fn send_if_changed(tx: &watch::Sender<Option<TaskState>>, state: TaskState) {
    tx.send_if_modified(|current| {
        let changed = *current != Some(state);
        *current = Some(state);
        changed
    });
}

fn is_finished(tx: &watch::Sender<Option<TaskState>>) -> bool {
    tx.borrow().is_some_and(TaskState::is_terminal)
}
