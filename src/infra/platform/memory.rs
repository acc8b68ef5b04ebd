//! In-memory platform adapter recording arm/disarm calls.
//!
//! Nothing fires on its own: a test or host loop drains
//! [`InMemoryPlatformScheduler::take_all`] and calls `dispatch` itself.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{PlatformScheduler, Preconditions, SchedulerError};
use crate::util::serde::TaskId;

/// One live registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    /// Requested delay.
    pub delay: Duration,
    /// Requested preconditions.
    pub preconditions: Preconditions,
    /// Monotonic sequence number of the arm call.
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct State {
    armed: HashMap<TaskId, Registration>,
    arm_counts: HashMap<TaskId, u32>,
    next_sequence: u64,
}

/// Records registrations without any real wake-up mechanism.
#[derive(Debug, Default)]
pub struct InMemoryPlatformScheduler {
    state: Mutex<State>,
}

impl InMemoryPlatformScheduler {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live registration for `id`.
    pub fn registration(&self, id: TaskId) -> Option<Registration> {
        self.state.lock().armed.get(&id).copied()
    }

    /// How many times `id` was armed.
    pub fn arm_count(&self, id: TaskId) -> u32 {
        self.state.lock().arm_counts.get(&id).copied().unwrap_or(0)
    }

    /// Armed ids in arm order.
    pub fn armed(&self) -> Vec<TaskId> {
        let state = self.state.lock();
        let mut ids: Vec<(u64, TaskId)> = state.armed.iter().map(|(id, r)| (r.sequence, *id)).collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Remove and return every registration, as if all wake-ups fired.
    pub fn take_all(&self) -> Vec<TaskId> {
        let ids = self.armed();
        self.state.lock().armed.clear();
        ids
    }

    /// Drop a registration without a disarm call, simulating a host that
    /// lost it (e.g. after a reboot).
    pub fn forget(&self, id: TaskId) {
        self.state.lock().armed.remove(&id);
    }
}

#[async_trait]
impl PlatformScheduler for InMemoryPlatformScheduler {
    async fn arm(
        &self,
        task_id: TaskId,
        delay: Duration,
        preconditions: Preconditions,
    ) -> Result<Option<String>, SchedulerError> {
        let mut state = self.state.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.armed.insert(
            task_id,
            Registration {
                delay,
                preconditions,
                sequence,
            },
        );
        *state.arm_counts.entry(task_id).or_insert(0) += 1;
        Ok(Some(format!("memory-{task_id}")))
    }

    async fn disarm(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        self.state.lock().armed.remove(&task_id);
        Ok(())
    }

    async fn is_armed(&self, task_id: TaskId) -> Result<bool, SchedulerError> {
        Ok(self.state.lock().armed.contains_key(&task_id))
    }
}
