//! Platform scheduler adapter contract.
//!
//! Adapters translate `arm`/`disarm` into whatever wake-up mechanism the
//! host offers (OS job dispatcher, in-process timer, cron trigger). When the
//! wake-up fires, the adapter calls back into
//! [`TaskScheduler::execute`](crate::core::TaskScheduler::execute).

use std::time::Duration;

use async_trait::async_trait;

use super::error::SchedulerError;
use super::store::TaskStore;
use super::task::{Preconditions, TaskRecord};
use crate::util::serde::TaskId;

/// Host wake-up mechanism.
#[async_trait]
pub trait PlatformScheduler: Send + Sync {
    /// Request a wake-up for `task_id` after `delay`, honoring
    /// `preconditions` where the host supports them. Re-arming replaces any
    /// existing registration.
    ///
    /// Returns an opaque handle for the registration, if the host has one.
    async fn arm(
        &self,
        task_id: TaskId,
        delay: Duration,
        preconditions: Preconditions,
    ) -> Result<Option<String>, SchedulerError>;

    /// Drop any registration for `task_id`. Disarming an unknown id is not an error.
    async fn disarm(&self, task_id: TaskId) -> Result<(), SchedulerError>;

    /// Whether a live registration exists for `task_id`.
    async fn is_armed(&self, task_id: TaskId) -> Result<bool, SchedulerError>;
}

/// Arm `record` after `delay` and persist the returned handle.
pub async fn arm_and_record(
    platform: &dyn PlatformScheduler,
    store: &dyn TaskStore,
    record: &TaskRecord,
    delay: Duration,
) -> Result<(), SchedulerError> {
    let platform_id = platform
        .arm(record.id, delay, record.spec.preconditions)
        .await?;
    if platform_id != record.platform_id {
        store.set_platform_id(record.id, platform_id).await?;
    }
    Ok(())
}
