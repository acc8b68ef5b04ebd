//! Explicitly constructed, shared scheduler context.
//!
//! Replaces an ambient global store/registry: the application owns a
//! [`SchedulerContext`] (usually in a `static`) and every platform adapter
//! entry point resolves the scheduler through it.
//!
//! # Examples
//!
//! ```rust,ignore
//! use prometheus_task_scheduler::core::SchedulerContext;
//! use prometheus_task_scheduler::builders::SchedulerBuilder;
//!
//! static CONTEXT: SchedulerContext = SchedulerContext::new();
//!
//! let scheduler = CONTEXT.get_or_try_init(|| SchedulerBuilder::new().build())?;
//! ```

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use super::scheduler::TaskScheduler;

/// Lazily initialised holder of one shared [`TaskScheduler`].
///
/// The init closure runs at most once even under concurrent callers; the
/// guard is held only while it runs, never during task execution. A failed
/// init leaves the context empty so a later call can retry.
#[derive(Debug)]
pub struct SchedulerContext {
    scheduler: OnceLock<Arc<TaskScheduler>>,
    init_guard: Mutex<()>,
}

impl Default for SchedulerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerContext {
    /// Empty context, usable in a `static`.
    pub const fn new() -> Self {
        Self {
            scheduler: OnceLock::new(),
            init_guard: Mutex::new(()),
        }
    }

    /// The scheduler, if initialised.
    pub fn get(&self) -> Option<Arc<TaskScheduler>> {
        self.scheduler.get().cloned()
    }

    /// Whether [`SchedulerContext::get_or_try_init`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.scheduler.get().is_some()
    }

    /// Return the scheduler, building it with `init` on first use.
    pub fn get_or_try_init<F, E>(&self, init: F) -> Result<Arc<TaskScheduler>, E>
    where
        F: FnOnce() -> Result<TaskScheduler, E>,
    {
        if let Some(scheduler) = self.scheduler.get() {
            return Ok(Arc::clone(scheduler));
        }
        let _guard = self.init_guard.lock();
        if let Some(scheduler) = self.scheduler.get() {
            return Ok(Arc::clone(scheduler));
        }
        let built = Arc::new(init()?);
        tracing::info!("scheduler context initialised");
        Ok(Arc::clone(self.scheduler.get_or_init(|| built)))
    }
}
