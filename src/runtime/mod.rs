//! Runtime adapters (in-process tokio timers) and API surface.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_timer;

pub use api::{health, submit_task, task_status, Health, TaskStatusResponse, TaskSubmission};
#[cfg(feature = "tokio-runtime")]
pub use tokio_timer::{run_dispatch_loop, TokioTimerScheduler};
