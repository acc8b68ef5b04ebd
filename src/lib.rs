//! # Prometheus Task Scheduler
//!
//! A durable, retry-aware background-task scheduler core.
//!
//! Given a unit of deferred work (a payload plus execution constraints), the
//! scheduler persists it, decides when it is eligible to run, guarantees at
//! most one active execution per task, classifies failures, computes retry
//! delays and recovers work orphaned by process death. The actual wake-up
//! mechanism is supplied by a thin platform adapter.
//!
//! ## Core Problem Solved
//!
//! Background work on devices and servers has to survive restarts and flaky
//! dependencies:
//!
//! - **Durability**: a task that was accepted must eventually run, even if the
//!   process dies between persisting it and arming its timer
//! - **Single execution**: two wake-ups for the same task must not run it twice
//!   concurrently
//! - **Retry policy**: transient failures back off (linear or exponential with
//!   jitter and a hard ceiling), permanent ones fail fast
//! - **Portability**: the same core drives OS job dispatchers, in-process timers
//!   and cron-style triggers
//!
//! ## Key Features
//!
//! - **Atomic claim**: `Enqueued -> Running` is a conditional store update and
//!   the only concurrency gate
//! - **Payload registry**: stable type ids, serde serialization, optional
//!   encryption at rest with a versioned envelope
//! - **Orphan watchdog**: re-arms due tasks the platform has forgotten
//! - **Status streams**: `observe_status` yields every state change
//! - **Pluggable collaborators**: store, platform adapter, telemetry sink and
//!   clock are traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use prometheus_task_scheduler::builders::SchedulerBuilder;
//! use prometheus_task_scheduler::core::{
//!     AttemptContext, TaskError, TaskPayload, TaskRequest, TaskResult, Worker,
//! };
//! use prometheus_task_scheduler::runtime::{run_dispatch_loop, TokioTimerScheduler};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct SyncContacts { account: String }
//!
//! impl TaskPayload for SyncContacts {
//!     const TYPE_ID: &'static str = "acme.contacts.sync.v1";
//! }
//!
//! struct ContactSync;
//!
//! #[async_trait]
//! impl Worker<SyncContacts> for ContactSync {
//!     async fn run(&self, job: SyncContacts, _ctx: AttemptContext) -> Result<TaskResult, TaskError> {
//!         Ok(TaskResult::Success)
//!     }
//! }
//!
//! let (timer, due) = TokioTimerScheduler::from_current()?;
//! let scheduler = Arc::new(
//!     SchedulerBuilder::new()
//!         .register::<SyncContacts, _>(ContactSync)?
//!         .with_platform(Arc::new(timer))
//!         .build()?,
//! );
//! let watchdog = scheduler.start_watchdog();
//! let token = CancellationToken::new();
//! tokio::spawn(run_dispatch_loop(scheduler.clone(), due, token.clone()));
//!
//! let id = scheduler.submit(TaskRequest::one_time(SyncContacts { account: "me".into() })).await?;
//! ```
//!
//! For complete scenarios, see:
//! - `tests/retry_scenarios_test.rs` - retry exhaustion and backoff
//! - `tests/scheduler_test.rs` - submit/cancel/reschedule/observe
//! - `tests/watchdog_test.rs` - orphan recovery
//! - `tests/tokio_timer_test.rs` - in-process timers end to end

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: task model, executor, retry engine, registry.
pub mod core;
/// Configuration models for the scheduler and its store backend.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for task stores and platform schedulers.
pub mod infra;
/// Runtime adapters (in-process timers) and API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
