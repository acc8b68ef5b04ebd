//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use prometheus_task_scheduler::builders::SchedulerBuilder;
use prometheus_task_scheduler::config::SchedulerConfig;
use prometheus_task_scheduler::core::{
    AttemptContext, InMemoryTelemetrySink, PayloadCipher, RegistryError, TaskError, TaskPayload,
    TaskResult, TaskScheduler, Worker,
};
use prometheus_task_scheduler::infra::InMemoryPlatformScheduler;
use prometheus_task_scheduler::util::clock::ManualClock;

/// Start time of every manual clock.
pub const START_MS: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
}

impl TaskPayload for Job {
    const TYPE_ID: &'static str = "test.jobs.job.v1";
}

pub fn job(name: &str) -> Job {
    Job { name: name.into() }
}

/// Decides the result of call number `n` (1-based).
pub type Script = fn(u32) -> Result<TaskResult, TaskError>;

/// Worker whose results follow a script and that records every payload.
pub struct ScriptedWorker {
    pub calls: Arc<AtomicU32>,
    pub seen: Arc<Mutex<Vec<(String, AttemptContext)>>>,
    pub script: Script,
}

#[async_trait]
impl Worker<Job> for ScriptedWorker {
    async fn run(&self, payload: Job, ctx: AttemptContext) -> Result<TaskResult, TaskError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push((payload.name, ctx));
        (self.script)(n)
    }
}

/// Worker that signals `started` and then waits for `release`.
pub struct GatedWorker {
    pub calls: Arc<AtomicU32>,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl Worker<Job> for GatedWorker {
    async fn run(&self, _payload: Job, _ctx: AttemptContext) -> Result<TaskResult, TaskError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        self.release.notified().await;
        Ok(TaskResult::Success)
    }
}

/// Byte-wise XOR; enough to prove the payload is not stored in clear.
pub struct XorCipher(pub u8);

impl PayloadCipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, RegistryError> {
        Ok(plaintext.iter().map(|b| b ^ self.0).collect())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, RegistryError> {
        self.encrypt(ciphertext)
    }
}

pub fn always_succeed(_: u32) -> Result<TaskResult, TaskError> {
    Ok(TaskResult::Success)
}

pub fn always_offline(_: u32) -> Result<TaskResult, TaskError> {
    Ok(TaskResult::transient(TaskError::Network("offline".into())))
}

/// A scheduler wired to a manual clock, recording platform and telemetry.
pub struct Harness {
    pub scheduler: Arc<TaskScheduler>,
    pub clock: Arc<ManualClock>,
    pub platform: Arc<InMemoryPlatformScheduler>,
    pub telemetry: Arc<InMemoryTelemetrySink>,
    pub calls: Arc<AtomicU32>,
    pub seen: Arc<Mutex<Vec<(String, AttemptContext)>>>,
}

impl Harness {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn harness(script: Script) -> Harness {
    harness_with(SchedulerConfig::default(), script, |b| b)
}

pub fn harness_with(
    config: SchedulerConfig,
    script: Script,
    customize: impl FnOnce(SchedulerBuilder) -> SchedulerBuilder,
) -> Harness {
    let clock = Arc::new(ManualClock::new(START_MS));
    let platform = Arc::new(InMemoryPlatformScheduler::new());
    let telemetry = Arc::new(InMemoryTelemetrySink::new(1_000));
    let calls = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));

    let builder = SchedulerBuilder::new()
        .with_config(config)
        .register::<Job, _>(ScriptedWorker {
            calls: Arc::clone(&calls),
            seen: Arc::clone(&seen),
            script,
        })
        .unwrap()
        .with_clock(clock.clone())
        .with_platform(platform.clone())
        .with_telemetry(telemetry.clone())
        .with_rng_seed(7);
    let scheduler = customize(builder).build().unwrap();

    Harness {
        scheduler: Arc::new(scheduler),
        clock,
        platform,
        telemetry,
        calls,
        seen,
    }
}

/// Scheduler whose worker blocks until released.
pub struct GatedHarness {
    pub scheduler: Arc<TaskScheduler>,
    pub platform: Arc<InMemoryPlatformScheduler>,
    pub telemetry: Arc<InMemoryTelemetrySink>,
    pub calls: Arc<AtomicU32>,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub fn gated_harness() -> GatedHarness {
    let platform = Arc::new(InMemoryPlatformScheduler::new());
    let telemetry = Arc::new(InMemoryTelemetrySink::new(1_000));
    let calls = Arc::new(AtomicU32::new(0));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let scheduler = SchedulerBuilder::new()
        .register::<Job, _>(GatedWorker {
            calls: Arc::clone(&calls),
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        })
        .unwrap()
        .with_clock(Arc::new(ManualClock::new(START_MS)))
        .with_platform(platform.clone())
        .with_telemetry(telemetry.clone())
        .build()
        .unwrap();

    GatedHarness {
        scheduler: Arc::new(scheduler),
        platform,
        telemetry,
        calls,
        started,
        release,
    }
}
