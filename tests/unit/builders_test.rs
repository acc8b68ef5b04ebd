//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use prometheus_task_scheduler::builders::SchedulerBuilder;
use prometheus_task_scheduler::config::{SchedulerConfig, StoreBackendConfig};
use prometheus_task_scheduler::core::{
    AttemptContext, RegistryError, SchedulerError, TaskError, TaskPayload, TaskRequest,
    TaskResult, Worker,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Resize {
    width: u32,
}

impl TaskPayload for Resize {
    const TYPE_ID: &'static str = "test.images.resize.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Purge;

impl TaskPayload for Purge {
    const TYPE_ID: &'static str = "test.cache.purge.v1";
}

struct Noop;

#[async_trait]
impl Worker<Resize> for Noop {
    async fn run(&self, _: Resize, _: AttemptContext) -> Result<TaskResult, TaskError> {
        Ok(TaskResult::Success)
    }
}

#[async_trait]
impl Worker<Purge> for Noop {
    async fn run(&self, _: Purge, _: AttemptContext) -> Result<TaskResult, TaskError> {
        Ok(TaskResult::Success)
    }
}

#[test]
fn test_scheduler_builder_defaults() {
    let scheduler = SchedulerBuilder::new().build().unwrap();
    assert_eq!(scheduler.config(), &SchedulerConfig::default());
    assert!(scheduler.registry().registered_types().is_empty());
    assert!(!scheduler.registry().has_cipher());
}

#[test]
fn test_register_lists_types_sorted() {
    let scheduler = SchedulerBuilder::new()
        .register::<Resize, _>(Noop)
        .unwrap()
        .register::<Purge, _>(Noop)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(
        scheduler.registry().registered_types(),
        vec![Purge::TYPE_ID.to_string(), Resize::TYPE_ID.to_string()]
    );
    assert!(scheduler.registry().is_registered(Resize::TYPE_ID));
}

#[test]
fn test_duplicate_registration_fails() {
    let result = SchedulerBuilder::new()
        .register::<Resize, _>(Noop)
        .unwrap()
        .register::<Resize, _>(Noop);
    assert!(matches!(result, Err(RegistryError::DuplicateType(t)) if t == Resize::TYPE_ID));
}

#[test]
fn test_invalid_config_is_rejected() {
    let result = SchedulerBuilder::new()
        .with_config(SchedulerConfig {
            max_backoff_ms: 0,
            ..SchedulerConfig::default()
        })
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_file_store_selected_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = SchedulerBuilder::new()
        .with_config(SchedulerConfig {
            store: StoreBackendConfig::File {
                path: dir.path().join("tasks"),
            },
            ..SchedulerConfig::default()
        })
        .register::<Resize, _>(Noop)
        .unwrap()
        .build()
        .unwrap();

    scheduler
        .submit(TaskRequest::one_time(Resize { width: 64 }))
        .await
        .unwrap();
    assert!(dir.path().join("tasks").join("tasks.json").exists());
}

#[tokio::test]
async fn test_unregistered_payload_cannot_be_submitted() {
    let scheduler = Arc::new(SchedulerBuilder::new().register::<Resize, _>(Noop).unwrap().build().unwrap());
    let result = scheduler.submit(TaskRequest::one_time(Purge)).await;
    assert!(matches!(
        result,
        Err(SchedulerError::Registry(RegistryError::UnknownPayloadType(_)))
    ));
}
