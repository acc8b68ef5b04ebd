//! Configuration models for the scheduler core and its store backend.

pub mod scheduler;

pub use scheduler::{SchedulerConfig, StoreBackendConfig};
