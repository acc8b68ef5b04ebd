//! Infrastructure adapters: task stores and platform schedulers.

pub mod platform;
pub mod store;

pub use platform::InMemoryPlatformScheduler;
pub use store::{FileTaskStore, InMemoryTaskStore};
