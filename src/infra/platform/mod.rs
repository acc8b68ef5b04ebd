//! Platform scheduler adapters.

pub mod memory;

pub use memory::InMemoryPlatformScheduler;
