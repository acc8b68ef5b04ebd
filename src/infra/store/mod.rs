//! Task store backends.

pub mod file;
pub mod memory;
pub mod schema;

pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;
pub use schema::SqlSchema;
