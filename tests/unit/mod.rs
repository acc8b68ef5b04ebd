//! Unit tests for individual components

mod builders_test;
mod config_test;
mod runtime_test;
mod store_test;
mod telemetry_test;
mod util_test;
