pub mod applier;
pub mod concurrency;
pub mod context;
pub mod conversions;
pub mod copier;
pub mod cut_over;
pub mod error;
mod macros;
pub mod migration;
pub mod replication;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod throttle;
pub mod types;
pub mod workers;
