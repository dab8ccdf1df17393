//! Partial-failure batch execution
//!
//! Document ingestion touches many independent items per request; one
//! corrupt chunk must not sink its batch. [`PartialFailureRecovery`] runs
//! items with per-item retries and exponential backoff, bounds concurrency
//! with an adaptive gate that a memory pressure monitor can shrink, and
//! reports per-item outcomes so callers can act on partial successes.

pub mod runner;
pub mod types;

pub use runner::PartialFailureRecovery;
pub use types::{BatchItem, BatchItemStatus, BatchResult, RunnerStats, RunnerStatsSnapshot};
