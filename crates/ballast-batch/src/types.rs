//! Batch outcome types and runner statistics

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// State of one batch item. `Processing` and `Retrying` are transient; the
/// items of a finished [`BatchResult`] only carry the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    /// Not yet attempted
    Pending,
    /// An attempt is in flight
    Processing,
    /// The last attempt failed and a retry is scheduled
    Retrying,
    /// Processor returned a value
    Succeeded,
    /// All attempts exhausted
    Failed,
    /// Never attempted because the batch was cancelled
    Skipped,
}

/// One item of a batch together with its processing outcome
#[derive(Debug, Clone)]
pub struct BatchItem<T, R> {
    /// Position in the submitted batch
    pub index: usize,
    /// Caller-supplied identifier, carried through for reporting
    pub id: String,
    /// The input the processor was given
    pub data: T,
    pub status: BatchItemStatus,
    pub result: Option<R>,
    /// Message of the last attempt's error, if any
    pub error: Option<String>,
    /// How many retries were performed after the first attempt
    pub retry_count: u32,
    /// Time spent processing this item, including retries
    pub elapsed: Duration,
}

impl<T, R> BatchItem<T, R> {
    pub(crate) fn pending(index: usize, id: String, data: T) -> Self {
        Self {
            index,
            id,
            data,
            status: BatchItemStatus::Pending,
            result: None,
            error: None,
            retry_count: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn succeed(mut self, result: R, retry_count: u32, elapsed: Duration) -> Self {
        self.status = BatchItemStatus::Succeeded;
        self.result = Some(result);
        self.retry_count = retry_count;
        self.elapsed = elapsed;
        self
    }

    pub(crate) fn fail(mut self, error: String, retry_count: u32, elapsed: Duration) -> Self {
        self.status = BatchItemStatus::Failed;
        self.error = Some(error);
        self.retry_count = retry_count;
        self.elapsed = elapsed;
        self
    }

    pub(crate) fn skip(mut self) -> Self {
        self.status = BatchItemStatus::Skipped;
        self
    }
}

/// Outcome of a whole batch. Items appear in submission order regardless of
/// completion order.
#[derive(Debug, Clone)]
pub struct BatchResult<T, R> {
    pub items: Vec<BatchItem<T, R>>,
    /// Wall-clock time for the whole batch
    pub elapsed: Duration,
    /// The acceptance threshold the batch was run under, carried over so
    /// [`is_partial_success`](Self::is_partial_success) is self-contained
    pub min_success_rate: f64,
}

impl<T, R> BatchResult<T, R> {
    fn count(&self, status: BatchItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(BatchItemStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(BatchItemStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(BatchItemStatus::Skipped)
    }

    /// Fraction of items that succeeded. An empty batch counts as fully
    /// successful.
    pub fn success_rate(&self) -> f64 {
        if self.items.is_empty() {
            1.0
        } else {
            self.succeeded() as f64 / self.items.len() as f64
        }
    }

    pub fn has_failures(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.status == BatchItemStatus::Failed)
    }

    /// True for a mixed outcome that still cleared the acceptance
    /// threshold: some items succeeded, some failed, and the success rate
    /// is at least `min_success_rate`.
    pub fn is_partial_success(&self) -> bool {
        self.succeeded() > 0 && self.failed() > 0 && self.success_rate() >= self.min_success_rate
    }

    /// Successful items in submission order
    pub fn successes(&self) -> impl Iterator<Item = &BatchItem<T, R>> {
        self.items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Succeeded)
    }

    /// Failed items in submission order
    pub fn failures(&self) -> impl Iterator<Item = &BatchItem<T, R>> {
        self.items
            .iter()
            .filter(|i| i.status == BatchItemStatus::Failed)
    }
}

/// Cumulative counters across every batch a runner has executed
#[derive(Debug, Default)]
pub struct RunnerStats {
    batches: AtomicU64,
    items: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    retries: AtomicU64,
}

impl RunnerStats {
    pub(crate) fn record<T, R>(&self, result: &BatchResult<T, R>) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items
            .fetch_add(result.items.len() as u64, Ordering::Relaxed);
        self.succeeded
            .fetch_add(result.succeeded() as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(result.failed() as u64, Ordering::Relaxed);
        self.skipped
            .fetch_add(result.skipped() as u64, Ordering::Relaxed);
        let retries: u64 = result.items.iter().map(|i| u64::from(i.retry_count)).sum();
        self.retries.fetch_add(retries, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.batches.store(0, Ordering::Relaxed);
        self.items.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.skipped.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`RunnerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStatsSnapshot {
    pub batches: u64,
    pub items: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(index: usize, status: BatchItemStatus) -> BatchItem<u32, u32> {
        let mut item = BatchItem::pending(index, format!("item-{index}"), 0);
        item.status = status;
        item
    }

    #[test]
    fn test_success_rate_and_partial() {
        let result = BatchResult {
            items: vec![
                item(0, BatchItemStatus::Succeeded),
                item(1, BatchItemStatus::Failed),
                item(2, BatchItemStatus::Succeeded),
                item(3, BatchItemStatus::Skipped),
            ],
            elapsed: Duration::ZERO,
            min_success_rate: 0.0,
        };
        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed(), 1);
        assert_eq!(result.skipped(), 1);
        assert!((result.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!(result.has_failures());
        assert!(result.is_partial_success());
    }

    #[test]
    fn test_partial_success_respects_threshold() {
        let mut result = BatchResult {
            items: vec![
                item(0, BatchItemStatus::Succeeded),
                item(1, BatchItemStatus::Failed),
                item(2, BatchItemStatus::Failed),
                item(3, BatchItemStatus::Failed),
            ],
            elapsed: Duration::ZERO,
            min_success_rate: 0.5,
        };
        // 25% success is below the 50% threshold.
        assert!(!result.is_partial_success());

        result.min_success_rate = 0.25;
        assert!(result.is_partial_success());
    }

    #[test]
    fn test_all_succeeded_is_not_partial() {
        let result = BatchResult {
            items: vec![
                item(0, BatchItemStatus::Succeeded),
                item(1, BatchItemStatus::Succeeded),
            ],
            elapsed: Duration::ZERO,
            min_success_rate: 0.0,
        };
        assert!(!result.has_failures());
        assert!(!result.is_partial_success());
    }

    #[test]
    fn test_empty_batch_is_fully_successful() {
        let result: BatchResult<u32, u32> = BatchResult {
            items: Vec::new(),
            elapsed: Duration::ZERO,
            min_success_rate: 0.0,
        };
        assert!((result.success_rate() - 1.0).abs() < f64::EPSILON);
        assert!(!result.has_failures());
        assert!(!result.is_partial_success());
    }

    #[test]
    fn test_stats_accumulate_and_reset() {
        let stats = RunnerStats::default();
        let mut failed = item(1, BatchItemStatus::Failed);
        failed.retry_count = 3;
        let result = BatchResult {
            items: vec![item(0, BatchItemStatus::Succeeded), failed],
            elapsed: Duration::ZERO,
            min_success_rate: 0.0,
        };

        stats.record(&result);
        stats.record(&result);
        let snap = stats.snapshot();
        assert_eq!(snap.batches, 2);
        assert_eq!(snap.items, 4);
        assert_eq!(snap.succeeded, 2);
        assert_eq!(snap.failed, 2);
        assert_eq!(snap.retries, 6);

        stats.reset();
        assert_eq!(stats.snapshot().batches, 0);
    }
}
