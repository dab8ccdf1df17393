//! Batch execution with retries, backoff, and cancellation

use crate::types::{BatchItem, BatchItemStatus, BatchResult, RunnerStats, RunnerStatsSnapshot};
use ballast_core::{BatchConfig, ConcurrencyLimiter};
use ballast_memory::AdaptiveSemaphore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs batches where individual items may fail without sinking the whole
/// batch.
///
/// Each item gets `max_retries + 1` attempts with exponential backoff
/// between them. In async mode items run concurrently behind an adaptive
/// gate, each attempt bounded by the per-item timeout; in sync mode items
/// run sequentially with no per-attempt timeout. When `fail_fast` is set
/// (or `continue_on_error` is cleared) the first definitive failure cancels
/// the rest of the batch, which finishes as skipped.
pub struct PartialFailureRecovery {
    config: BatchConfig,
    gate: Arc<AdaptiveSemaphore>,
    stats: RunnerStats,
}

impl PartialFailureRecovery {
    pub fn new(config: BatchConfig) -> Self {
        let gate = Arc::new(AdaptiveSemaphore::new(config.max_concurrent));
        Self {
            config,
            gate,
            stats: RunnerStats::default(),
        }
    }

    /// The concurrency gate, for registration with a memory pressure
    /// monitor
    pub fn limiter(&self) -> Arc<dyn ConcurrencyLimiter> {
        self.gate.clone()
    }

    /// Cumulative counters across every batch this runner has executed
    pub fn stats(&self) -> RunnerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Process `(id, data)` pairs concurrently behind the gate
    pub async fn process_batch_async<T, R, F, Fut>(
        &self,
        items: Vec<(String, T)>,
        processor: F,
    ) -> BatchResult<T, R>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.process_batch_async_with_progress(items, processor, |_, _| {})
            .await
    }

    /// Like [`process_batch_async`](Self::process_batch_async), invoking
    /// `progress(done, total)` as items finish, in completion order.
    pub async fn process_batch_async_with_progress<T, R, F, Fut>(
        &self,
        items: Vec<(String, T)>,
        processor: F,
        progress: impl Fn(usize, usize),
    ) -> BatchResult<T, R>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        let stop_early = self.config.fail_fast || !self.config.continue_on_error;
        let processor = Arc::new(processor);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut join_set = JoinSet::new();
        // Skeleton per task id so a panicked task still yields a failed item.
        let mut in_flight: HashMap<tokio::task::Id, BatchItem<T, R>> = HashMap::new();
        for (index, (id, data)) in items.into_iter().enumerate() {
            let task = run_item(
                BatchItem::pending(index, id.clone(), data.clone()),
                Arc::clone(&processor),
                Arc::clone(&self.gate),
                self.config.clone(),
                stop_early,
                cancel_rx.clone(),
            );
            let handle = join_set.spawn(task);
            in_flight.insert(handle.id(), BatchItem::pending(index, id, data));
        }

        let mut completed = Vec::with_capacity(total);
        let mut done = 0usize;
        while let Some(joined) = join_set.join_next_with_id().await {
            let item = match joined {
                Ok((task_id, item)) => {
                    in_flight.remove(&task_id);
                    item
                }
                Err(join_err) => {
                    let Some(skeleton) = in_flight.remove(&join_err.id()) else {
                        continue;
                    };
                    error!(id = %skeleton.id, error = %join_err, "batch item task panicked");
                    skeleton.fail(format!("task panicked: {join_err}"), 0, Duration::ZERO)
                }
            };

            done += 1;
            progress(done, total);

            if stop_early && item.status == BatchItemStatus::Failed && !*cancel_tx.borrow() {
                warn!(id = %item.id, "item failed, cancelling remainder of batch");
                let _ = cancel_tx.send(true);
            }
            completed.push(item);
        }
        completed.sort_by_key(|i| i.index);

        self.finish(BatchResult {
            items: completed,
            elapsed: started.elapsed(),
            min_success_rate: self.config.min_success_rate,
        })
    }

    /// Process `(id, data)` pairs sequentially on the calling thread.
    ///
    /// Retries use the same backoff as the async path but attempts are not
    /// bounded by the per-item timeout.
    pub fn process_batch_sync<T, R, F>(
        &self,
        items: Vec<(String, T)>,
        mut processor: F,
    ) -> BatchResult<T, R>
    where
        F: FnMut(&T) -> anyhow::Result<R>,
    {
        let started = Instant::now();
        let stop_early = self.config.fail_fast || !self.config.continue_on_error;
        let mut completed = Vec::with_capacity(items.len());
        let mut cancelled = false;

        for (index, (id, data)) in items.into_iter().enumerate() {
            let mut item = BatchItem::pending(index, id, data);
            if cancelled {
                completed.push(item.skip());
                continue;
            }
            item.status = BatchItemStatus::Processing;

            let item_started = Instant::now();
            let mut retry_count = 0u32;
            let mut last_error = String::new();
            let mut value = None;
            for attempt in 0..=self.config.max_retries {
                match processor(&item.data) {
                    Ok(v) => {
                        value = Some(v);
                        break;
                    }
                    Err(e) => {
                        last_error = format!("{e:#}");
                        if attempt < self.config.max_retries {
                            retry_count += 1;
                            item.status = BatchItemStatus::Retrying;
                            std::thread::sleep(backoff(&self.config, attempt));
                        }
                    }
                }
            }

            completed.push(match value {
                Some(v) => item.succeed(v, retry_count, item_started.elapsed()),
                None => {
                    if stop_early {
                        warn!(id = %item.id, "item failed, skipping remainder of batch");
                        cancelled = true;
                    }
                    item.fail(last_error, retry_count, item_started.elapsed())
                }
            });
        }

        self.finish(BatchResult {
            items: completed,
            elapsed: started.elapsed(),
            min_success_rate: self.config.min_success_rate,
        })
    }

    fn finish<T, R>(&self, result: BatchResult<T, R>) -> BatchResult<T, R> {
        self.stats.record(&result);
        if result.has_failures() && result.success_rate() < self.config.min_success_rate {
            warn!(
                success_rate = format_args!("{:.2}", result.success_rate()),
                min_success_rate = self.config.min_success_rate,
                "batch finished below the minimum success rate"
            );
        }
        info!(
            total = result.items.len(),
            succeeded = result.succeeded(),
            failed = result.failed(),
            skipped = result.skipped(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "batch finished"
        );
        result
    }
}

impl std::fmt::Debug for PartialFailureRecovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialFailureRecovery")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish()
    }
}

fn backoff(config: &BatchConfig, attempt: u32) -> Duration {
    config.retry_delay() * 2u32.saturating_pow(attempt)
}

async fn run_item<T, R, F, Fut>(
    mut item: BatchItem<T, R>,
    processor: Arc<F>,
    gate: Arc<AdaptiveSemaphore>,
    config: BatchConfig,
    stop_early: bool,
    mut cancel: watch::Receiver<bool>,
) -> BatchItem<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    if *cancel.borrow() {
        return item.skip();
    }

    // Wait for a concurrency permit, bailing out if the batch is cancelled
    // before one arrives.
    let _permit = if stop_early {
        tokio::select! {
            permit = gate.acquire() => permit,
            _ = cancel.changed() => return item.skip(),
        }
    } else {
        gate.acquire().await
    };
    if *cancel.borrow() {
        return item.skip();
    }
    item.status = BatchItemStatus::Processing;

    let data = item.data.clone();
    let started = Instant::now();
    let attempts = async {
        let mut retry_count = 0u32;
        let mut last_error = String::new();
        for attempt in 0..=config.max_retries {
            let outcome =
                match tokio::time::timeout(config.timeout_per_item(), processor(data.clone()))
                    .await
                {
                    Ok(res) => res,
                    Err(_) => Err(anyhow::anyhow!(
                        "attempt timed out after {:.1}s",
                        config.timeout_per_item_secs
                    )),
                };
            match outcome {
                Ok(value) => return Ok((value, retry_count)),
                Err(e) => {
                    last_error = format!("{e:#}");
                    if attempt < config.max_retries {
                        retry_count += 1;
                        let delay = backoff(&config, attempt);
                        debug!(
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "item attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err((last_error, retry_count))
    };

    let outcome = if stop_early {
        tokio::select! {
            outcome = attempts => outcome,
            _ = cancel.changed() => return item.skip(),
        }
    } else {
        attempts.await
    };

    match outcome {
        Ok((value, retries)) => item.succeed(value, retries, started.elapsed()),
        Err((error, retries)) => item.fail(error, retries, started.elapsed()),
    }
}
