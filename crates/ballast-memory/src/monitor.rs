//! Memory pressure monitoring with dynamic concurrency adjustment
//!
//! Samples system and process memory on a fixed interval, classifies the
//! reading into a pressure level, and on level transitions rescales every
//! registered concurrency limiter relative to its original capacity. The
//! scheduling substrate (tokio task or dedicated thread) is chosen
//! explicitly at construction; both paths run the same tick logic.

use crate::sampler::{MemorySampler, SysinfoSampler};
use ballast_core::{ConcurrencyLimiter, MemoryConfig, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

/// Coarse classification of memory-exhaustion severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl PressureLevel {
    /// Concurrency scaling factor applied to registered limiters at this level
    pub const fn scaling_factor(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Moderate => 0.8,
            Self::High => 0.5,
            Self::Critical => 0.25,
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// One immutable snapshot of memory state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Total system memory in bytes
    pub total_memory: u64,
    /// Available system memory in bytes
    pub available_memory: u64,
    /// Used system memory in bytes
    pub used_memory: u64,
    /// System memory usage as a percentage
    pub memory_percent: f64,
    /// Resident set size of this process in bytes
    pub process_memory: u64,
    /// Process memory as a percentage of total system memory
    pub process_memory_percent: f64,
    /// Pressure classification of this snapshot
    pub pressure_level: PressureLevel,
    /// Wall-clock time of the sample
    pub timestamp: DateTime<Utc>,
}

/// Summary of current memory status for introspection endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySummary {
    pub pressure_level: PressureLevel,
    pub system_memory_percent: f64,
    pub process_memory_mb: f64,
    pub available_memory_mb: f64,
    pub managed_limiters: usize,
    pub monitoring_active: bool,
}

pub use ballast_core::ScheduleMode;

type PressureCallback = Arc<dyn Fn(PressureLevel, &MemoryStats) -> anyhow::Result<()> + Send + Sync>;
type ReclaimHook = Arc<dyn Fn() -> usize + Send + Sync>;

struct ManagedLimiter {
    limiter: Weak<dyn ConcurrencyLimiter>,
    /// Capacity observed the first time this limiter is rescaled; all
    /// scaling is relative to this untouched baseline, never compounded.
    original_capacity: Option<usize>,
}

struct MonitorShared {
    config: MemoryConfig,
    sampler: Mutex<Box<dyn MemorySampler>>,
    running: AtomicBool,
    current: Mutex<PressureLevel>,
    history: Mutex<VecDeque<MemoryStats>>,
    callbacks: Mutex<HashMap<PressureLevel, Vec<PressureCallback>>>,
    limiters: Mutex<Vec<ManagedLimiter>>,
    reclaim_hooks: Mutex<Vec<ReclaimHook>>,
}

/// Monitors system and process memory and applies adaptive backpressure.
///
/// On every transition between pressure levels the monitor fires callbacks
/// subscribed to the new level, rescales registered limiters, and (on
/// transitions into high or critical) runs registered reclaim hooks. A tick
/// where the classification is unchanged takes no action at all.
pub struct MemoryPressureMonitor {
    mode: ScheduleMode,
    shared: Arc<MonitorShared>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    thread: Mutex<Option<(std::sync::mpsc::Sender<()>, std::thread::JoinHandle<()>)>>,
}

impl MemoryPressureMonitor {
    /// Create a monitor with the sysinfo-backed sampler, scheduled as a
    /// tokio task
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_sampler(config, ScheduleMode::Task, Box::new(SysinfoSampler::new()))
    }

    /// Create a monitor with an explicit scheduling substrate
    pub fn with_mode(config: MemoryConfig, mode: ScheduleMode) -> Self {
        Self::with_sampler(config, mode, Box::new(SysinfoSampler::new()))
    }

    /// Create a monitor with an explicit sampler (used by tests and hosts
    /// with their own telemetry source)
    pub fn with_sampler(
        config: MemoryConfig,
        mode: ScheduleMode,
        sampler: Box<dyn MemorySampler>,
    ) -> Self {
        info!(
            moderate = config.thresholds.moderate,
            high = config.thresholds.high,
            critical = config.thresholds.critical,
            interval_secs = config.check_interval_secs,
            "memory pressure monitor initialized"
        );
        Self {
            mode,
            shared: Arc::new(MonitorShared {
                config,
                sampler: Mutex::new(sampler),
                running: AtomicBool::new(false),
                current: Mutex::new(PressureLevel::Low),
                history: Mutex::new(VecDeque::new()),
                callbacks: Mutex::new(HashMap::new()),
                limiters: Mutex::new(Vec::new()),
                reclaim_hooks: Mutex::new(Vec::new()),
            }),
            task: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    /// Take a fresh memory snapshot without touching monitor state
    pub fn get_current_stats(&self) -> Result<MemoryStats> {
        self.shared.current_stats()
    }

    /// Start the periodic sampling activity. Double-start logs and no-ops.
    pub fn start_monitoring(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("memory monitoring already started");
            return;
        }

        match self.mode {
            ScheduleMode::Task => {
                let shared = Arc::clone(&self.shared);
                let interval = shared.config.check_interval();
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    while shared.running.load(Ordering::SeqCst) {
                        ticker.tick().await;
                        if !shared.running.load(Ordering::SeqCst) {
                            break;
                        }
                        shared.tick();
                    }
                    debug!("memory monitoring task stopped");
                });
                *lock(&self.task) = Some(handle);
            }
            ScheduleMode::Thread => {
                let shared = Arc::clone(&self.shared);
                let interval = shared.config.check_interval();
                let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
                let spawned = std::thread::Builder::new()
                    .name("ballast-memory-monitor".into())
                    .spawn(move || {
                        loop {
                            if !shared.running.load(Ordering::SeqCst) {
                                break;
                            }
                            shared.tick();
                            // A dropped sender ends the sleep immediately,
                            // so stop never leaves a loop mid-interval.
                            match stop_rx.recv_timeout(interval) {
                                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                                _ => break,
                            }
                        }
                        debug!("memory monitoring thread stopped");
                    });
                match spawned {
                    Ok(handle) => *lock(&self.thread) = Some((stop_tx, handle)),
                    Err(e) => {
                        error!(error = %e, "failed to spawn memory monitoring thread");
                        self.shared.running.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }

        info!(mode = ?self.mode, "memory pressure monitoring started");
    }

    /// Stop the periodic sampling activity. Safe to call from any context
    /// and idempotent; the task is aborted immediately, a thread is woken
    /// and joined so no old loop survives a stop/start cycle.
    pub fn stop_monitoring(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        if let Some((stop_tx, handle)) = lock(&self.thread).take() {
            drop(stop_tx);
            let _ = handle.join();
        }
        info!("memory pressure monitoring stopped");
    }

    /// Whether the periodic activity is currently running
    pub fn is_monitoring(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Register a concurrency limiter for automatic pressure scaling.
    ///
    /// Only a weak reference is stored; limiters dropped by their owners are
    /// pruned at the next rescale. The capacity observed the first time the
    /// limiter is touched becomes the baseline for all future scaling.
    pub fn register_limiter(&self, limiter: &Arc<dyn ConcurrencyLimiter>) {
        lock(&self.shared.limiters).push(ManagedLimiter {
            limiter: Arc::downgrade(limiter),
            original_capacity: None,
        });
        debug!(capacity = limiter.capacity(), "registered limiter for pressure scaling");
    }

    /// Subscribe to transitions *into* a specific pressure level.
    ///
    /// Callback errors are logged and never propagate. For one transition,
    /// callbacks fire in registration order.
    pub fn add_pressure_callback<F>(&self, level: PressureLevel, callback: F)
    where
        F: Fn(PressureLevel, &MemoryStats) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks)
            .entry(level)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Register a hook that sheds reclaimable memory (cache entries,
    /// buffers) and returns how many units it released.
    pub fn add_reclaim_hook<F>(&self, hook: F)
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        lock(&self.shared.reclaim_hooks).push(Arc::new(hook));
    }

    /// Run every registered reclaim hook now, regardless of monitoring
    /// state. Returns the total units released.
    pub fn force_reclaim(&self) -> usize {
        self.shared.run_reclaim_hooks()
    }

    /// The most recently observed pressure level
    pub fn current_pressure_level(&self) -> PressureLevel {
        *lock(&self.shared.current)
    }

    /// Recent snapshots recorded at pressure transitions, oldest first
    pub fn memory_history(&self, max_entries: Option<usize>) -> Vec<MemoryStats> {
        let history = lock(&self.shared.history);
        let skip = max_entries.map_or(0, |max| history.len().saturating_sub(max));
        history.iter().skip(skip).cloned().collect()
    }

    /// Summary of current memory status
    pub fn memory_summary(&self) -> Result<MemorySummary> {
        let stats = self.shared.current_stats()?;
        Ok(MemorySummary {
            pressure_level: stats.pressure_level,
            system_memory_percent: stats.memory_percent,
            process_memory_mb: stats.process_memory as f64 / (1024.0 * 1024.0),
            available_memory_mb: stats.available_memory as f64 / (1024.0 * 1024.0),
            managed_limiters: lock(&self.shared.limiters).len(),
            monitoring_active: self.is_monitoring(),
        })
    }

    #[cfg(test)]
    fn tick(&self) {
        self.shared.tick();
    }
}

impl Drop for MemoryPressureMonitor {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
        if let Some((stop_tx, handle)) = lock(&self.thread).take() {
            drop(stop_tx);
            let _ = handle.join();
        }
    }
}

impl MonitorShared {
    /// One sampling tick: shared by the task and thread substrates.
    /// Errors are logged and the periodic activity continues.
    fn tick(&self) {
        if let Err(e) = self.check_pressure() {
            error!(error = %e, "memory monitoring tick failed");
        }
    }

    fn current_stats(&self) -> Result<MemoryStats> {
        let sample = lock(&self.sampler).sample()?;
        let ratio = sample.used_ratio();
        Ok(MemoryStats {
            total_memory: sample.total,
            available_memory: sample.available,
            used_memory: sample.used,
            memory_percent: ratio * 100.0,
            process_memory: sample.process_rss,
            process_memory_percent: if sample.total == 0 {
                0.0
            } else {
                sample.process_rss as f64 / sample.total as f64 * 100.0
            },
            pressure_level: self.classify(ratio),
            timestamp: Utc::now(),
        })
    }

    fn classify(&self, used_ratio: f64) -> PressureLevel {
        let t = &self.config.thresholds;
        if used_ratio >= t.critical {
            PressureLevel::Critical
        } else if used_ratio >= t.high {
            PressureLevel::High
        } else if used_ratio >= t.moderate {
            PressureLevel::Moderate
        } else {
            PressureLevel::Low
        }
    }

    fn check_pressure(&self) -> Result<()> {
        let stats = self.current_stats()?;
        let new_level = stats.pressure_level;

        let old_level = {
            let mut current = lock(&self.current);
            if *current == new_level {
                return Ok(());
            }
            std::mem::replace(&mut *current, new_level)
        };

        info!(
            from = %old_level,
            to = %new_level,
            memory_percent = format_args!("{:.1}", stats.memory_percent),
            process_percent = format_args!("{:.1}", stats.process_memory_percent),
            "memory pressure level changed"
        );

        {
            let mut history = lock(&self.history);
            history.push_back(stats.clone());
            while history.len() > self.config.max_history {
                history.pop_front();
            }
        }

        // Callbacks for the new level, in registration order. Cloned out of
        // the lock so a callback may itself register callbacks.
        let callbacks: Vec<PressureCallback> = lock(&self.callbacks)
            .get(&new_level)
            .map(|cbs| cbs.to_vec())
            .unwrap_or_default();
        for callback in callbacks {
            if let Err(e) = callback(new_level, &stats) {
                error!(level = %new_level, error = %e, "pressure callback failed");
            }
        }

        self.rescale_limiters(new_level);

        if self.config.reclaim_on_pressure && new_level >= PressureLevel::High {
            let released = self.run_reclaim_hooks();
            info!(released, level = %new_level, "ran reclaim hooks under memory pressure");
        }

        Ok(())
    }

    fn rescale_limiters(&self, level: PressureLevel) {
        let factor = level.scaling_factor();
        let mut limiters = lock(&self.limiters);
        limiters.retain_mut(|managed| {
            let Some(limiter) = managed.limiter.upgrade() else {
                // Owner dropped the limiter; prune the registration.
                return false;
            };
            let original = *managed
                .original_capacity
                .get_or_insert_with(|| limiter.capacity());
            let target = ((original as f64 * factor).floor() as usize).max(1);
            limiter.set_capacity(target);
            debug!(original, target, factor, "rescaled limiter");
            true
        });
    }

    fn run_reclaim_hooks(&self) -> usize {
        let hooks: Vec<ReclaimHook> = lock(&self.reclaim_hooks).to_vec();
        let mut released = 0;
        for hook in hooks {
            released += hook();
        }
        info!(released, "reclaim hooks completed");
        released
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
