//! Adaptive counting gate with runtime-adjustable capacity
//!
//! `tokio::sync::Semaphore` cannot shrink its permit count in place, so the
//! gate tracks capacity and in-flight counts explicitly and parks waiters on
//! a `Notify`. Shrinking never revokes held permits; it takes effect as
//! in-flight work drains.

use ballast_core::ConcurrencyLimiter;
use std::pin::pin;
use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::debug;

struct GateState {
    capacity: usize,
    in_flight: usize,
}

/// A semaphore-like concurrency gate whose capacity can be rescaled while
/// permits are held.
pub struct AdaptiveSemaphore {
    state: Mutex<GateState>,
    notify: Notify,
}

impl AdaptiveSemaphore {
    /// Create a gate with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                capacity: capacity.max(1),
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Acquire a permit, waiting until one is available
    pub async fn acquire(&self) -> GatePermit<'_> {
        let mut notified = pin!(self.notify.notified());
        loop {
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            // Register for wakeup before re-checking so a release between
            // the check and the await is not lost.
            notified.as_mut().enable();
            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.as_mut().await;
            notified.set(self.notify.notified());
        }
    }

    /// Acquire a permit if one is immediately available
    pub fn try_acquire(&self) -> Option<GatePermit<'_>> {
        let mut state = self.lock_state();
        if state.in_flight < state.capacity {
            state.in_flight += 1;
            Some(GatePermit { gate: self })
        } else {
            None
        }
    }

    /// Number of permits currently held
    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConcurrencyLimiter for AdaptiveSemaphore {
    fn capacity(&self) -> usize {
        self.lock_state().capacity
    }

    fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        {
            let mut state = self.lock_state();
            debug!(
                old_capacity = state.capacity,
                new_capacity = capacity,
                in_flight = state.in_flight,
                "adjusted gate capacity"
            );
            state.capacity = capacity;
        }
        // Growing may unblock waiters; shrinking is a no-op for them.
        self.notify.notify_waiters();
    }
}

impl std::fmt::Debug for AdaptiveSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("AdaptiveSemaphore")
            .field("capacity", &state.capacity)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// A held permit; releases its slot on drop
pub struct GatePermit<'a> {
    gate: &'a AdaptiveSemaphore,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.gate.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.gate.notify.notify_waiters();
    }
}
