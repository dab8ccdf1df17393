//! OS memory sampling behind a trait seam
//!
//! The monitor consumes `MemorySampler` so tests can drive pressure
//! transitions with synthetic readings; production uses the sysinfo-backed
//! implementation.

use ballast_core::{Error, Result};
use sysinfo::System;

/// One raw memory reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    /// Total system memory in bytes
    pub total: u64,
    /// Available system memory in bytes
    pub available: u64,
    /// Used system memory in bytes
    pub used: u64,
    /// Resident set size of this process in bytes
    pub process_rss: u64,
}

impl MemorySample {
    /// System memory usage as a ratio in [0, 1]
    pub fn used_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.used as f64 / self.total as f64
    }
}

/// Source of memory readings
pub trait MemorySampler: Send {
    /// Take one reading from the underlying source
    fn sample(&mut self) -> Result<MemorySample>;
}

/// Memory sampler backed by the `sysinfo` crate
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    /// Create a new sampler. Performs an initial memory refresh.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoSampler").finish_non_exhaustive()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self) -> Result<MemorySample> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(Error::sampling("total system memory reported as zero"));
        }

        // RSS via per-process lookup; best-effort since some sandboxed
        // environments hide the process table.
        let process_rss = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| {
                self.system.refresh_process(pid);
                self.system.process(pid).map(|p| p.memory())
            })
            .unwrap_or(0);

        Ok(MemorySample {
            total,
            available: self.system.available_memory(),
            used: self.system.used_memory(),
            process_rss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_ratio() {
        let sample = MemorySample {
            total: 1000,
            available: 250,
            used: 750,
            process_rss: 100,
        };
        assert!((sample.used_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_used_ratio_zero_total() {
        let sample = MemorySample {
            total: 0,
            available: 0,
            used: 0,
            process_rss: 0,
        };
        assert_eq!(sample.used_ratio(), 0.0);
    }

    #[test]
    fn test_sysinfo_sampler_returns_plausible_reading() {
        let mut sampler = SysinfoSampler::new();
        let sample = sampler.sample().expect("sampling should succeed");
        assert!(sample.total > 0);
        assert!(sample.used <= sample.total);
    }
}
