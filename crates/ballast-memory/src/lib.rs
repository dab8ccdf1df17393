//! Memory pressure monitoring and adaptive concurrency control
//!
//! This crate watches system and process memory and turns readings into
//! backpressure:
//!
//! - [`MemoryPressureMonitor`]: periodic sampling, pressure classification,
//!   transition callbacks, and limiter rescaling
//! - [`AdaptiveSemaphore`]: a concurrency gate whose capacity can be changed
//!   while permits are outstanding
//! - [`MemorySampler`]: the seam between the monitor and the platform;
//!   backed by `sysinfo` in production and scripted samplers in tests

pub mod limiter;
pub mod monitor;
pub mod sampler;

pub use limiter::{AdaptiveSemaphore, GatePermit};
pub use monitor::{
    MemoryPressureMonitor, MemoryStats, MemorySummary, PressureLevel, ScheduleMode,
};
pub use sampler::{MemorySample, MemorySampler, SysinfoSampler};
