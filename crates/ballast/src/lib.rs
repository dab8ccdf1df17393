//! Adaptive resilience and resource governance for document retrieval
//! services
//!
//! Ballast keeps a document-processing service functional under memory
//! pressure and partial backend outages instead of letting it fall over:
//!
//! - memory pressure monitoring that shrinks concurrency before the OOM
//!   killer gets involved ([`MemoryPressureMonitor`])
//! - graceful degradation that answers from fallbacks while a backend is
//!   down ([`GracefulDegradationManager`])
//! - batch execution where one bad item does not sink its batch
//!   ([`PartialFailureRecovery`])
//! - lifecycle tracking that releases request-scoped resources in priority
//!   order ([`ResourceManager`])
//!
//! [`BallastContext`] wires the four together with sensible defaults:
//!
//! ```no_run
//! use ballast::{BallastContext, Config};
//!
//! # async fn demo() -> ballast::Result<()> {
//! let ctx = BallastContext::new(Config::load()?)?;
//! ctx.start();
//! // ... serve traffic ...
//! ctx.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod context;

pub use context::BallastContext;

pub use ballast_core::{
    BatchConfig, CallContext, ConcurrencyLimiter, Config, DegradationConfig, Error,
    FallbackHandler, MemoryConfig, MemoryThresholds, Result,
};

pub use ballast_batch::{
    BatchItem, BatchItemStatus, BatchResult, PartialFailureRecovery, RunnerStatsSnapshot,
};
pub use ballast_degrade::{
    CachedFallbackHandler, DegradationLevel, DegradationSummary, GracefulDegradationManager,
    ServiceCapability, StaticFallbackHandler,
};
pub use ballast_memory::{
    AdaptiveSemaphore, MemoryPressureMonitor, MemorySample, MemorySampler, MemoryStats,
    MemorySummary, PressureLevel, ScheduleMode, SysinfoSampler,
};
pub use ballast_resource::{
    Cleanup, ResourceId, ResourceInfo, ResourceManager, ResourceStats, ResourceType,
    ScopedResource,
};
