//! Graceful degradation for document processing services
//!
//! Tracks which backend services are degraded, derives a service-wide
//! degradation level from the capabilities those services back, and routes
//! affected or failed calls through fallback handlers so partial
//! functionality survives backend outages.
//!
//! - [`GracefulDegradationManager`]: the state machine and execution wrapper
//! - [`CachedFallbackHandler`] / [`StaticFallbackHandler`]: built-in
//!   fallbacks (replay a recent result, or serve a canned one)

pub mod capability;
pub mod fallback;
pub mod manager;

pub use capability::{CapabilityFallback, DegradationLevel, DegradationSummary, ServiceCapability};
pub use fallback::{CachedFallbackHandler, StaticFallbackHandler};
pub use manager::GracefulDegradationManager;
