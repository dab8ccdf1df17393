//! # ballast-core
//!
//! Core types, traits, and utilities for ballast - an adaptive resilience
//! and resource-governance layer for document retrieval services.
//!
//! This crate provides the foundational pieces shared across all other
//! ballast components:
//!
//! - A unified error type with a distinguishable fallback-exhaustion variant
//! - Configuration schema, layered loading, and validation
//! - The `ConcurrencyLimiter` and `FallbackHandler` trait seams
//! - The `CallContext` argument bundle for fallback routing

pub mod config;
pub mod error;
pub mod traits;

// Re-export commonly used types at the crate root
pub use config::{
    BatchConfig, Config, DegradationConfig, MemoryConfig, MemoryThresholds,
};
pub use error::{Error, Result};
pub use traits::{CallContext, ConcurrencyLimiter, FallbackHandler, ScheduleMode};
