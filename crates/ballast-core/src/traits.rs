//! Core traits for ballast components
//!
//! These traits define the seams between components: concurrency limiters
//! that the memory monitor rescales in place, and fallback handlers that the
//! degradation manager routes calls through.

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Scheduling substrate for a periodic background activity.
///
/// Components that run something on an interval (memory sampling, recovery
/// sweeps) take this at construction; they never inspect ambient runtime
/// state to decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Periodic tokio task; requires an ambient runtime when starting
    Task,
    /// Dedicated background thread with a sleep loop
    Thread,
}

/// A concurrency gate whose capacity can be adjusted in place.
///
/// Limiters are registered with the memory pressure monitor and rescaled
/// proportionally under pressure. The capacity field is mutated through a
/// shared reference so other components can keep holding the same limiter
/// object while it is resized.
pub trait ConcurrencyLimiter: Send + Sync {
    /// Current capacity (maximum simultaneously held permits)
    fn capacity(&self) -> usize;

    /// Replace the capacity. Shrinking takes effect as in-flight work drains.
    fn set_capacity(&self, capacity: usize);
}

/// The argument bundle passed to primary functions and fallback handlers.
///
/// Carries the capability name and an opaque JSON payload; the payload is the
/// uniform currency between a host's primary call and whatever fallback ends
/// up serving it.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    capability: String,
    payload: Value,
}

impl CallContext {
    /// Create a context for a capability with an argument payload
    pub fn new(capability: impl Into<String>, payload: Value) -> Self {
        Self {
            capability: capability.into(),
            payload,
        }
    }

    /// Create a context with no arguments
    pub fn empty(capability: impl Into<String>) -> Self {
        Self::new(capability, Value::Null)
    }

    /// The capability this call targets
    pub fn capability(&self) -> &str {
        &self.capability
    }

    /// The argument payload
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Stable cache key derived from the capability and payload.
    ///
    /// Two contexts with identical capability and arguments produce the same
    /// key across calls within one process.
    pub fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.capability.hash(&mut hasher);
        self.payload.to_string().hash(&mut hasher);
        format!("{}:{:016x}", self.capability, hasher.finish())
    }
}

/// A handler that can produce a substitute result for degraded capabilities.
///
/// Handlers are tried in registration order; the first success wins. A
/// handler that cannot help must return an error rather than a placeholder
/// value.
#[async_trait]
pub trait FallbackHandler: Send + Sync {
    /// Check if this handler can provide a fallback for the capability
    fn can_handle(&self, capability: &str) -> bool;

    /// Produce a substitute result for the call
    async fn handle(&self, ctx: &CallContext) -> Result<Value>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_stability() {
        let a = CallContext::new("search", json!({"query": "rust", "top_k": 5}));
        let b = CallContext::new("search", json!({"query": "rust", "top_k": 5}));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_calls() {
        let a = CallContext::new("search", json!({"query": "rust"}));
        let b = CallContext::new("search", json!({"query": "go"}));
        let c = CallContext::new("rerank", json!({"query": "rust"}));
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_empty_context() {
        let ctx = CallContext::empty("embed");
        assert_eq!(ctx.capability(), "embed");
        assert_eq!(*ctx.payload(), Value::Null);
    }
}
