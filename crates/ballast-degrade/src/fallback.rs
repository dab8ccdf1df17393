//! Built-in fallback handlers
//!
//! Two handlers cover the common cases: replaying a recent successful result
//! from a cache, and returning a fixed canned value. Hosts with richer needs
//! implement [`FallbackHandler`] themselves.

use async_trait::async_trait;
use ballast_core::{CallContext, Error, FallbackHandler, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Serves recent successful results as degraded responses.
///
/// Entries are keyed by the call context's cache key and expire after the
/// configured TTL. Expired entries are pruned lazily on insert.
pub struct CachedFallbackHandler {
    ttl: Duration,
    cache: Mutex<HashMap<String, (Value, Instant)>>,
}

impl CachedFallbackHandler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Record a successful primary result so it can be replayed later
    pub fn cache_result(&self, ctx: &CallContext, value: &Value) {
        let mut cache = lock(&self.cache);
        cache.retain(|_, (_, at)| at.elapsed() < self.ttl);
        cache.insert(ctx.cache_key(), (value.clone(), Instant::now()));
    }

    /// Number of unexpired entries
    pub fn len(&self) -> usize {
        let ttl = self.ttl;
        lock(&self.cache)
            .values()
            .filter(|(_, at)| at.elapsed() < ttl)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached entry. Returns how many were released, so this can
    /// double as a memory reclaim hook.
    pub fn clear(&self) -> usize {
        let mut cache = lock(&self.cache);
        let released = cache.len();
        cache.clear();
        released
    }
}

#[async_trait]
impl FallbackHandler for CachedFallbackHandler {
    fn can_handle(&self, capability: &str) -> bool {
        let prefix = format!("{capability}:");
        lock(&self.cache)
            .iter()
            .any(|(key, (_, at))| key.starts_with(&prefix) && at.elapsed() < self.ttl)
    }

    async fn handle(&self, ctx: &CallContext) -> Result<Value> {
        let key = ctx.cache_key();
        let cached = lock(&self.cache)
            .get(&key)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(value, _)| value.clone());
        match cached {
            Some(value) => {
                debug!(capability = %ctx.capability(), "serving cached fallback result");
                Ok(value)
            }
            None => Err(Error::no_fallback(ctx.capability())),
        }
    }
}

impl std::fmt::Debug for CachedFallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFallbackHandler")
            .field("ttl", &self.ttl)
            .field("entries", &lock(&self.cache).len())
            .finish()
    }
}

/// Returns a fixed canned value per capability, regardless of the call
/// payload. Useful as a last-resort "empty but valid" response.
#[derive(Debug, Default)]
pub struct StaticFallbackHandler {
    responses: HashMap<String, Value>,
}

impl StaticFallbackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, capability: impl Into<String>, value: Value) -> Self {
        self.responses.insert(capability.into(), value);
        self
    }
}

#[async_trait]
impl FallbackHandler for StaticFallbackHandler {
    fn can_handle(&self, capability: &str) -> bool {
        self.responses.contains_key(capability)
    }

    async fn handle(&self, ctx: &CallContext) -> Result<Value> {
        self.responses
            .get(ctx.capability())
            .cloned()
            .ok_or_else(|| Error::no_fallback(ctx.capability()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_cached_handler_round_trip() {
        let handler = CachedFallbackHandler::new(Duration::from_secs(60));
        let ctx = CallContext::new("search", json!({"query": "rust"}));

        assert!(!handler.can_handle("search"));
        handler.cache_result(&ctx, &json!({"hits": 3}));
        assert!(handler.can_handle("search"));
        assert!(!handler.can_handle("embedding"));

        let value = handler.handle(&ctx).await.unwrap();
        assert_eq!(value, json!({"hits": 3}));
    }

    #[tokio::test]
    async fn test_cached_handler_misses_on_different_payload() {
        let handler = CachedFallbackHandler::new(Duration::from_secs(60));
        handler.cache_result(&CallContext::new("search", json!({"query": "a"})), &json!(1));

        let other = CallContext::new("search", json!({"query": "b"}));
        let err = handler.handle(&other).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_cached_handler_expiry() {
        let handler = CachedFallbackHandler::new(Duration::from_nanos(1));
        let ctx = CallContext::new("search", json!({}));
        handler.cache_result(&ctx, &json!(1));
        std::thread::sleep(Duration::from_millis(2));

        assert!(!handler.can_handle("search"));
        assert!(handler.handle(&ctx).await.is_err());
    }

    #[test]
    fn test_cached_handler_clear_reports_count() {
        let handler = CachedFallbackHandler::new(Duration::from_secs(60));
        handler.cache_result(&CallContext::new("a", json!(1)), &json!(1));
        handler.cache_result(&CallContext::new("b", json!(2)), &json!(2));
        assert_eq!(handler.clear(), 2);
        assert!(handler.is_empty());
    }

    #[tokio::test]
    async fn test_static_handler() {
        let handler = StaticFallbackHandler::new()
            .with_response("search", json!({"hits": []}));

        assert!(handler.can_handle("search"));
        assert!(!handler.can_handle("rerank"));

        let ctx = CallContext::new("search", json!({"query": "x"}));
        assert_eq!(handler.handle(&ctx).await.unwrap(), json!({"hits": []}));

        let missing = CallContext::new("rerank", json!({}));
        assert!(handler.handle(&missing).await.is_err());
    }
}
