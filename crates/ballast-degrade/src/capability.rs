//! Capability descriptors and degradation levels

use ballast_core::{CallContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// How much of the service surface is currently operational
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Everything works
    FullService,
    /// Some non-essential capabilities are degraded
    ReducedFeatures,
    /// Most capabilities are degraded; only the essentials remain
    EssentialOnly,
    /// An essential capability is down
    EmergencyMode,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FullService => "full_service",
            Self::ReducedFeatures => "reduced_features",
            Self::EssentialOnly => "essential_only",
            Self::EmergencyMode => "emergency_mode",
        };
        f.write_str(s)
    }
}

/// A capability-specific fallback invoked before the generic handlers
pub type CapabilityFallback =
    Arc<dyn Fn(CallContext) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A named, caller-facing feature backed by one or more required services.
///
/// The capability is the unit of fallback routing: when any of its required
/// services is reported degraded, calls skip the primary path and go
/// straight to the fallback chain.
#[derive(Clone)]
pub struct ServiceCapability {
    /// Unique capability name, e.g. `"vector_search"`
    pub name: String,
    /// Backend services this capability cannot work without,
    /// e.g. `"elasticsearch"`
    pub required_services: HashSet<String>,
    /// Losing an essential capability forces emergency mode
    pub essential: bool,
    /// This capability's own fallback, tried before the generic handlers
    pub fallback: Option<CapabilityFallback>,
    /// Free-form annotations carried into summaries
    pub metadata: HashMap<String, Value>,
}

impl ServiceCapability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required_services: HashSet::new(),
            essential: false,
            fallback: None,
            metadata: HashMap::new(),
        }
    }

    pub fn requires(mut self, service: impl Into<String>) -> Self {
        self.required_services.insert(service.into());
        self
    }

    pub fn essential(mut self) -> Self {
        self.essential = true;
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn(CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move |ctx| Box::pin(fallback(ctx))));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether any of this capability's required services is in the
    /// degraded set
    pub fn is_affected_by(&self, degraded: &HashSet<String>) -> bool {
        !self.required_services.is_disjoint(degraded)
    }
}

impl std::fmt::Debug for ServiceCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCapability")
            .field("name", &self.name)
            .field("required_services", &self.required_services)
            .field("essential", &self.essential)
            .field("has_fallback", &self.fallback.is_some())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of the degradation state for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationSummary {
    pub level: DegradationLevel,
    pub degraded_services: Vec<String>,
    pub affected_capabilities: Vec<String>,
    pub total_capabilities: usize,
    pub fallbacks_enabled: bool,
    pub auto_recovery_enabled: bool,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering() {
        assert!(DegradationLevel::FullService < DegradationLevel::ReducedFeatures);
        assert!(DegradationLevel::EssentialOnly < DegradationLevel::EmergencyMode);
    }

    #[test]
    fn test_level_serde_shape() {
        let json = serde_json::to_string(&DegradationLevel::ReducedFeatures).unwrap();
        assert_eq!(json, "\"reduced_features\"");
    }

    #[test]
    fn test_capability_builder() {
        let cap = ServiceCapability::new("vector_search")
            .requires("elasticsearch")
            .requires("embedding_api")
            .essential()
            .with_fallback(|_ctx| async { Ok(json!({"hits": []})) })
            .with_metadata("team", json!("retrieval"));

        assert_eq!(cap.name, "vector_search");
        assert!(cap.essential);
        assert!(cap.fallback.is_some());
        assert_eq!(cap.required_services.len(), 2);
        assert_eq!(cap.metadata["team"], json!("retrieval"));
    }

    #[test]
    fn test_affected_by_intersection() {
        let cap = ServiceCapability::new("ocr").requires("paddle_ocr");
        let degraded: HashSet<String> = ["paddle_ocr".to_string()].into_iter().collect();
        let other: HashSet<String> = ["minio".to_string()].into_iter().collect();

        assert!(cap.is_affected_by(&degraded));
        assert!(!cap.is_affected_by(&other));
        assert!(!cap.is_affected_by(&HashSet::new()));
    }
}
