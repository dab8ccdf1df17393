//! Degradation state machine and fallback execution

use crate::capability::{DegradationLevel, DegradationSummary, ServiceCapability};
use crate::fallback::CachedFallbackHandler;
use ballast_core::{CallContext, DegradationConfig, Error, FallbackHandler, Result, ScheduleMode};
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tracing::{debug, error, info, warn};

type LevelCallback =
    Arc<dyn Fn(DegradationLevel, DegradationLevel) -> anyhow::Result<()> + Send + Sync>;

/// Tracks degraded backend services, derives the service-wide degradation
/// level, and routes calls for affected capabilities through fallbacks.
///
/// The manager performs no health checks itself: the host's health loop
/// reports service failures and recoveries, and the level is recomputed
/// wholesale from the degraded-service set on every report. Any degraded
/// service backing an essential capability forces emergency mode; otherwise
/// the fraction of capabilities whose required services intersect the
/// degraded set decides between reduced features and essential-only.
pub struct GracefulDegradationManager {
    config: DegradationConfig,
    mode: ScheduleMode,
    capabilities: Mutex<HashMap<String, ServiceCapability>>,
    handlers: Mutex<Vec<Arc<dyn FallbackHandler>>>,
    degraded: Mutex<HashMap<String, Instant>>,
    level: Mutex<DegradationLevel>,
    level_callbacks: Mutex<Vec<LevelCallback>>,
    result_cache: Mutex<Option<Arc<CachedFallbackHandler>>>,
    sweep_running: AtomicBool,
}

impl GracefulDegradationManager {
    /// Create a manager whose recovery sweep runs as a tokio task
    pub fn new(config: DegradationConfig) -> Arc<Self> {
        Self::with_mode(config, ScheduleMode::Task)
    }

    /// Create a manager with an explicit scheduling substrate for the
    /// recovery sweep. Thread mode keeps auto recovery working for hosts
    /// that report service health from outside any async runtime.
    pub fn with_mode(config: DegradationConfig, mode: ScheduleMode) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            mode,
            capabilities: Mutex::new(HashMap::new()),
            handlers: Mutex::new(Vec::new()),
            degraded: Mutex::new(HashMap::new()),
            level: Mutex::new(DegradationLevel::FullService),
            level_callbacks: Mutex::new(Vec::new()),
            result_cache: Mutex::new(None),
            sweep_running: AtomicBool::new(false),
        });
        if manager.config.cache_fallback_results {
            manager.attach_result_cache(Arc::new(CachedFallbackHandler::new(
                manager.config.max_degradation_time(),
            )));
        }
        manager
    }

    /// Declare a capability. Re-registration under the same name overwrites.
    pub fn register_capability(&self, capability: ServiceCapability) {
        debug!(
            name = %capability.name,
            essential = capability.essential,
            services = capability.required_services.len(),
            "registered service capability"
        );
        lock(&self.capabilities).insert(capability.name.clone(), capability);
    }

    /// Register a generic fallback handler. Handlers are consulted in
    /// registration order after a capability's own fallback; the first that
    /// can handle a capability and succeeds wins.
    pub fn register_handler(&self, handler: Arc<dyn FallbackHandler>) {
        lock(&self.handlers).push(handler);
    }

    /// Attach a result cache that records successful primary results and is
    /// consulted before all other generic handlers.
    pub fn attach_result_cache(&self, cache: Arc<CachedFallbackHandler>) {
        lock(&self.handlers).insert(0, cache.clone());
        *lock(&self.result_cache) = Some(cache);
    }

    /// The attached result cache, if any. Exposed so hosts can wire its
    /// `clear` into a memory reclaim hook.
    pub fn result_cache(&self) -> Option<Arc<CachedFallbackHandler>> {
        lock(&self.result_cache).clone()
    }

    /// Subscribe to degradation level transitions `(old, new)`.
    /// Callback errors are logged and never propagate.
    pub fn add_level_callback<F>(&self, callback: F)
    where
        F: Fn(DegradationLevel, DegradationLevel) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.level_callbacks).push(Arc::new(callback));
    }

    /// Report a backend service as failing. Idempotent; recomputes the
    /// level and starts the recovery sweep when auto recovery is enabled.
    pub fn handle_service_failure(self: &Arc<Self>, service: &str) {
        let newly = lock(&self.degraded)
            .insert(service.to_string(), Instant::now())
            .is_none();
        if newly {
            warn!(service, "backend service degraded");
        }
        self.recompute_level();
        self.ensure_recovery_sweep();
    }

    /// Report a backend service as healthy again. Idempotent.
    pub fn handle_service_recovery(&self, service: &str) {
        if lock(&self.degraded).remove(service).is_some() {
            info!(service, "backend service recovered");
            self.recompute_level();
        }
    }

    /// Run a capability's primary operation, routing through fallbacks when
    /// its required services are degraded or the primary fails.
    ///
    /// Unknown capabilities run the primary directly with no fallback
    /// routing. Successful primary results are pushed into the attached
    /// result cache for later replay.
    pub async fn execute_with_fallback<F, Fut>(&self, ctx: CallContext, primary: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let capability = lock(&self.capabilities).get(ctx.capability()).cloned();
        let Some(capability) = capability else {
            return primary().await;
        };

        let affected = {
            let degraded = lock(&self.degraded);
            let names: HashSet<String> = degraded.keys().cloned().collect();
            capability.is_affected_by(&names)
        };
        if affected {
            debug!(
                capability = %capability.name,
                "required services degraded, routing straight to fallback"
            );
            return self.run_fallback_chain(&capability, &ctx).await;
        }

        match primary().await {
            Ok(value) => {
                if let Some(cache) = self.result_cache() {
                    cache.cache_result(&ctx, &value);
                }
                Ok(value)
            }
            Err(e) => {
                warn!(
                    capability = %capability.name,
                    error = %e,
                    "primary operation failed, attempting fallback"
                );
                self.run_fallback_chain(&capability, &ctx).await
            }
        }
    }

    /// Like [`execute_with_fallback`](Self::execute_with_fallback) for a
    /// synchronous primary, which runs on the blocking thread pool so the
    /// caller's task never blocks.
    pub async fn execute_blocking_with_fallback<F>(
        &self,
        ctx: CallContext,
        primary: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Result<Value> + Send + 'static,
    {
        self.execute_with_fallback(ctx, || async {
            tokio::task::spawn_blocking(primary)
                .await
                .map_err(|e| Error::internal(format!("blocking primary panicked: {e}")))?
        })
        .await
    }

    /// Consult the fallback chain for a degraded response without running a
    /// primary
    pub async fn try_fallback(&self, ctx: &CallContext) -> Result<Value> {
        let capability = lock(&self.capabilities).get(ctx.capability()).cloned();
        match capability {
            Some(capability) => self.run_fallback_chain(&capability, ctx).await,
            None => Err(Error::no_fallback(ctx.capability())),
        }
    }

    async fn run_fallback_chain(
        &self,
        capability: &ServiceCapability,
        ctx: &CallContext,
    ) -> Result<Value> {
        if !self.config.enable_fallbacks {
            return Err(Error::fallbacks_disabled(&capability.name));
        }
        let timeout = self.config.fallback_timeout();

        // The capability's own fallback goes first.
        if let Some(fallback) = &capability.fallback {
            match tokio::time::timeout(timeout, fallback(ctx.clone())).await {
                Ok(Ok(value)) => {
                    debug!(capability = %capability.name, "capability fallback produced a result");
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    debug!(capability = %capability.name, error = %e, "capability fallback failed");
                }
                Err(_) => {
                    warn!(
                        capability = %capability.name,
                        timeout_secs = self.config.fallback_timeout_secs,
                        "capability fallback timed out"
                    );
                }
            }
        }

        let handlers: Vec<Arc<dyn FallbackHandler>> = lock(&self.handlers).to_vec();
        for handler in handlers {
            if !handler.can_handle(&capability.name) {
                continue;
            }
            match tokio::time::timeout(timeout, handler.handle(ctx)).await {
                Ok(Ok(value)) => {
                    debug!(capability = %capability.name, "fallback handler produced a result");
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    debug!(capability = %capability.name, error = %e, "fallback handler failed");
                }
                Err(_) => {
                    warn!(
                        capability = %capability.name,
                        timeout_secs = self.config.fallback_timeout_secs,
                        "fallback handler timed out"
                    );
                }
            }
        }
        Err(Error::no_fallback(&capability.name))
    }

    /// Whether callers should attempt this capability right now
    pub fn is_capability_available(&self, capability: &str) -> bool {
        let Some(cap) = lock(&self.capabilities).get(capability).cloned() else {
            return true;
        };
        let degraded: HashSet<String> = lock(&self.degraded).keys().cloned().collect();
        if !cap.is_affected_by(&degraded) {
            return true;
        }
        if !self.config.enable_fallbacks {
            return false;
        }
        cap.fallback.is_some()
            || lock(&self.handlers)
                .iter()
                .any(|h| h.can_handle(capability))
    }

    pub fn current_level(&self) -> DegradationLevel {
        *lock(&self.level)
    }

    /// Names of currently degraded backend services, sorted for stable
    /// output
    pub fn degraded_services(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.degraded).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn degradation_summary(&self) -> DegradationSummary {
        let degraded: HashSet<String> = lock(&self.degraded).keys().cloned().collect();
        let capabilities = lock(&self.capabilities);
        let mut affected: Vec<String> = capabilities
            .values()
            .filter(|c| c.is_affected_by(&degraded))
            .map(|c| c.name.clone())
            .collect();
        affected.sort();
        let mut degraded: Vec<String> = degraded.into_iter().collect();
        degraded.sort();

        DegradationSummary {
            level: self.current_level(),
            degraded_services: degraded,
            affected_capabilities: affected,
            total_capabilities: capabilities.len(),
            fallbacks_enabled: self.config.enable_fallbacks,
            auto_recovery_enabled: self.config.auto_recovery_enabled,
            generated_at: Utc::now(),
        }
    }

    fn recompute_level(&self) {
        let new_level = {
            let capabilities = lock(&self.capabilities);
            let degraded: HashSet<String> = lock(&self.degraded).keys().cloned().collect();
            derive_level(&capabilities, &degraded)
        };

        let old_level = {
            let mut level = lock(&self.level);
            if *level == new_level {
                return;
            }
            std::mem::replace(&mut *level, new_level)
        };

        info!(from = %old_level, to = %new_level, "degradation level changed");

        let callbacks: Vec<LevelCallback> = lock(&self.level_callbacks).to_vec();
        for callback in callbacks {
            if let Err(e) = callback(old_level, new_level) {
                error!(error = %e, "degradation level callback failed");
            }
        }
    }

    /// Spawn the recovery sweep if auto recovery is on and it is not
    /// already running. The sweep force-recovers services that have been
    /// degraded past the configured maximum and exits once nothing is
    /// degraded.
    fn ensure_recovery_sweep(self: &Arc<Self>) {
        if !self.config.auto_recovery_enabled {
            return;
        }
        if self.sweep_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.recovery_check_interval();
        match self.mode {
            ScheduleMode::Task => {
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(interval).await;
                        let Some(manager) = weak.upgrade() else {
                            break;
                        };
                        if manager.sweep_pass() {
                            break;
                        }
                    }
                });
            }
            ScheduleMode::Thread => {
                let spawned = std::thread::Builder::new()
                    .name("ballast-recovery-sweep".into())
                    .spawn(move || loop {
                        std::thread::sleep(interval);
                        let Some(manager) = weak.upgrade() else {
                            break;
                        };
                        if manager.sweep_pass() {
                            break;
                        }
                    });
                if let Err(e) = spawned {
                    error!(error = %e, "failed to spawn recovery sweep thread");
                    self.sweep_running.store(false, Ordering::SeqCst);
                }
            }
        }
    }

    /// One sweep iteration: shared by the task and thread substrates.
    /// Returns true once nothing is degraded and the sweep should stop.
    fn sweep_pass(&self) -> bool {
        self.sweep_expired();
        if lock(&self.degraded).is_empty() {
            self.sweep_running.store(false, Ordering::SeqCst);
            debug!("recovery sweep idle, stopping");
            return true;
        }
        false
    }

    fn sweep_expired(&self) {
        let max = self.config.max_degradation_time();
        let expired: Vec<String> = lock(&self.degraded)
            .iter()
            .filter(|(_, since)| since.elapsed() >= max)
            .map(|(name, _)| name.clone())
            .collect();
        for service in expired {
            warn!(
                service = %service,
                max_secs = self.config.max_degradation_time_secs,
                "service degraded past maximum, forcing recovery"
            );
            self.handle_service_recovery(&service);
        }
    }
}

fn derive_level(
    capabilities: &HashMap<String, ServiceCapability>,
    degraded: &HashSet<String>,
) -> DegradationLevel {
    if degraded.is_empty() {
        return DegradationLevel::FullService;
    }
    let essential_down = capabilities
        .values()
        .any(|c| c.essential && c.is_affected_by(degraded));
    if essential_down {
        return DegradationLevel::EmergencyMode;
    }
    let affected = capabilities
        .values()
        .filter(|c| c.is_affected_by(degraded))
        .count();
    if affected == 0 {
        // Something is degraded but no registered capability depends on it.
        return DegradationLevel::FullService;
    }
    let ratio = affected as f64 / capabilities.len() as f64;
    if ratio >= 0.75 {
        DegradationLevel::EssentialOnly
    } else {
        DegradationLevel::ReducedFeatures
    }
}

impl std::fmt::Debug for GracefulDegradationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulDegradationManager")
            .field("level", &self.current_level())
            .field("degraded", &self.degraded_services())
            .field("capabilities", &lock(&self.capabilities).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::StaticFallbackHandler;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> Arc<GracefulDegradationManager> {
        let mut config = DegradationConfig::default();
        config.auto_recovery_enabled = false;
        GracefulDegradationManager::new(config)
    }

    /// search is essential on elasticsearch; three non-essential
    /// capabilities ride on one service each.
    fn register_pipeline(m: &GracefulDegradationManager) {
        m.register_capability(
            ServiceCapability::new("search")
                .requires("elasticsearch")
                .essential(),
        );
        m.register_capability(ServiceCapability::new("rerank").requires("rerank_api"));
        m.register_capability(ServiceCapability::new("ocr").requires("paddle_ocr"));
        m.register_capability(ServiceCapability::new("tagging").requires("llm_api"));
    }

    #[tokio::test]
    async fn test_level_derivation() {
        let m = manager();
        register_pipeline(&m);
        assert_eq!(m.current_level(), DegradationLevel::FullService);

        m.handle_service_failure("rerank_api"); // 1/4 affected
        assert_eq!(m.current_level(), DegradationLevel::ReducedFeatures);

        m.handle_service_failure("paddle_ocr");
        m.handle_service_failure("llm_api"); // 3/4 affected
        assert_eq!(m.current_level(), DegradationLevel::EssentialOnly);

        m.handle_service_failure("elasticsearch"); // essential down
        assert_eq!(m.current_level(), DegradationLevel::EmergencyMode);

        m.handle_service_recovery("elasticsearch");
        assert_eq!(m.current_level(), DegradationLevel::EssentialOnly);

        for s in ["rerank_api", "paddle_ocr", "llm_api"] {
            m.handle_service_recovery(s);
        }
        assert_eq!(m.current_level(), DegradationLevel::FullService);
    }

    #[tokio::test]
    async fn test_essential_overrides_ratio() {
        let m = manager();
        register_pipeline(&m);

        m.handle_service_failure("elasticsearch");
        assert_eq!(m.current_level(), DegradationLevel::EmergencyMode);
    }

    #[tokio::test]
    async fn test_unreferenced_service_keeps_full_service() {
        let m = manager();
        register_pipeline(&m);

        m.handle_service_failure("redis");
        assert_eq!(m.current_level(), DegradationLevel::FullService);
        assert_eq!(m.degraded_services(), vec!["redis".to_string()]);
    }

    #[tokio::test]
    async fn test_level_callbacks_fire_on_transition_only() {
        let m = manager();
        register_pipeline(&m);

        let fires = Arc::new(AtomicUsize::new(0));
        {
            let fires = Arc::clone(&fires);
            m.add_level_callback(move |_, _| {
                fires.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        m.handle_service_failure("rerank_api"); // full -> reduced
        m.handle_service_failure("paddle_ocr"); // still reduced, no fire
        assert_eq!(fires.load(Ordering::SeqCst), 1);

        m.handle_service_recovery("rerank_api");
        m.handle_service_recovery("paddle_ocr"); // reduced -> full
        assert_eq!(fires.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_capability_runs_primary_directly() {
        let m = manager();

        let ctx = CallContext::new("unregistered", json!({}));
        let value = m
            .execute_with_fallback(ctx.clone(), || async { Ok(json!(42)) })
            .await
            .unwrap();
        assert_eq!(value, json!(42));

        // Errors propagate unchanged; no fallback routing happens.
        let err = m
            .execute_with_fallback(ctx, || async { Err(Error::internal("boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_primary_failure_replays_cached_result() {
        let m = manager();
        register_pipeline(&m);

        let ctx = CallContext::new("search", json!({"query": "rust"}));
        let value = m
            .execute_with_fallback(ctx.clone(), || async { Ok(json!({"hits": 5})) })
            .await
            .unwrap();
        assert_eq!(value, json!({"hits": 5}));

        // The same call failing gets the cached result back. No service is
        // marked degraded: health reporting is the host's job.
        let value = m
            .execute_with_fallback(ctx, || async {
                Err(Error::internal("backend unreachable"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!({"hits": 5}));
        assert!(m.degraded_services().is_empty());
        assert_eq!(m.current_level(), DegradationLevel::FullService);
    }

    #[tokio::test]
    async fn test_degraded_capability_skips_primary() {
        let m = manager();
        m.register_capability(
            ServiceCapability::new("rerank")
                .requires("rerank_api")
                .with_fallback(|_ctx| async { Ok(json!({"order": []})) }),
        );
        m.handle_service_failure("rerank_api");

        let primary_ran = Arc::new(AtomicBool::new(false));
        let primary_ran_in = Arc::clone(&primary_ran);
        let value = m
            .execute_with_fallback(CallContext::new("rerank", json!({})), move || async move {
                primary_ran_in.store(true, Ordering::SeqCst);
                Ok(json!("should not happen"))
            })
            .await
            .unwrap();

        assert_eq!(value, json!({"order": []}));
        assert!(!primary_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_capability_fallback_precedes_generic_handlers() {
        let mut config = DegradationConfig::default();
        config.auto_recovery_enabled = false;
        config.cache_fallback_results = false;
        let m = GracefulDegradationManager::new(config);
        m.register_capability(
            ServiceCapability::new("rerank")
                .requires("rerank_api")
                .with_fallback(|_ctx| async { Ok(json!("own")) }),
        );
        m.register_handler(Arc::new(
            StaticFallbackHandler::new().with_response("rerank", json!("generic")),
        ));
        m.handle_service_failure("rerank_api");

        let value = m
            .try_fallback(&CallContext::new("rerank", json!({})))
            .await
            .unwrap();
        assert_eq!(value, json!("own"));
    }

    #[tokio::test]
    async fn test_failed_capability_fallback_falls_through() {
        let m = manager();
        m.register_capability(
            ServiceCapability::new("rerank")
                .requires("rerank_api")
                .with_fallback(|_ctx| async { Err(Error::internal("fallback model gone")) }),
        );
        m.register_handler(Arc::new(
            StaticFallbackHandler::new().with_response("rerank", json!("generic")),
        ));

        let value = m
            .try_fallback(&CallContext::new("rerank", json!({})))
            .await
            .unwrap();
        assert_eq!(value, json!("generic"));
    }

    #[tokio::test]
    async fn test_no_fallback_error() {
        let mut config = DegradationConfig::default();
        config.auto_recovery_enabled = false;
        config.cache_fallback_results = false;
        let m = GracefulDegradationManager::new(config);
        m.register_capability(ServiceCapability::new("search").requires("elasticsearch"));

        let err = m
            .execute_with_fallback(CallContext::new("search", json!({})), || async {
                Err(Error::internal("down"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoFallback { .. }));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_fallbacks_disabled_error() {
        let mut config = DegradationConfig::default();
        config.enable_fallbacks = false;
        config.auto_recovery_enabled = false;
        let m = GracefulDegradationManager::new(config);
        m.register_capability(ServiceCapability::new("search").requires("elasticsearch"));

        let err = m
            .execute_with_fallback(CallContext::new("search", json!({})), || async {
                Err(Error::internal("down"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FallbacksDisabled { .. }));
    }

    #[tokio::test]
    async fn test_fallback_timeout_moves_to_next_option() {
        tokio::time::pause();
        let mut config = DegradationConfig::default();
        config.auto_recovery_enabled = false;
        config.cache_fallback_results = false;
        config.fallback_timeout_secs = 0.05;
        let m = GracefulDegradationManager::new(config);
        m.register_capability(
            ServiceCapability::new("search")
                .requires("elasticsearch")
                .with_fallback(|_ctx| async {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(json!(null))
                }),
        );
        m.register_handler(Arc::new(
            StaticFallbackHandler::new().with_response("search", json!("canned")),
        ));

        let value = m
            .try_fallback(&CallContext::new("search", json!({})))
            .await
            .unwrap();
        assert_eq!(value, json!("canned"));
    }

    #[tokio::test]
    async fn test_blocking_primary_offloaded() {
        let m = manager();
        register_pipeline(&m);

        let value = m
            .execute_blocking_with_fallback(CallContext::new("search", json!({})), || {
                Ok(json!({"hits": 1}))
            })
            .await
            .unwrap();
        assert_eq!(value, json!({"hits": 1}));
    }

    #[tokio::test]
    async fn test_availability_considers_fallback_options() {
        let m = manager();
        m.register_capability(
            ServiceCapability::new("with_fb")
                .requires("svc_a")
                .with_fallback(|_ctx| async { Ok(json!(null)) }),
        );
        m.register_capability(ServiceCapability::new("without_fb").requires("svc_b"));

        assert!(m.is_capability_available("with_fb"));
        assert!(m.is_capability_available("without_fb"));
        assert!(m.is_capability_available("unregistered"));

        m.handle_service_failure("svc_a");
        m.handle_service_failure("svc_b");
        assert!(m.is_capability_available("with_fb"));
        assert!(!m.is_capability_available("without_fb"));
    }

    #[tokio::test]
    async fn test_recovery_sweep_forces_expiry() {
        let mut config = DegradationConfig::default();
        config.max_degradation_time_secs = 0.05;
        config.cache_fallback_results = false;
        config.auto_recovery_enabled = false;
        let m = GracefulDegradationManager::new(config);
        register_pipeline(&m);

        m.handle_service_failure("rerank_api");
        m.sweep_expired();
        assert_eq!(m.current_level(), DegradationLevel::ReducedFeatures);

        std::thread::sleep(std::time::Duration::from_millis(60));
        m.sweep_expired();
        assert_eq!(m.current_level(), DegradationLevel::FullService);
        assert!(m.degraded_services().is_empty());
    }

    #[test]
    fn test_thread_mode_auto_recovery_outside_runtime() {
        // Hosts with synchronous health loops report failures from plain
        // threads; with the thread substrate the sweep must run without an
        // ambient tokio runtime.
        let mut config = DegradationConfig::default();
        config.cache_fallback_results = false;
        config.recovery_check_interval_secs = 0.01;
        config.max_degradation_time_secs = 0.02;
        let m = GracefulDegradationManager::with_mode(config, ScheduleMode::Thread);
        register_pipeline(&m);

        m.handle_service_failure("rerank_api");
        assert_eq!(m.current_level(), DegradationLevel::ReducedFeatures);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !m.degraded_services().is_empty() {
            assert!(
                std::time::Instant::now() < deadline,
                "recovery sweep never force-recovered the service"
            );
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(m.current_level(), DegradationLevel::FullService);
    }

    #[tokio::test]
    async fn test_summary_shape() {
        let m = manager();
        register_pipeline(&m);
        m.handle_service_failure("paddle_ocr");

        let summary = m.degradation_summary();
        assert_eq!(summary.level, DegradationLevel::ReducedFeatures);
        assert_eq!(summary.degraded_services, vec!["paddle_ocr".to_string()]);
        assert_eq!(summary.affected_capabilities, vec!["ocr".to_string()]);
        assert_eq!(summary.total_capabilities, 4);
        assert!(summary.fallbacks_enabled);
    }
}
