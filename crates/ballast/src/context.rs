//! Wiring of the resilience components into one host-facing handle

use ballast_batch::PartialFailureRecovery;
use ballast_core::{Config, Result};
use ballast_degrade::GracefulDegradationManager;
use ballast_memory::{MemoryPressureMonitor, ScheduleMode};
use ballast_resource::ResourceManager;
use std::sync::Arc;
use tracing::info;

/// One fully wired resilience layer.
///
/// Construction connects the pieces: the batch runner's concurrency gate is
/// registered with the memory monitor for pressure scaling, and the
/// degradation manager's result cache is installed as a reclaim hook so
/// memory pressure sheds cached fallback results first.
pub struct BallastContext {
    config: Config,
    memory: Arc<MemoryPressureMonitor>,
    degradation: Arc<GracefulDegradationManager>,
    batch: Arc<PartialFailureRecovery>,
    resources: Arc<ResourceManager>,
}

impl BallastContext {
    /// Build a context whose periodic activities run as tokio tasks
    pub fn new(config: Config) -> Result<Self> {
        Self::with_mode(config, ScheduleMode::Task)
    }

    /// Build a context with an explicit scheduling substrate for the
    /// memory monitor and the recovery sweep
    pub fn with_mode(config: Config, mode: ScheduleMode) -> Result<Self> {
        config.validate()?;

        let memory = Arc::new(MemoryPressureMonitor::with_mode(config.memory.clone(), mode));
        let degradation = GracefulDegradationManager::with_mode(config.degradation.clone(), mode);
        let batch = Arc::new(PartialFailureRecovery::new(config.batch.clone()));
        let resources = Arc::new(ResourceManager::new("ballast"));

        memory.register_limiter(&batch.limiter());
        if let Some(cache) = degradation.result_cache() {
            memory.add_reclaim_hook(move || cache.clear());
        }

        info!("ballast context initialized");
        Ok(Self {
            config,
            memory,
            degradation,
            batch,
            resources,
        })
    }

    /// Start the background activities (memory monitoring)
    pub fn start(&self) {
        self.memory.start_monitoring();
    }

    /// Stop background activities and release every tracked resource.
    /// Returns how many resources were released.
    pub async fn shutdown(&self) -> usize {
        self.memory.stop_monitoring();
        let outcome = self.resources.cleanup_all_async(None).await;
        let released = outcome.values().filter(|ok| **ok).count();
        info!(released, "ballast context shut down");
        released
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryPressureMonitor> {
        &self.memory
    }

    pub fn degradation(&self) -> &Arc<GracefulDegradationManager> {
        &self.degradation
    }

    pub fn batch(&self) -> &Arc<PartialFailureRecovery> {
        &self.batch
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }
}

impl std::fmt::Debug for BallastContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BallastContext")
            .field("pressure", &self.memory.current_pressure_level())
            .field("level", &self.degradation.current_level())
            .field("resources", &self.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ballast_core::{CallContext, Error};
    use ballast_degrade::{DegradationLevel, ServiceCapability};
    use ballast_resource::{Cleanup, ResourceType};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn context() -> BallastContext {
        let mut config = Config::default();
        config.batch.retry_delay_secs = 0.001;
        config.degradation.auto_recovery_enabled = false;
        BallastContext::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let ctx = context();
        ctx.start();
        assert!(ctx.memory().is_monitoring());

        let handle = Arc::new(String::from("buffer"));
        ctx.resources().register_resource(
            "buffer",
            ResourceType::MemoryBuffer,
            1,
            &handle,
            None,
        );

        assert_eq!(ctx.shutdown().await, 1);
        assert!(!ctx.memory().is_monitoring());
        assert!(ctx.resources().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.memory.thresholds.moderate = 0.99;
        assert!(BallastContext::new(config).is_err());
    }

    #[tokio::test]
    async fn test_batch_gate_is_registered_with_the_monitor() {
        let ctx = context();
        assert_eq!(ctx.memory().memory_summary().unwrap().managed_limiters, 1);
        assert_eq!(
            ctx.batch().limiter().capacity(),
            ctx.config().batch.max_concurrent
        );
    }

    #[tokio::test]
    async fn test_reclaim_sheds_cached_fallback_results() {
        let ctx = context();
        let cache = ctx.degradation().result_cache().unwrap();
        cache.cache_result(&CallContext::new("search", json!({"q": 1})), &json!(1));
        assert_eq!(cache.len(), 1);

        assert_eq!(ctx.memory().force_reclaim(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_call_flows_through_context() {
        let ctx = context();
        ctx.degradation().register_capability(
            ServiceCapability::new("search")
                .requires("elasticsearch")
                .essential(),
        );

        let d = ctx.degradation();
        let ctx_call = CallContext::new("search", json!({"q": "rust"}));
        let value = d
            .execute_with_fallback(ctx_call.clone(), || async { Ok(json!({"hits": 2})) })
            .await
            .unwrap();
        assert_eq!(value, json!({"hits": 2}));

        // The host's health loop reports the backend down; the cached
        // result keeps the capability answering.
        d.handle_service_failure("elasticsearch");
        assert_eq!(d.current_level(), DegradationLevel::EmergencyMode);
        let value = d
            .execute_with_fallback(ctx_call, || async {
                Err(Error::internal("engine down"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!({"hits": 2}));

        d.handle_service_recovery("elasticsearch");
        assert_eq!(d.current_level(), DegradationLevel::FullService);
    }

    #[tokio::test]
    async fn test_batch_and_resources_together() {
        let ctx = context();
        let released = Arc::new(AtomicBool::new(false));

        let staging = Arc::new(String::from("staging-area"));
        let released_in = Arc::clone(&released);
        ctx.resources().register_resource(
            "staging-area",
            ResourceType::ChunkData,
            5,
            &staging,
            Some(Cleanup::sync(move || {
                released_in.store(true, Ordering::SeqCst);
                Ok(())
            })),
        );

        let items: Vec<(String, u32)> = (0..4).map(|i| (format!("chunk-{i}"), i)).collect();
        let result = ctx
            .batch()
            .process_batch_async(items, |i| async move {
                if i == 2 {
                    anyhow::bail!("bad chunk")
                }
                Ok(i)
            })
            .await;
        assert_eq!(result.succeeded(), 3);
        assert!(result.is_partial_success());

        ctx.shutdown().await;
        assert!(released.load(Ordering::SeqCst));
    }
}
