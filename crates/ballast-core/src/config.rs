//! Configuration management for ballast
//!
//! Provides a unified configuration system that supports YAML files,
//! environment variables, and programmatic overrides. All intervals and
//! timeouts are stored as fractional seconds so config files stay flat;
//! `Duration` accessors convert at the call site.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for ballast components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Graceful degradation configuration
    pub degradation: DegradationConfig,

    /// Memory pressure monitoring configuration
    pub memory: MemoryConfig,

    /// Batch processing configuration
    pub batch: BatchConfig,
}

impl Config {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        // Add configuration file if it exists
        if let Ok(config_path) = std::env::var("BALLAST_CONFIG") {
            builder = builder.add_source(config::File::with_name(&config_path).required(false));
        } else {
            for path in &["./ballast.yaml", "/etc/ballast/config.yaml"] {
                builder = builder.add_source(config::File::with_name(path).required(false));
            }
        }

        // Add environment variables with BALLAST_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("BALLAST")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path));

        let config = builder.build()?;
        let parsed: Self = config.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.degradation.validate()?;
        self.memory.validate()?;
        self.batch.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            degradation: DegradationConfig::default(),
            memory: MemoryConfig::default(),
            batch: BatchConfig::default(),
        }
    }
}

/// Configuration for graceful degradation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationConfig {
    /// Route degraded calls through fallback handlers
    pub enable_fallbacks: bool,

    /// Push successful primary results into the result cache for reuse
    pub cache_fallback_results: bool,

    /// Timeout applied to each fallback invocation, in seconds
    pub fallback_timeout_secs: f64,

    /// Age after which a degraded service is auto-recovered, in seconds
    pub max_degradation_time_secs: f64,

    /// Run the periodic recovery sweep while services are degraded
    pub auto_recovery_enabled: bool,

    /// Interval between recovery sweep checks, in seconds
    pub recovery_check_interval_secs: f64,
}

impl DegradationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fallback_timeout_secs <= 0.0 {
            return Err(crate::Error::config("Fallback timeout must be > 0"));
        }
        if self.recovery_check_interval_secs <= 0.0 {
            return Err(crate::Error::config("Recovery check interval must be > 0"));
        }
        if self.max_degradation_time_secs <= 0.0 {
            return Err(crate::Error::config("Max degradation time must be > 0"));
        }
        Ok(())
    }

    /// Timeout applied to each fallback invocation
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fallback_timeout_secs)
    }

    /// Age after which a degraded service is auto-recovered
    pub fn max_degradation_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_degradation_time_secs)
    }

    /// Interval between recovery sweep checks
    pub fn recovery_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.recovery_check_interval_secs)
    }
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            enable_fallbacks: true,
            cache_fallback_results: true,
            fallback_timeout_secs: 10.0,
            max_degradation_time_secs: 300.0,
            auto_recovery_enabled: true,
            recovery_check_interval_secs: 30.0,
        }
    }
}

/// Memory usage thresholds as fractions of total system memory
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    /// Usage ratio at which pressure becomes moderate
    pub moderate: f64,

    /// Usage ratio at which pressure becomes high
    pub high: f64,

    /// Usage ratio at which pressure becomes critical
    pub critical: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.70,
            high: 0.85,
            critical: 0.95,
        }
    }
}

/// Configuration for memory pressure monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Pressure level thresholds
    pub thresholds: MemoryThresholds,

    /// Interval between memory samples, in seconds
    pub check_interval_secs: f64,

    /// Run registered reclaim hooks on transitions into high/critical
    pub reclaim_on_pressure: bool,

    /// Maximum number of retained stats snapshots
    pub max_history: usize,
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        if !(t.moderate > 0.0 && t.moderate < t.high && t.high < t.critical && t.critical <= 1.0) {
            return Err(crate::Error::config(
                "Memory thresholds must satisfy 0 < moderate < high < critical <= 1",
            ));
        }
        if self.check_interval_secs <= 0.0 {
            return Err(crate::Error::config("Check interval must be > 0"));
        }
        if self.max_history == 0 {
            return Err(crate::Error::config("Max history must be > 0"));
        }
        Ok(())
    }

    /// Interval between memory samples
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            thresholds: MemoryThresholds::default(),
            check_interval_secs: 5.0,
            reclaim_on_pressure: true,
            max_history: 100,
        }
    }
}

/// Configuration for batch processing with partial failure recovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum retries per item (an item is attempted max_retries + 1 times)
    pub max_retries: u32,

    /// Base delay between retries, in seconds; grows as delay * 2^attempt
    pub retry_delay_secs: f64,

    /// Abort remaining work as soon as one item definitively fails
    pub fail_fast: bool,

    /// Continue processing other items when one fails
    pub continue_on_error: bool,

    /// Maximum simultaneously in-flight items in async mode
    pub max_concurrent: usize,

    /// Timeout for a single processing attempt, in seconds
    pub timeout_per_item_secs: f64,

    /// Minimum success rate for a batch with failures to count as a
    /// partial success
    pub min_success_rate: f64,
}

impl BatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(crate::Error::config("Max concurrent must be > 0"));
        }
        if self.timeout_per_item_secs <= 0.0 {
            return Err(crate::Error::config("Per-item timeout must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.min_success_rate) {
            return Err(crate::Error::config(
                "Min success rate must be within [0, 1]",
            ));
        }
        if self.retry_delay_secs < 0.0 {
            return Err(crate::Error::config("Retry delay must be >= 0"));
        }
        Ok(())
    }

    /// Base delay between retries
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    /// Timeout for a single processing attempt
    pub fn timeout_per_item(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_per_item_secs)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 1.0,
            fail_fast: false,
            continue_on_error: true,
            max_concurrent: 10,
            timeout_per_item_secs: 30.0,
            min_success_rate: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.degradation.enable_fallbacks);
        assert_eq!(config.batch.max_retries, 3);
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = MemoryConfig::default();
        assert!(config.validate().is_ok());

        config.thresholds.moderate = 0.9;
        assert!(config.validate().is_err());

        config.thresholds = MemoryThresholds::default();
        config.thresholds.critical = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_batch_validation() {
        let mut config = BatchConfig::default();
        assert!(config.validate().is_ok());

        config.max_concurrent = 0;
        assert!(config.validate().is_err());

        config.max_concurrent = 4;
        config.min_success_rate = 1.2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.degradation.fallback_timeout(), Duration::from_secs(10));
        assert_eq!(config.memory.check_interval(), Duration::from_secs(5));
        assert_eq!(config.batch.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, deserialized);

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config.batch.max_concurrent, deserialized.batch.max_concurrent);
    }
}
