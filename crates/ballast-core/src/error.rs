//! Error handling for ballast
//!
//! Provides a unified error type and result type shared by all ballast
//! components. Steady-state policy is "report, don't propagate": component
//! internals log and absorb failures, and the only error a host is expected
//! to handle during normal operation is fallback exhaustion.

/// Result type alias for ballast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for ballast
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Every fallback option for a capability was tried and failed
    #[error("No fallback available for capability '{capability}'")]
    NoFallback { capability: String },

    /// A capability's required services are degraded and fallbacks are off
    #[error("Capability '{capability}' unavailable and fallbacks are disabled")]
    FallbacksDisabled { capability: String },

    /// Memory sampling errors
    #[error("Memory sampling error: {0}")]
    Sampling(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a fallback-exhaustion error for a capability
    pub fn no_fallback(capability: impl Into<String>) -> Self {
        Self::NoFallback {
            capability: capability.into(),
        }
    }

    /// Create a fallbacks-disabled error for a capability
    pub fn fallbacks_disabled(capability: impl Into<String>) -> Self {
        Self::FallbacksDisabled {
            capability: capability.into(),
        }
    }

    /// Create a memory sampling error
    pub fn sampling(msg: impl Into<String>) -> Self {
        Self::Sampling(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this error indicates the capability is definitively
    /// unavailable (the host should return an unavailable-style response)
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::NoFallback { .. } | Error::FallbacksDisabled { .. }
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Internal(_) | Error::Io(_))
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::Timeout(_) => "timeout",
            Error::NoFallback { .. } => "no_fallback",
            Error::FallbacksDisabled { .. } => "fallbacks_disabled",
            Error::Sampling(_) => "sampling",
            Error::Internal(_) => "internal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
