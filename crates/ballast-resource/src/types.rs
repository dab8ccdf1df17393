//! Resource descriptors, identifiers, and cleanup actions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Kinds of resources tracked by a [`ResourceManager`](crate::ResourceManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Object held in blob storage (minio, s3)
    StorageObject,
    /// Checked-out database or search-engine connection
    DatabaseConnection,
    /// Parsed chunk data held in memory during ingestion
    ChunkData,
    /// File on local disk that must be deleted
    TemporaryFile,
    /// Large in-memory buffer (embeddings, page images)
    MemoryBuffer,
    /// Session against an external API (LLM provider, OCR service)
    ExternalApiSession,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StorageObject => "storage_object",
            Self::DatabaseConnection => "database_connection",
            Self::ChunkData => "chunk_data",
            Self::TemporaryFile => "temporary_file",
            Self::MemoryBuffer => "memory_buffer",
            Self::ExternalApiSession => "external_api_session",
        };
        f.write_str(s)
    }
}

/// Opaque handle to a registered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(Uuid);

impl ResourceId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

type BoxedCleanupFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// The action that releases a resource.
///
/// Stored as `Fn` rather than `FnOnce` so a failed cleanup stays registered
/// and can be retried.
#[derive(Clone)]
pub enum Cleanup {
    Sync(Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>),
    Async(Arc<dyn Fn() -> BoxedCleanupFuture + Send + Sync>),
}

impl Cleanup {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn asynchronous<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Cleanup::Sync"),
            Self::Async(_) => f.write_str("Cleanup::Async"),
        }
    }
}

/// Reported view of one registered resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub name: String,
    pub resource_type: ResourceType,
    /// Higher-priority resources are cleaned up first
    pub priority: u8,
    /// Whether the tracked handle is still alive
    pub alive: bool,
    pub has_cleanup: bool,
    /// Free-form annotations supplied at registration
    pub metadata: Option<serde_json::Value>,
    pub registered_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Aggregate view of a manager's registry and lifetime counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStats {
    pub registered: usize,
    pub alive: usize,
    pub dead: usize,
    pub by_type: std::collections::HashMap<ResourceType, usize>,
    pub total_registered: u64,
    pub total_cleaned: u64,
    pub failed_cleanups: u64,
}
