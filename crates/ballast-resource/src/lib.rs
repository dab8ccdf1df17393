//! Lifecycle tracking for request-scoped resources
//!
//! Document ingestion leaves temporary files, checked-out connections, and
//! large buffers behind when a request dies halfway. [`ResourceManager`]
//! tracks such resources through weak references and releases them in
//! priority order, either one at a time, in a full sweep, or automatically
//! through a [`ScopedResource`] guard.

pub mod manager;
pub mod types;

pub use manager::{ResourceManager, ScopedResource};
pub use types::{Cleanup, ResourceId, ResourceInfo, ResourceStats, ResourceType};
