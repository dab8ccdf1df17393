//! Resource registry with prioritized, best-effort cleanup

use crate::types::{Cleanup, ResourceId, ResourceInfo, ResourceStats, ResourceType};
use chrono::Utc;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

type SweepCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    name: String,
    resource_type: ResourceType,
    priority: u8,
    handle: Weak<dyn Any + Send + Sync>,
    cleanup: Option<Cleanup>,
    metadata: Option<Value>,
    registered_at: chrono::DateTime<Utc>,
    last_access: chrono::DateTime<Utc>,
}

#[derive(Default)]
struct Counters {
    total_registered: AtomicU64,
    total_cleaned: AtomicU64,
    failed_cleanups: AtomicU64,
}

/// Tracks request-scoped resources without owning them and releases them in
/// priority order.
///
/// Only weak references are held, so registration never extends a
/// resource's lifetime; a handle dropped by its owner is treated as already
/// released and its cleanup action is not run. Cleanup failures are logged
/// and leave the entry registered so a later sweep can retry; they never
/// propagate to the caller.
pub struct ResourceManager {
    name: String,
    entries: Mutex<HashMap<ResourceId, Entry>>,
    sweep_callbacks: Mutex<Vec<SweepCallback>>,
    counters: Arc<Counters>,
    sweeping: AtomicBool,
}

impl ResourceManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(HashMap::new()),
            sweep_callbacks: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            sweeping: AtomicBool::new(false),
        }
    }

    /// Track a resource. Registrations arriving while a full sweep is in
    /// progress are refused; the returned id is then unknown to the
    /// registry and every operation on it is a no-op.
    pub fn register_resource<T>(
        &self,
        name: impl Into<String>,
        resource_type: ResourceType,
        priority: u8,
        handle: &Arc<T>,
        cleanup: Option<Cleanup>,
    ) -> ResourceId
    where
        T: Any + Send + Sync,
    {
        self.register_resource_with_metadata(name, resource_type, priority, handle, cleanup, None)
    }

    /// [`register_resource`](Self::register_resource) with free-form
    /// annotations carried into [`ResourceInfo`]
    pub fn register_resource_with_metadata<T>(
        &self,
        name: impl Into<String>,
        resource_type: ResourceType,
        priority: u8,
        handle: &Arc<T>,
        cleanup: Option<Cleanup>,
        metadata: Option<Value>,
    ) -> ResourceId
    where
        T: Any + Send + Sync,
    {
        let id = ResourceId::new();
        let name = name.into();
        if self.sweeping.load(Ordering::SeqCst) {
            warn!(
                manager = %self.name,
                resource = %name,
                "registration refused during cleanup sweep"
            );
            return id;
        }

        let now = Utc::now();
        let downgraded = Arc::downgrade(handle);
        let weak: Weak<dyn Any + Send + Sync> = downgraded;
        debug!(manager = %self.name, resource = %name, %resource_type, priority, id = %id, "registered resource");
        lock(&self.entries).insert(
            id,
            Entry {
                name,
                resource_type,
                priority,
                handle: weak,
                cleanup,
                metadata,
                registered_at: now,
                last_access: now,
            },
        );
        self.counters.total_registered.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Typed access to a tracked handle, if it is still alive
    pub fn get<T>(&self, id: ResourceId) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let upgraded = lock(&self.entries).get(&id)?.handle.upgrade()?;
        upgraded.downcast::<T>().ok()
    }

    /// Refresh a resource's last-access time. Returns false for unknown ids.
    pub fn update_access(&self, id: ResourceId) -> bool {
        match lock(&self.entries).get_mut(&id) {
            Some(entry) => {
                entry.last_access = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Stop tracking a resource without running its cleanup
    pub fn unregister_resource(&self, id: ResourceId) -> bool {
        lock(&self.entries).remove(&id).is_some()
    }

    /// Release one resource now.
    ///
    /// Returns true when the entry was removed. A dead handle skips the
    /// cleanup action but still removes the bookkeeping. A failed cleanup
    /// is logged, leaves the entry registered for a later retry, and
    /// returns false, as does an unknown id (including a second call for
    /// the same id).
    pub async fn cleanup_resource(&self, id: ResourceId) -> bool {
        let Some(entry) = lock(&self.entries).remove(&id) else {
            return false;
        };

        if entry.handle.upgrade().is_none() {
            debug!(manager = %self.name, resource = %entry.name, "handle already dropped, removing entry");
            self.counters.total_cleaned.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let outcome = match &entry.cleanup {
            Some(Cleanup::Sync(f)) => f(),
            Some(Cleanup::Async(f)) => f().await,
            None => Ok(()),
        };

        match outcome {
            Ok(()) => {
                self.note_cleaned(id, &entry.name);
                true
            }
            Err(e) => {
                self.counters.failed_cleanups.fetch_add(1, Ordering::Relaxed);
                error!(manager = %self.name, resource = %entry.name, error = %e, "cleanup failed, keeping entry");
                lock(&self.entries).insert(id, entry);
                false
            }
        }
    }

    /// Release tracked resources, highest priority first, optionally
    /// restricted to one resource type.
    ///
    /// Synchronous cleanups run inline. Asynchronous cleanups are spawned
    /// onto the ambient runtime, never awaited, so a hanging one cannot
    /// stall the sweep; without a runtime they are kept registered.
    /// Returns per-id outcomes; entries reported false stay registered. A
    /// second sweep over an empty registry returns an empty map. Sweep
    /// callbacks fire once at the end.
    pub fn cleanup_all(&self, resource_type: Option<ResourceType>) -> HashMap<ResourceId, bool> {
        let drained = self.begin_sweep(resource_type);
        let mut outcome = HashMap::with_capacity(drained.len());
        let mut survivors = Vec::new();

        for (id, entry) in drained {
            if entry.handle.upgrade().is_none() {
                self.counters.total_cleaned.fetch_add(1, Ordering::Relaxed);
                outcome.insert(id, true);
                continue;
            }
            match &entry.cleanup {
                None => {
                    self.note_cleaned(id, &entry.name);
                    outcome.insert(id, true);
                }
                Some(Cleanup::Sync(f)) => match f() {
                    Ok(()) => {
                        self.note_cleaned(id, &entry.name);
                        outcome.insert(id, true);
                    }
                    Err(e) => {
                        self.counters.failed_cleanups.fetch_add(1, Ordering::Relaxed);
                        error!(manager = %self.name, resource = %entry.name, error = %e, "cleanup failed, keeping entry");
                        outcome.insert(id, false);
                        survivors.push((id, entry));
                    }
                },
                Some(Cleanup::Async(f)) => {
                    let f = Arc::clone(f);
                    if self.spawn_cleanup(id, entry.name.clone(), f) {
                        outcome.insert(id, true);
                    } else {
                        warn!(
                            manager = %self.name,
                            resource = %entry.name,
                            "no runtime for async cleanup, keeping entry"
                        );
                        outcome.insert(id, false);
                        survivors.push((id, entry));
                    }
                }
            }
        }

        self.end_sweep(survivors);
        info!(
            manager = %self.name,
            released = outcome.values().filter(|ok| **ok).count(),
            "cleanup sweep finished"
        );
        outcome
    }

    /// Like [`cleanup_all`](Self::cleanup_all), awaiting asynchronous
    /// cleanups instead of spawning them, so a failure keeps its entry.
    pub async fn cleanup_all_async(
        &self,
        resource_type: Option<ResourceType>,
    ) -> HashMap<ResourceId, bool> {
        let drained = self.begin_sweep(resource_type);
        let mut outcome = HashMap::with_capacity(drained.len());
        let mut survivors = Vec::new();

        for (id, entry) in drained {
            if entry.handle.upgrade().is_none() {
                self.counters.total_cleaned.fetch_add(1, Ordering::Relaxed);
                outcome.insert(id, true);
                continue;
            }
            let result = match &entry.cleanup {
                Some(Cleanup::Sync(f)) => f(),
                Some(Cleanup::Async(f)) => f().await,
                None => Ok(()),
            };
            match result {
                Ok(()) => {
                    self.note_cleaned(id, &entry.name);
                    outcome.insert(id, true);
                }
                Err(e) => {
                    self.counters.failed_cleanups.fetch_add(1, Ordering::Relaxed);
                    error!(manager = %self.name, resource = %entry.name, error = %e, "cleanup failed, keeping entry");
                    outcome.insert(id, false);
                    survivors.push((id, entry));
                }
            }
        }

        self.end_sweep(survivors);
        info!(
            manager = %self.name,
            released = outcome.values().filter(|ok| **ok).count(),
            "cleanup sweep finished"
        );
        outcome
    }

    /// Invoked once at the end of every full sweep. Callback errors are
    /// logged and never abort the sweep.
    pub fn add_cleanup_callback<F>(&self, callback: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        lock(&self.sweep_callbacks).push(Arc::new(callback));
    }

    pub fn resource_info(&self, id: ResourceId) -> Option<ResourceInfo> {
        lock(&self.entries).get(&id).map(|entry| info_of(id, entry))
    }

    /// Tracked resources, highest cleanup priority first, optionally
    /// restricted to one resource type
    pub fn list_resources(&self, resource_type: Option<ResourceType>) -> Vec<ResourceInfo> {
        let entries = lock(&self.entries);
        let mut infos: Vec<ResourceInfo> = entries
            .iter()
            .filter(|(_, e)| resource_type.is_none() || resource_type == Some(e.resource_type))
            .map(|(id, entry)| info_of(*id, entry))
            .collect();
        infos.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.registered_at.cmp(&b.registered_at))
        });
        infos
    }

    pub fn stats(&self) -> ResourceStats {
        let entries = lock(&self.entries);
        let mut by_type: HashMap<ResourceType, usize> = HashMap::new();
        let mut alive = 0;
        for entry in entries.values() {
            *by_type.entry(entry.resource_type).or_default() += 1;
            if entry.handle.strong_count() > 0 {
                alive += 1;
            }
        }
        ResourceStats {
            registered: entries.len(),
            alive,
            dead: entries.len() - alive,
            by_type,
            total_registered: self.counters.total_registered.load(Ordering::Relaxed),
            total_cleaned: self.counters.total_cleaned.load(Ordering::Relaxed),
            failed_cleanups: self.counters.failed_cleanups.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Drain matching entries sorted for cleanup and mark the sweep active
    fn begin_sweep(&self, resource_type: Option<ResourceType>) -> Vec<(ResourceId, Entry)> {
        self.sweeping.store(true, Ordering::SeqCst);
        let mut entries = lock(&self.entries);
        let ids: Vec<ResourceId> = entries
            .iter()
            .filter(|(_, e)| resource_type.is_none() || resource_type == Some(e.resource_type))
            .map(|(id, _)| *id)
            .collect();
        let mut drained: Vec<(ResourceId, Entry)> = ids
            .into_iter()
            .filter_map(|id| entries.remove(&id).map(|e| (id, e)))
            .collect();
        drained.sort_by(|(_, a), (_, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.registered_at.cmp(&b.registered_at))
        });
        drained
    }

    fn end_sweep(&self, survivors: Vec<(ResourceId, Entry)>) {
        lock(&self.entries).extend(survivors);
        self.sweeping.store(false, Ordering::SeqCst);
        let callbacks: Vec<SweepCallback> = lock(&self.sweep_callbacks).to_vec();
        for callback in callbacks {
            if let Err(e) = callback() {
                error!(manager = %self.name, error = %e, "sweep callback failed");
            }
        }
    }

    fn note_cleaned(&self, id: ResourceId, name: &str) {
        self.counters.total_cleaned.fetch_add(1, Ordering::Relaxed);
        debug!(manager = %self.name, resource = %name, id = %id, "resource released");
    }

    fn spawn_cleanup(
        &self,
        id: ResourceId,
        name: String,
        f: Arc<dyn Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>,
    ) -> bool {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let counters = Arc::clone(&self.counters);
        let manager = self.name.clone();
        handle.spawn(async move {
            match f().await {
                Ok(()) => {
                    counters.total_cleaned.fetch_add(1, Ordering::Relaxed);
                    debug!(manager = %manager, resource = %name, id = %id, "resource released");
                }
                Err(e) => {
                    counters.failed_cleanups.fetch_add(1, Ordering::Relaxed);
                    error!(manager = %manager, resource = %name, error = %e, "spawned cleanup failed");
                }
            }
        });
        true
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("name", &self.name)
            .field("entries", &self.len())
            .finish()
    }
}

fn info_of(id: ResourceId, entry: &Entry) -> ResourceInfo {
    ResourceInfo {
        id,
        name: entry.name.clone(),
        resource_type: entry.resource_type,
        priority: entry.priority,
        alive: entry.handle.strong_count() > 0,
        has_cleanup: entry.cleanup.is_some(),
        metadata: entry.metadata.clone(),
        registered_at: entry.registered_at,
        last_access: entry.last_access,
    }
}

/// RAII guard that registers a resource on construction and releases it
/// when dropped, whichever way the scope exits.
///
/// Dropping the guard runs a synchronous cleanup inline and spawns an
/// asynchronous one onto the ambient runtime. Call
/// [`disarm`](Self::disarm) to keep the registration alive past the guard.
pub struct ScopedResource {
    manager: Arc<ResourceManager>,
    id: ResourceId,
    armed: bool,
}

impl ScopedResource {
    /// Register `handle` and guard it for the current scope
    pub fn register<T>(
        manager: Arc<ResourceManager>,
        name: impl Into<String>,
        resource_type: ResourceType,
        priority: u8,
        handle: &Arc<T>,
        cleanup: Option<Cleanup>,
    ) -> Self
    where
        T: Any + Send + Sync,
    {
        let id = manager.register_resource(name, resource_type, priority, handle, cleanup);
        Self::new(manager, id)
    }

    /// Guard an already-registered resource
    pub fn new(manager: Arc<ResourceManager>, id: ResourceId) -> Self {
        Self {
            manager,
            id,
            armed: true,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Release responsibility for the resource back to the caller
    pub fn disarm(mut self) -> ResourceId {
        self.armed = false;
        self.id
    }
}

impl Drop for ScopedResource {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(entry) = lock(&self.manager.entries).remove(&self.id) else {
            return;
        };
        if entry.handle.upgrade().is_none() {
            self.manager
                .counters
                .total_cleaned
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        match entry.cleanup {
            None => self.manager.note_cleaned(self.id, &entry.name),
            Some(Cleanup::Sync(f)) => match f() {
                Ok(()) => self.manager.note_cleaned(self.id, &entry.name),
                Err(e) => {
                    self.manager
                        .counters
                        .failed_cleanups
                        .fetch_add(1, Ordering::Relaxed);
                    error!(resource = %entry.name, error = %e, "scoped cleanup failed");
                }
            },
            Some(Cleanup::Async(f)) => {
                if !self.manager.spawn_cleanup(self.id, entry.name.clone(), f) {
                    warn!(resource = %entry.name, "no runtime for scoped async cleanup, dropping entry");
                }
            }
        }
    }
}

impl std::fmt::Debug for ScopedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedResource")
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
