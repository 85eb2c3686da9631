//! Process-wide state shared by every handler, threaded through as
//! `Arc<AppState>` the way `control-plane-api`'s `App` is threaded through
//! `axum::extract::State`.

use std::sync::Arc;

use dashmap::DashMap;
use msgvault::Store;
use msgvault_registry::RegistryHandle;
use msgvault_subscribe::DispatcherHandle;

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub registry: RegistryHandle,
    /// One dispatcher actor per namespace, spawned lazily on first
    /// subscribe or write. Namespaces are created rarely and live for the
    /// life of the process, so a `DashMap` keyed by id is enough — no need
    /// to evict entries on namespace deletion beyond what process restart
    /// already clears.
    dispatchers: DashMap<String, DispatcherHandle>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, registry: RegistryHandle) -> Self {
        AppState {
            store,
            registry,
            dispatchers: DashMap::new(),
        }
    }

    /// Returns the dispatcher for `namespace`, spawning one if this is the
    /// first reference to it.
    pub fn dispatcher(&self, namespace: &str) -> DispatcherHandle {
        if let Some(existing) = self.dispatchers.get(namespace) {
            return existing.clone();
        }
        self.dispatchers
            .entry(namespace.to_string())
            .or_insert_with(|| DispatcherHandle::new(self.store.clone(), namespace.to_string()))
            .clone()
    }
}
