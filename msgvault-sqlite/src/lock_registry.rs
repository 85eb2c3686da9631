//! A per-namespace write mutex, generalized from
//! `thalo_message_store::lock_registry::LockRegistry` the same way
//! `msgvault-sled`'s registry is: spec §4.6 replaces the relational-procedure
//! backend's category-level advisory lock with a single process-local mutex
//! per namespace, since SQLite serializes writers per connection anyway.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct NamespaceLockRegistry {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl NamespaceLockRegistry {
    pub fn new() -> Self {
        NamespaceLockRegistry::default()
    }

    pub fn get(&self, namespace: &str) -> Arc<Mutex<()>> {
        match self.locks.get(namespace) {
            Some(lock) => Arc::clone(lock.value()),
            None => {
                let lock = Arc::new(Mutex::new(()));
                self.locks.insert(namespace.to_string(), Arc::clone(&lock));
                lock
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_namespace_returns_the_same_lock() {
        let registry = NamespaceLockRegistry::new();
        let a = registry.get("acme");
        let b = registry.get("acme");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_namespaces_get_different_locks() {
        let registry = NamespaceLockRegistry::new();
        let a = registry.get("acme");
        let b = registry.get("initech");
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
