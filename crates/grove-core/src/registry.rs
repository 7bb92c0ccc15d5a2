//! # Store Registry
//!
//! Owned table of open stores keyed by handle. Handles are allocated
//! monotonically starting at 1 and are never reused, even after the store
//! holding one is freed.

use crate::backend::Backend;
use crate::engine::{EngineRegistry, GraphEngine};
use crate::primitives::FIRST_STORE_HANDLE;
use crate::store::{Store, StoreConfig};
use crate::{GroveError, StoreId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct RegistryInner {
    stores: Mutex<BTreeMap<StoreId, Arc<Store>>>,
    next_handle: AtomicU64,
}

impl RegistryInner {
    pub(crate) fn remove(&self, id: StoreId) {
        self.stores.lock().remove(&id);
    }
}

/// Registry of open stores. Clones share the same table.
#[derive(Clone)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                stores: Mutex::new(BTreeMap::new()),
                next_handle: AtomicU64::new(FIRST_STORE_HANDLE),
            }),
        }
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.inner.stores.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StoreRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store over `backend`, bound to `engine`.
    pub fn open(&self, engine: Arc<GraphEngine>, backend: Box<dyn Backend>) -> Arc<Store> {
        self.open_with_config(engine, backend, StoreConfig::default())
    }

    /// Open a store with explicit settings.
    pub fn open_with_config(
        &self,
        engine: Arc<GraphEngine>,
        backend: Box<dyn Backend>,
        config: StoreConfig,
    ) -> Arc<Store> {
        let id = StoreId(self.inner.next_handle.fetch_add(1, Ordering::SeqCst));
        let backend_type = backend.backend_type();
        let store = Arc::new(Store::new(
            id,
            Arc::clone(&engine),
            backend,
            config,
            Arc::downgrade(&self.inner),
        ));
        self.inner.stores.lock().insert(id, Arc::clone(&store));
        tracing::info!(store = %id, engine = %engine.key(), backend = backend_type, "store opened");
        store
    }

    /// Open a store bound to the engine registered under `key`.
    pub fn open_by_key(
        &self,
        engines: &EngineRegistry,
        key: &str,
        backend: Box<dyn Backend>,
    ) -> Result<Arc<Store>, GroveError> {
        Ok(self.open(engines.get(key)?, backend))
    }

    /// Look up an open store.
    #[must_use]
    pub fn get(&self, id: StoreId) -> Option<Arc<Store>> {
        self.inner.stores.lock().get(&id).cloned()
    }

    /// All open stores, by handle.
    #[must_use]
    pub fn stores(&self) -> Vec<Arc<Store>> {
        self.inner.stores.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.stores.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free the store with the given handle.
    pub fn free(&self, id: StoreId) -> Result<(), GroveError> {
        let store = self.get(id).ok_or(GroveError::StoreNotFound(id))?;
        store.free()
    }

    /// Free every open store. Every store is freed even when one fails;
    /// the first failure is returned.
    pub fn close(&self) -> Result<(), GroveError> {
        let stores = std::mem::take(&mut *self.inner.stores.lock());
        let count = stores.len();
        let mut first_error = None;
        for store in stores.into_values() {
            if let Err(e) = store.free() {
                tracing::warn!(store = %store.id(), error = %e, "store failed to free on close");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(stores = count, "store registry closed");
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::backend::VolatileBackend;
    use crate::engine::{EngineSpec, GraphEngine};
    use serde_json::json;

    fn engine() -> GraphEngine {
        let spec: EngineSpec = serde_json::from_value(json!({
            "key": "social",
            "top": "Top",
            "types": [
                { "name": "Directory", "relations": [{ "predicate": "Top", "target": "Directory" }] }
            ]
        }))
        .expect("spec");
        GraphEngine::new(spec).expect("engine")
    }

    #[test]
    fn handles_start_at_one_and_are_never_reused() {
        let registry = StoreRegistry::new();
        let engine = Arc::new(engine());
        let first = registry.open(Arc::clone(&engine), Box::new(VolatileBackend::new()));
        assert_eq!(first.id(), StoreId(1));
        registry.free(first.id()).expect("free");

        let second = registry.open(engine, Box::new(VolatileBackend::new()));
        assert_eq!(second.id(), StoreId(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn free_of_unknown_handle_is_not_found() {
        let registry = StoreRegistry::new();
        assert!(matches!(
            registry.free(StoreId(42)),
            Err(GroveError::StoreNotFound(StoreId(42)))
        ));
    }

    #[test]
    fn open_by_key_requires_a_loaded_engine() {
        let engines = EngineRegistry::new();
        let registry = StoreRegistry::new();
        assert!(matches!(
            registry.open_by_key(&engines, "social", Box::new(VolatileBackend::new())),
            Err(GroveError::EngineNotFound(_))
        ));

        engines.register(engine()).expect("register");
        let store = registry
            .open_by_key(&engines, "social", Box::new(VolatileBackend::new()))
            .expect("open");
        assert_eq!(store.engine().key(), "social");
    }

    #[test]
    fn close_frees_every_store() {
        let registry = StoreRegistry::new();
        let engine = Arc::new(engine());
        let a = registry.open(Arc::clone(&engine), Box::new(VolatileBackend::new()));
        let b = registry.open(engine, Box::new(VolatileBackend::new()));
        registry.close().expect("close");
        assert!(registry.is_empty());
        assert!(a.is_freed() && b.is_freed());
    }

    #[test]
    fn close_frees_the_rest_after_a_failure() {
        let registry = StoreRegistry::new();
        let engine = Arc::new(engine());
        let stale = registry.open(Arc::clone(&engine), Box::new(VolatileBackend::new()));
        let live = registry.open(engine, Box::new(VolatileBackend::new()));
        stale.free().expect("free");
        registry.inner.stores.lock().insert(stale.id(), Arc::clone(&stale));

        assert!(matches!(registry.close(), Err(GroveError::StoreFreed(StoreId(1)))));
        assert!(live.is_freed());
        assert!(registry.is_empty());
    }
}
