//! Directory of configured providers.

use super::{GatewayId, GatewayProvider};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type ProviderMap = HashMap<GatewayId, Arc<dyn GatewayProvider>>;

/// Provider directory, written at startup and read concurrently afterwards.
///
/// Reads clone an `Arc` snapshot under a short read lock; writes build a
/// new map and swap it in, so readers never observe a half-applied change.
#[derive(Default)]
pub struct GatewayRegistry {
    providers: RwLock<Arc<ProviderMap>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<ProviderMap> {
        self.providers.read().clone()
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ProviderMap),
    {
        let mut guard = self.providers.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    /// Add a provider, replacing any previous one with the same id
    pub fn register(&self, provider: Arc<dyn GatewayProvider>) {
        let id = provider.id();
        tracing::debug!(gateway = %id, "Registering gateway provider");
        self.update(|map| {
            map.insert(id, provider);
        });
    }

    /// Remove a provider, returning whether it was registered
    pub fn unregister(&self, id: GatewayId) -> bool {
        let mut removed = false;
        self.update(|map| removed = map.remove(&id).is_some());
        removed
    }

    pub fn get(&self, id: GatewayId) -> Option<Arc<dyn GatewayProvider>> {
        self.snapshot().get(&id).cloned()
    }

    /// Every provider, ordered by id
    pub fn get_all(&self) -> Vec<Arc<dyn GatewayProvider>> {
        let snapshot = self.snapshot();
        let mut providers: Vec<_> = snapshot.values().cloned().collect();
        providers.sort_by_key(|p| p.id());
        providers
    }

    /// Registered ids, ordered
    pub fn ids(&self) -> Vec<GatewayId> {
        let mut ids: Vec<_> = self.snapshot().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, id: GatewayId) -> bool {
        self.snapshot().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn clear(&self) {
        *self.providers.write() = Arc::new(HashMap::new());
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}
