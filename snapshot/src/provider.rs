//! State provider protocol and registry
//!
//! A state provider owns one namespace's in-memory state. The engine asks
//! it for the current bytes of each of its keys when taking a snapshot and
//! hands payloads back to it on restore.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vellum_core::SnapshotResult;

use crate::payload::{Namespace, Payload};

/// Providers created while producing or loading state, to be registered
/// with the engine.
pub type Generated = Vec<Arc<dyn StateProvider>>;

/// Owner of one namespace's state.
///
/// `get_state` is called concurrently for different keys and must not race
/// with the provider's own mutations.
#[async_trait]
pub trait StateProvider: Send + Sync {
    fn namespace(&self) -> Namespace;

    /// Keys this provider populates inside its namespace
    fn keys(&self) -> Vec<String>;

    /// Current wire bytes of `key` (empty when there is no state) and any
    /// providers created along the way
    async fn get_state(&self, key: &str) -> SnapshotResult<(Vec<u8>, Generated)>;

    /// Restore state from `payload`, returning providers that now exist
    async fn load_state(&self, payload: &Payload) -> SnapshotResult<Generated>;

    /// A stopped provider's nodes are dropped from the next snapshot
    fn stopped(&self) -> bool {
        false
    }

    /// Called once before any payload is restored
    async fn on_state_load_starts(&self) -> SnapshotResult<()> {
        Ok(())
    }

    /// Called once after every payload has been restored
    async fn on_state_loaded(&self) -> SnapshotResult<()> {
        Ok(())
    }
}

#[derive(Clone)]
struct Registered {
    provider: Arc<dyn StateProvider>,
    key: String,
}

/// Maps tree keys to the provider owning them
#[derive(Default)]
pub struct ProviderRegistry {
    namespaces: Vec<Namespace>,
    ns_keys: HashMap<Namespace, Vec<String>>,
    by_tree_key: HashMap<String, Registered>,
    providers: Vec<Arc<dyn StateProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider`, returning the tree keys it newly claimed.
    ///
    /// Keys already owned by another provider of the same namespace stay
    /// with the first owner. A provider that claims nothing new is not
    /// registered.
    pub fn add(&mut self, provider: Arc<dyn StateProvider>) -> Vec<String> {
        let ns = provider.namespace();
        if ns == Namespace::AppState {
            warn!("Ignoring state provider for the reserved app namespace");
            return Vec::new();
        }

        let mut added = Vec::new();
        for key in provider.keys() {
            let tree_key = ns.tree_key(&key);
            if self.by_tree_key.contains_key(&tree_key) || added.contains(&tree_key) {
                continue;
            }
            self.by_tree_key.insert(
                tree_key.clone(),
                Registered {
                    provider: provider.clone(),
                    key,
                },
            );
            added.push(tree_key);
        }
        if added.is_empty() {
            return added;
        }

        if !self.ns_keys.contains_key(&ns) {
            self.namespaces.push(ns);
        }
        self.ns_keys.entry(ns).or_default().extend(added.iter().cloned());
        self.providers.push(provider);
        debug!("Registered provider for {} with keys {:?}", ns, added);
        added
    }

    /// Provider and provider-local key owning `tree_key`
    pub fn get(&self, tree_key: &str) -> Option<(Arc<dyn StateProvider>, String)> {
        self.by_tree_key
            .get(tree_key)
            .map(|r| (r.provider.clone(), r.key.clone()))
    }

    /// Forget `tree_key`; the provider itself stays registered
    pub fn remove(&mut self, tree_key: &str) {
        let Some(registered) = self.by_tree_key.remove(tree_key) else {
            return;
        };
        let ns = registered.provider.namespace();
        if let Some(keys) = self.ns_keys.get_mut(&ns) {
            keys.retain(|k| k != tree_key);
        }
        let still_owns = self
            .by_tree_key
            .values()
            .any(|r| Arc::ptr_eq(&r.provider, &registered.provider));
        if !still_owns {
            self.providers.retain(|p| !Arc::ptr_eq(p, &registered.provider));
        }
    }

    /// Every registered tree key, namespace by namespace in registration order
    pub fn tree_keys(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .filter_map(|ns| self.ns_keys.get(ns))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    /// Registered providers in registration order
    pub fn providers(&self) -> &[Arc<dyn StateProvider>] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.by_tree_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tree_key.is_empty()
    }
}
