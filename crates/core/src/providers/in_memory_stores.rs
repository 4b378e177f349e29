//! In-memory provider stores for tests and standalone use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::providers_model::{ProviderInputs, ResourceCacheSnapshot};
use super::providers_traits::{ProviderCacheStore, ProviderInputsStore, ProviderSecretStore};
use crate::errors::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<(String, String), String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.secrets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProviderSecretStore for InMemorySecretStore {
    fn save_provider_secret(&self, provider: &str, field: &str, value: &str) -> Result<()> {
        lock(&self.secrets).insert((provider.to_string(), field.to_string()), value.to_string());
        Ok(())
    }

    fn get_provider_secret(&self, provider: &str, field: &str) -> Result<Option<String>> {
        Ok(lock(&self.secrets)
            .get(&(provider.to_string(), field.to_string()))
            .cloned())
    }

    fn delete_provider_secret(&self, provider: &str, field: &str) -> Result<()> {
        lock(&self.secrets).remove(&(provider.to_string(), field.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryInputsStore {
    inputs: Mutex<HashMap<String, ProviderInputs>>,
    saves: AtomicUsize,
}

impl InMemoryInputsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_provider_inputs` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl ProviderInputsStore for InMemoryInputsStore {
    fn load_provider_inputs(&self, provider: &str) -> Result<Option<ProviderInputs>> {
        Ok(lock(&self.inputs).get(provider).cloned())
    }

    fn save_provider_inputs(&self, provider: &str, inputs: &ProviderInputs) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        lock(&self.inputs).insert(provider.to_string(), inputs.clone());
        Ok(())
    }

    fn delete_provider_inputs(&self, provider: &str) -> Result<()> {
        lock(&self.inputs).remove(provider);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    snapshot: Mutex<ResourceCacheSnapshot>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: ResourceCacheSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

impl ProviderCacheStore for InMemoryCacheStore {
    fn load(&self) -> Result<ResourceCacheSnapshot> {
        Ok(lock(&self.snapshot).clone())
    }

    fn save(&self, snapshot: &ResourceCacheSnapshot) -> Result<()> {
        *lock(&self.snapshot) = snapshot.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ResourceCacheEntry;
    use switchboard_providers::ModelInfo;

    #[test]
    fn test_secret_store_roundtrip() {
        let store = InMemorySecretStore::new();
        assert!(!store.has_provider_secret("openai", "api_key").unwrap());
        store.save_provider_secret("openai", "api_key", "sk-1").unwrap();
        assert!(store.has_provider_secret("openai", "api_key").unwrap());
        assert!(!store.has_provider_secret("groq", "api_key").unwrap());
        store.delete_provider_secret("openai", "api_key").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_inputs_store_distinguishes_never_saved() {
        let store = InMemoryInputsStore::new();
        assert_eq!(store.load_provider_inputs("ollama").unwrap(), None);
        store
            .save_provider_inputs("ollama", &ProviderInputs::new())
            .unwrap();
        assert_eq!(
            store.load_provider_inputs("ollama").unwrap(),
            Some(ProviderInputs::new())
        );
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_cache_store_replaces_snapshot() {
        let store = InMemoryCacheStore::new();
        let mut snapshot = ResourceCacheSnapshot::new();
        snapshot.insert(
            "demo".to_string(),
            ResourceCacheEntry::new(vec![ModelInfo::new("m1")]),
        );
        store.save(&snapshot).unwrap();
        assert_eq!(store.load().unwrap(), snapshot);
    }
}
