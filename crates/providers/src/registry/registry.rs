//! Registry of configured chat providers.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};

use crate::errors::ProviderError;
use crate::provider::ChatProvider;

#[derive(Default)]
struct RegistryState {
    providers: Vec<Arc<dyn ChatProvider>>,
    active: Option<String>,
}

/// Name-keyed provider registry.
///
/// Iteration order is registration order, which also defines the failover
/// order used when the active provider is disconnected.
#[derive(Default)]
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with `providers`, in order.
    pub fn with_providers(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        let registry = Self::new();
        for provider in providers {
            registry.register(provider);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Provider registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Provider registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Add a provider. Re-registering a name replaces it in place.
    pub fn register(&self, provider: Arc<dyn ChatProvider>) {
        let mut state = self.write();
        let name = provider.name().to_string();
        match state.providers.iter().position(|p| p.name() == name) {
            Some(index) => {
                debug!("Replacing provider '{}'", name);
                state.providers[index] = provider;
            }
            None => {
                debug!("Registering provider '{}'", name);
                state.providers.push(provider);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.read()
            .providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// All providers in registration order.
    pub fn list(&self) -> Vec<Arc<dyn ChatProvider>> {
        self.read().providers.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.read()
            .providers
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.read().providers.iter().position(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.read().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().providers.is_empty()
    }

    pub fn get_active(&self) -> Option<String> {
        self.read().active.clone()
    }

    /// The active provider, if one is set and still registered.
    pub fn active_provider(&self) -> Option<Arc<dyn ChatProvider>> {
        let state = self.read();
        let active = state.active.as_deref()?;
        state.providers.iter().find(|p| p.name() == active).cloned()
    }

    /// Mark `name` as active. An empty name clears the selection.
    pub fn set_active(&self, name: &str) -> Result<(), ProviderError> {
        let name = name.trim();
        let mut state = self.write();
        if name.is_empty() {
            if let Some(previous) = state.active.take() {
                info!("Cleared active provider (was '{}')", previous);
            }
            return Ok(());
        }
        if !state.providers.iter().any(|p| p.name() == name) {
            return Err(ProviderError::InvalidConfig(format!(
                "Unknown provider: {}",
                name
            )));
        }
        if state.active.as_deref() != Some(name) {
            info!("Active provider set to '{}'", name);
            state.active = Some(name.to_string());
        }
        Ok(())
    }
}
