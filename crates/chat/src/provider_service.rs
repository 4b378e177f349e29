//! Provider service - credential resolution, connection lifecycle and the
//! resource cache that sit between the registry and persistent stores.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use switchboard_core::events::EventEmitter;
use switchboard_core::providers::{
    ProviderCacheStore, ProviderInputs, ProviderInputsStore, ProviderSecretStore, ProviderStatus,
    ResourceCacheEntry,
};
use switchboard_providers::{
    ChatProvider, CredentialField, ModelInfo, ProviderConfig, ProviderError, ProviderRegistry,
};
use tokio::sync::Mutex;

use crate::config::{ProviderServiceConfig, ProviderSettings};
use crate::error::{ChatError, Result};
use crate::resource_cache::ResourceCache;

/// Name fragments that mark a value as a credential.
const SENSITIVE_PATTERNS: &[&str] = &["key", "secret", "token", "password"];

/// Provider state as shown on a settings screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub display_name: String,
    pub fields: Vec<CredentialField>,
    pub connected: bool,
    pub active: bool,
    pub models: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProviderStatus>,
}

/// Connects, validates and fails over between registered providers.
///
/// Everything that reconfigures an adapter (connect, configure, disconnect,
/// set_active, test, refresh and chat resolution) is serialised by one async
/// operation lock. `list()` only heals when the lock is free.
pub struct ProviderService {
    registry: Arc<ProviderRegistry>,
    secrets: Arc<dyn ProviderSecretStore>,
    inputs: Arc<dyn ProviderInputsStore>,
    cache_store: Arc<dyn ProviderCacheStore>,
    emitter: Arc<dyn EventEmitter>,
    config: ProviderServiceConfig,
    settings: RwLock<HashMap<String, ProviderSettings>>,
    statuses: RwLock<HashMap<String, ProviderStatus>>,
    resources: Arc<ResourceCache>,
    op_lock: Mutex<()>,
}

impl ProviderService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        secrets: Arc<dyn ProviderSecretStore>,
        inputs: Arc<dyn ProviderInputsStore>,
        cache_store: Arc<dyn ProviderCacheStore>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            registry,
            secrets,
            inputs,
            cache_store,
            emitter,
            config: ProviderServiceConfig::default(),
            settings: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            resources: Arc::new(ResourceCache::new()),
            op_lock: Mutex::new(()),
        }
    }

    pub fn with_config(mut self, config: ProviderServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    // ========================================================================
    // Startup
    // ========================================================================

    /// Load the persisted resource cache and configure every provider that
    /// has stored credentials.
    pub fn initialize(&self) -> Result<()> {
        match self.cache_store.load() {
            Ok(snapshot) => {
                for (name, entry) in snapshot {
                    if let Some(provider) = self.registry.get(&name) {
                        self.apply_models(provider.as_ref(), entry.models.clone());
                    }
                    self.resources.insert(&name, entry);
                }
            }
            Err(err) => warn!("Failed to load provider resource cache: {}", err),
        }

        for provider in self.registry.list() {
            if self.load_inputs(provider.name())?.is_none() {
                continue;
            }
            if let Err(err) = self.configure_from_store(provider.as_ref()) {
                warn!(
                    "Stored credentials for provider '{}' are unusable: {}",
                    provider.name(),
                    err
                );
            }
        }

        self.heal();
        Ok(())
    }

    // ========================================================================
    // Credential resolution
    // ========================================================================

    fn provider(&self, name: &str) -> Result<Arc<dyn ChatProvider>> {
        self.registry
            .get(name)
            .ok_or_else(|| ChatError::ProviderNotFound(name.to_string()))
    }

    fn load_inputs(&self, name: &str) -> Result<Option<ProviderInputs>> {
        Ok(self.inputs.load_provider_inputs(name)?)
    }

    /// Merge caller overrides over stored inputs and secrets.
    ///
    /// Values are trimmed and blanks dropped. Every required field must end
    /// up with a value.
    pub fn resolve_credentials(
        &self,
        provider: &dyn ChatProvider,
        overrides: &ProviderConfig,
    ) -> Result<ProviderConfig> {
        let name = provider.name();
        let stored_inputs = self.load_inputs(name)?.unwrap_or_default();
        let mut resolved = ProviderConfig::new();

        for field in provider.credential_fields() {
            let value = match overrides.get(&field.name) {
                Some(value) => Some(value.to_string()),
                None if field.secret => self
                    .secrets
                    .get_provider_secret(name, &field.name)?
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
                None => stored_inputs
                    .get(&field.name)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty()),
            };

            match value {
                Some(value) => resolved.values.insert(field.name.clone(), value),
                None if field.required => {
                    return Err(ChatError::MissingCredential(field.label.clone()));
                }
                None => None,
            };
        }

        Ok(resolved)
    }

    fn configure_from_store(&self, provider: &dyn ChatProvider) -> Result<()> {
        let resolved = self.resolve_credentials(provider, &ProviderConfig::new())?;
        provider.configure(&resolved)?;
        Ok(())
    }

    /// Whether `name` has stored credentials that still resolve.
    pub fn is_connected(&self, name: &str) -> bool {
        let Some(provider) = self.registry.get(name) else {
            return false;
        };
        matches!(self.load_inputs(name), Ok(Some(_)))
            && self
                .resolve_credentials(provider.as_ref(), &ProviderConfig::new())
                .is_ok()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Validate and store credentials, then make `name` the active provider.
    pub async fn connect(&self, name: &str, credentials: ProviderConfig) -> Result<()> {
        self.apply(name, &credentials, true).await
    }

    /// Validate and store credentials without changing the active provider.
    pub async fn configure(&self, name: &str, credentials: ProviderConfig) -> Result<()> {
        self.apply(name, &credentials, false).await
    }

    async fn apply(&self, name: &str, overrides: &ProviderConfig, activate: bool) -> Result<()> {
        let provider = self.provider(name)?;
        let _op = self.op_lock.lock().await;

        let resolved = match self
            .resolve_credentials(provider.as_ref(), overrides)
            .and_then(|resolved| {
                check_sensitive(&provider.credential_fields(), &resolved)?;
                Ok(resolved)
            }) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!("Rejected credentials for provider '{}': {}", name, err);
                self.record_failure(name, &err.to_string());
                return Err(err);
            }
        };

        let previous = provider.credentials();
        provider.clear_credentials();
        if let Err(err) = provider.configure(&resolved) {
            self.rollback(provider.as_ref(), &previous, &err.to_string());
            return Err(err.into());
        }

        let discovered = match self.validate(provider.as_ref()).await {
            Ok(models) => models,
            Err(err) => {
                warn!("Validation failed for provider '{}': {}", name, err);
                self.rollback(provider.as_ref(), &previous, &err.to_string());
                return Err(err.into());
            }
        };

        if let Err(err) = self.persist(provider.as_ref(), &resolved) {
            warn!("Failed to store credentials for provider '{}': {}", name, err);
            self.rollback(provider.as_ref(), &previous, &err.to_string());
            return Err(err);
        }

        if let Some(models) = discovered {
            self.store_resources(provider.as_ref(), models);
        }
        if activate {
            self.registry.set_active(name)?;
        }
        self.set_status(name, ProviderStatus::ok());
        info!(
            "Provider '{}' {}",
            name,
            if activate { "connected" } else { "configured" }
        );
        self.emitter.emit_providers_updated();
        Ok(())
    }

    fn rollback(&self, provider: &dyn ChatProvider, previous: &ProviderConfig, message: &str) {
        provider.clear_credentials();
        if let Err(err) = provider.configure(previous) {
            warn!(
                "Failed to restore previous credentials for provider '{}': {}",
                provider.name(),
                err
            );
        }
        self.record_failure(provider.name(), message);
    }

    fn record_failure(&self, name: &str, message: &str) {
        self.set_status(name, ProviderStatus::failed(message));
        self.emitter.emit_providers_updated();
    }

    /// Probe the provider under the validation timeout.
    ///
    /// Returns the discovered models when the provider supports listing.
    async fn validate(
        &self,
        provider: &dyn ChatProvider,
    ) -> std::result::Result<Option<Vec<ModelInfo>>, ProviderError> {
        let probe = async {
            if provider.supports_model_listing() {
                provider.list_models().await.map(Some)
            } else {
                provider.test_connection().await.map(|_| None)
            }
        };
        match tokio::time::timeout(self.config.validation_timeout(), probe).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        }
    }

    fn persist(&self, provider: &dyn ChatProvider, resolved: &ProviderConfig) -> Result<()> {
        let name = provider.name();
        let mut inputs = ProviderInputs::new();
        for field in provider.credential_fields() {
            let Some(value) = resolved.get(&field.name) else {
                continue;
            };
            if field.secret {
                self.secrets
                    .save_provider_secret(name, &field.name, value)?;
            } else {
                inputs.insert(field.name.clone(), value.to_string());
            }
        }
        // An inputs record marks the provider as connected, even when empty.
        self.inputs.save_provider_inputs(name, &inputs)?;
        Ok(())
    }

    /// Forget stored credentials and cached resources for `name`.
    ///
    /// When `name` was active, the next connected provider after it in
    /// registration order takes over.
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        let provider = self.provider(name)?;
        let _op = self.op_lock.lock().await;

        for field in provider.credential_fields().iter().filter(|f| f.secret) {
            self.secrets.delete_provider_secret(name, &field.name)?;
        }
        self.inputs.delete_provider_inputs(name)?;
        provider.clear_credentials();

        if self.resources.remove(name).is_some() {
            self.persist_cache();
        }
        self.write_statuses().remove(name);

        if self.registry.get_active().as_deref() == Some(name) {
            match self.next_connected_after(name) {
                Some(next) => {
                    info!("Active provider '{}' disconnected, failing over to '{}'", name, next);
                    self.registry.set_active(&next)?;
                }
                None => {
                    info!("Active provider '{}' disconnected, none left", name);
                    self.registry.set_active("")?;
                }
            }
        }

        info!("Provider '{}' disconnected", name);
        self.emitter.emit_providers_updated();
        Ok(())
    }

    fn next_connected_after(&self, name: &str) -> Option<String> {
        let names = self.registry.names();
        let start = names.iter().position(|n| n == name)?;
        (1..names.len())
            .map(|offset| &names[(start + offset) % names.len()])
            .find(|candidate| self.restore_connected(candidate))
            .cloned()
    }

    /// Configure `name` from storage if it is connected.
    fn restore_connected(&self, name: &str) -> bool {
        if !self.is_connected(name) {
            return false;
        }
        match self.registry.get(name) {
            Some(provider) => self.configure_from_store(provider.as_ref()).is_ok(),
            None => false,
        }
    }

    pub async fn set_active(&self, name: &str) -> Result<()> {
        let _op = self.op_lock.lock().await;
        if !name.trim().is_empty() && !self.registry.contains(name.trim()) {
            return Err(ChatError::ProviderNotFound(name.to_string()));
        }
        self.registry.set_active(name)?;
        self.emitter.emit_providers_updated();
        Ok(())
    }

    pub fn get_active(&self) -> Option<String> {
        self.registry.get_active()
    }

    /// Re-check connectivity with the stored credentials and record the outcome.
    pub async fn test_connection(&self, name: &str) -> Result<ProviderStatus> {
        let provider = self.provider(name)?;
        let _op = self.op_lock.lock().await;
        if let Err(err) = self.configure_from_store(provider.as_ref()) {
            warn!("Stored credentials for provider '{}' are unusable: {}", name, err);
            self.record_failure(name, &err.to_string());
            return Err(err);
        }

        let status = match self.validate(provider.as_ref()).await {
            Ok(_) => ProviderStatus::ok(),
            Err(err) => {
                warn!("Connection test failed for provider '{}': {}", name, err);
                ProviderStatus::failed(err.to_string())
            }
        };
        self.set_status(name, status.clone());
        self.emitter.emit_providers_updated();
        Ok(status)
    }

    // ========================================================================
    // Status and settings
    // ========================================================================

    fn read_statuses(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderStatus>> {
        self.statuses.read().unwrap_or_else(|poisoned| {
            warn!("Provider status lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_statuses(&self) -> RwLockWriteGuard<'_, HashMap<String, ProviderStatus>> {
        self.statuses.write().unwrap_or_else(|poisoned| {
            warn!("Provider status lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn set_status(&self, name: &str, status: ProviderStatus) {
        self.write_statuses().insert(name.to_string(), status);
    }

    pub fn status(&self, name: &str) -> Option<ProviderStatus> {
        self.read_statuses().get(name).cloned()
    }

    fn read_settings(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderSettings>> {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn provider_settings(&self, name: &str) -> ProviderSettings {
        self.read_settings().get(name).cloned().unwrap_or_default()
    }

    /// Replace admin settings for `name` and re-apply cached models.
    pub fn set_provider_settings(&self, name: &str, settings: ProviderSettings) -> Result<()> {
        let provider = self.provider(name)?;
        self.settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), settings);
        if let Some(entry) = self.resources.get(name) {
            self.apply_models(provider.as_ref(), entry.models);
        }
        self.emitter.emit_providers_updated();
        Ok(())
    }

    fn refresh_interval(&self, name: &str) -> Duration {
        self.provider_settings(name)
            .refresh_interval_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_refresh_interval())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    fn persist_cache(&self) {
        if let Err(err) = self.cache_store.save(&self.resources.snapshot()) {
            warn!("Failed to persist provider resource cache: {}", err);
        }
    }

    fn store_resources(&self, provider: &dyn ChatProvider, models: Vec<ModelInfo>) {
        debug!(
            "Caching {} models for provider '{}'",
            models.len(),
            provider.name()
        );
        self.resources
            .insert(provider.name(), ResourceCacheEntry::new(models.clone()));
        self.persist_cache();
        self.apply_models(provider, models);
        self.emitter.emit_catalog_updated();
    }

    /// Advertise `models` on the adapter, filtered and ordered by the
    /// provider's enabled subset.
    fn apply_models(&self, provider: &dyn ChatProvider, models: Vec<ModelInfo>) {
        let enabled = self.provider_settings(provider.name()).enabled_models;
        let models: Vec<ModelInfo> = if enabled.is_empty() {
            models
        } else {
            enabled
                .iter()
                .filter_map(|id| models.iter().find(|m| &m.id == id).cloned())
                .collect()
        };
        if models.is_empty() {
            debug!("No models to advertise for provider '{}'", provider.name());
            return;
        }
        provider.set_models(models);
    }

    /// Fetch models for `name` and store them.
    ///
    /// Returns `Ok(false)` without calling the provider when a refresh for
    /// `name` is already in flight or the provider cannot list models.
    pub async fn refresh_resources(&self, name: &str) -> Result<bool> {
        let provider = self.provider(name)?;
        let Some(_refreshing) = self.resources.try_begin_refresh(name) else {
            debug!("Refresh already in flight for provider '{}'", name);
            return Ok(false);
        };
        let _op = self.op_lock.lock().await;
        self.refresh_locked(provider.as_ref()).await
    }

    async fn refresh_locked(&self, provider: &dyn ChatProvider) -> Result<bool> {
        if !provider.supports_model_listing() {
            return Ok(false);
        }
        let listed = match tokio::time::timeout(
            self.config.validation_timeout(),
            provider.list_models(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        match listed {
            Ok(models) => {
                self.store_resources(provider, models);
                self.set_status(provider.name(), ProviderStatus::ok());
                Ok(true)
            }
            Err(err) => {
                warn!(
                    "Resource refresh failed for provider '{}': {}",
                    provider.name(),
                    err
                );
                self.set_status(provider.name(), ProviderStatus::failed(err.to_string()));
                self.resources.record_failure(provider.name());
                Err(err.into())
            }
        }
    }

    /// Spawn a background refresh when `name`'s cache is stale.
    pub fn spawn_refresh_if_stale(self: &Arc<Self>, name: &str) {
        let Some(provider) = self.registry.get(name) else {
            return;
        };
        if !provider.supports_model_listing() || !provider.is_configured() {
            return;
        }
        if self.resources.is_refreshing(name)
            || !self.resources.is_stale(name, self.refresh_interval(name))
        {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available, skipping refresh for provider '{}'", name);
            return;
        };

        let service = Arc::clone(self);
        let name = name.to_string();
        handle.spawn(async move {
            if let Err(err) = service.refresh_resources(&name).await {
                warn!("Background refresh for provider '{}' failed: {}", name, err);
            }
        });
    }

    // ========================================================================
    // Listing and chat resolution
    // ========================================================================

    /// Every registered provider, in registration order.
    ///
    /// Heals the active selection first and kicks off refreshes for stale
    /// caches.
    pub fn list(self: &Arc<Self>) -> Vec<ProviderInfo> {
        self.heal();
        let active = self.registry.get_active();

        self.registry
            .list()
            .into_iter()
            .map(|provider| {
                let name = provider.name().to_string();
                let connected = self.is_connected(&name);
                if connected {
                    self.spawn_refresh_if_stale(&name);
                }
                ProviderInfo {
                    display_name: provider.display_name().to_string(),
                    fields: provider.credential_fields(),
                    connected,
                    active: active.as_deref() == Some(name.as_str()),
                    models: provider.models(),
                    status: self.status(&name),
                    name,
                }
            })
            .collect()
    }

    /// Make sure the active provider is usable, else pick the first one that is.
    ///
    /// Skipped while another operation holds the lock; the next call heals.
    fn heal(&self) {
        let Ok(_op) = self.op_lock.try_lock() else {
            debug!("Provider operation in flight, skipping heal");
            return;
        };

        let active = self.registry.get_active();
        if let Some(active) = active.as_deref() {
            if self.is_connected(active) {
                return;
            }
        }

        let replacement = self
            .registry
            .names()
            .into_iter()
            .find(|name| self.restore_connected(name));

        match (active, replacement) {
            (_, Some(next)) => {
                info!("Healing active provider selection to '{}'", next);
                if self.registry.set_active(&next).is_ok() {
                    self.emitter.emit_providers_updated();
                }
            }
            (Some(stale), None) => {
                info!("Active provider '{}' is no longer usable, clearing", stale);
                if self.registry.set_active("").is_ok() {
                    self.emitter.emit_providers_updated();
                }
            }
            (None, None) => {}
        }
    }

    /// Configured provider for a chat turn.
    ///
    /// Waits for any in-flight connect so the adapter is never reconfigured
    /// underneath a validation.
    pub async fn resolve_for_chat(self: &Arc<Self>, name: &str) -> Result<Arc<dyn ChatProvider>> {
        let provider = self.provider(name)?;
        {
            let _op = self.op_lock.lock().await;
            self.configure_from_store(provider.as_ref())?;
        }
        self.spawn_refresh_if_stale(name);
        Ok(provider)
    }
}

/// Reject secret-looking values bound for plain (non-secret) storage.
fn check_sensitive(fields: &[CredentialField], resolved: &ProviderConfig) -> Result<()> {
    for field in fields.iter().filter(|f| !f.secret) {
        let Some(value) = resolved.get(&field.name) else {
            continue;
        };
        if looks_sensitive(&field.name, value) {
            return Err(ChatError::SensitiveInput(field.name.clone()));
        }
    }
    Ok(())
}

fn looks_sensitive(name: &str, value: &str) -> bool {
    let name = name.to_ascii_lowercase();
    if SENSITIVE_PATTERNS.iter().any(|p| name.contains(p)) {
        return true;
    }
    // Credentials smuggled into an endpoint's query string.
    let value = value.to_ascii_lowercase();
    value
        .split(['?', '&'])
        .skip(1)
        .filter_map(|param| param.split('=').next())
        .any(|param| SENSITIVE_PATTERNS.iter().any(|p| param.contains(p)))
}
