use super::providers_model::{ProviderInputs, ResourceCacheSnapshot};
use crate::errors::Result;

/// Storage for secret credential values (API keys, tokens).
///
/// Implementations typically wrap the OS keychain. Values must never be
/// logged.
pub trait ProviderSecretStore: Send + Sync {
    fn save_provider_secret(&self, provider: &str, field: &str, value: &str) -> Result<()>;
    fn get_provider_secret(&self, provider: &str, field: &str) -> Result<Option<String>>;
    fn delete_provider_secret(&self, provider: &str, field: &str) -> Result<()>;

    fn has_provider_secret(&self, provider: &str, field: &str) -> Result<bool> {
        Ok(self
            .get_provider_secret(provider, field)?
            .is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Storage for non-secret credential values (endpoints, organization ids).
pub trait ProviderInputsStore: Send + Sync {
    /// `None` when nothing was ever saved for `provider`.
    fn load_provider_inputs(&self, provider: &str) -> Result<Option<ProviderInputs>>;
    fn save_provider_inputs(&self, provider: &str, inputs: &ProviderInputs) -> Result<()>;
    fn delete_provider_inputs(&self, provider: &str) -> Result<()>;
}

/// Persistence for the provider resource cache, saved as one snapshot.
pub trait ProviderCacheStore: Send + Sync {
    fn load(&self) -> Result<ResourceCacheSnapshot>;
    fn save(&self, snapshot: &ResourceCacheSnapshot) -> Result<()>;
}
