//! In-memory credential and model state shared by the adapters.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;

use crate::errors::ProviderError;
use crate::models::{CredentialField, ModelInfo, ProviderConfig};

/// Name of the optional endpoint override field.
pub(crate) const BASE_URL_FIELD: &str = "base_url";

pub(crate) struct AdapterState {
    credentials: RwLock<ProviderConfig>,
    models: RwLock<Vec<ModelInfo>>,
}

impl AdapterState {
    pub(crate) fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            credentials: RwLock::new(ProviderConfig::default()),
            models: RwLock::new(models),
        }
    }

    fn read_credentials(&self) -> RwLockReadGuard<'_, ProviderConfig> {
        self.credentials.read().unwrap_or_else(|poisoned| {
            warn!("Provider credential lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_credentials(&self) -> RwLockWriteGuard<'_, ProviderConfig> {
        self.credentials.write().unwrap_or_else(|poisoned| {
            warn!("Provider credential lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Merge the non-blank values of `config` that belong to `fields`.
    pub(crate) fn merge(
        &self,
        config: &ProviderConfig,
        fields: &[CredentialField],
    ) -> Result<(), ProviderError> {
        if let Some(url) = config.get(BASE_URL_FIELD) {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ProviderError::InvalidConfig(format!(
                    "base_url must start with http:// or https://, got '{}'",
                    url
                )));
            }
        }

        let mut current = self.write_credentials();
        for field in fields {
            if let Some(value) = config.get(&field.name) {
                current
                    .values
                    .insert(field.name.clone(), value.to_string());
            }
        }
        Ok(())
    }

    pub(crate) fn credentials(&self) -> ProviderConfig {
        self.read_credentials().clone()
    }

    pub(crate) fn clear(&self) {
        self.write_credentials().values.clear();
    }

    pub(crate) fn get(&self, name: &str) -> Option<String> {
        self.read_credentials().get(name).map(str::to_string)
    }

    /// Value of a required field, or the error naming its label.
    pub(crate) fn require(&self, field: &CredentialField) -> Result<String, ProviderError> {
        self.get(&field.name)
            .ok_or_else(|| ProviderError::MissingCredential(field.label.clone()))
    }

    /// Configured endpoint with trailing slashes removed.
    pub(crate) fn base_url(&self, default: &str) -> String {
        self.get(BASE_URL_FIELD)
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub(crate) fn models(&self) -> Vec<ModelInfo> {
        self.models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_models(&self, models: Vec<ModelInfo>) {
        *self
            .models
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = models;
    }

    /// Requested model, or the first advertised one.
    pub(crate) fn resolve_model(&self, requested: &str) -> Result<String, ProviderError> {
        let requested = requested.trim();
        if !requested.is_empty() {
            return Ok(requested.to_string());
        }
        self.models()
            .first()
            .map(|m| m.id.clone())
            .ok_or_else(|| ProviderError::InvalidConfig("No model selected".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<CredentialField> {
        vec![
            CredentialField::secret("api_key", "API Key", true),
            CredentialField::input("base_url", "Base URL", false),
        ]
    }

    #[test]
    fn test_merge_keeps_existing_values_on_blank() {
        let state = AdapterState::new(vec![]);
        state
            .merge(&ProviderConfig::new().with("api_key", "sk-1"), &fields())
            .unwrap();
        state
            .merge(&ProviderConfig::new().with("api_key", "  "), &fields())
            .unwrap();
        assert_eq!(state.get("api_key").as_deref(), Some("sk-1"));
    }

    #[test]
    fn test_merge_ignores_unknown_fields() {
        let state = AdapterState::new(vec![]);
        state
            .merge(&ProviderConfig::new().with("region", "eu"), &fields())
            .unwrap();
        assert!(state.credentials().values.is_empty());
    }

    #[test]
    fn test_merge_rejects_bad_base_url() {
        let state = AdapterState::new(vec![]);
        let result = state.merge(
            &ProviderConfig::new().with("base_url", "localhost:11434"),
            &fields(),
        );
        assert!(matches!(result, Err(ProviderError::InvalidConfig(_))));
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let state = AdapterState::new(vec![]);
        state
            .merge(
                &ProviderConfig::new().with("base_url", "http://localhost:1234/v1/"),
                &fields(),
            )
            .unwrap();
        assert_eq!(state.base_url("https://x"), "http://localhost:1234/v1");
    }

    #[test]
    fn test_resolve_model_falls_back_to_first_advertised() {
        let state = AdapterState::new(vec![ModelInfo::new("m1"), ModelInfo::new("m2")]);
        assert_eq!(state.resolve_model("").unwrap(), "m1");
        assert_eq!(state.resolve_model("m2").unwrap(), "m2");
        state.set_models(vec![]);
        assert!(state.resolve_model(" ").is_err());
    }
}
