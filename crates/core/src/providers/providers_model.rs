use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use switchboard_providers::ModelInfo;

use crate::utils::time_utils::now_millis;

/// Non-secret credential values for one provider, by field name.
pub type ProviderInputs = BTreeMap<String, String>;

/// Cached resources for every provider, keyed by provider name.
pub type ResourceCacheSnapshot = HashMap<String, ResourceCacheEntry>;

/// Models discovered for a provider and when they were fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCacheEntry {
    pub models: Vec<ModelInfo>,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl ResourceCacheEntry {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self {
            models,
            updated_at: now_millis(),
        }
    }
}

/// Outcome of the last connectivity check for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: i64,
}

impl ProviderStatus {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
            checked_at: now_millis(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            checked_at: now_millis(),
        }
    }
}
