//! Chat and provider service configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for chat turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatConfig {
    /// Characters kept from the first user message when deriving a title.
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_max_chars: 50,
        }
    }
}

/// Configuration for the provider service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderServiceConfig {
    /// Upper bound on a connect/test validation round-trip.
    pub validation_timeout_secs: u64,
    /// Resource refresh cadence for providers without their own setting.
    pub default_refresh_interval_secs: u64,
}

impl ProviderServiceConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn default_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.default_refresh_interval_secs)
    }
}

impl Default for ProviderServiceConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: 12,
            default_refresh_interval_secs: 6 * 60 * 60,
        }
    }
}

/// Admin settings for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Overrides the default refresh cadence.
    pub refresh_interval_secs: Option<u64>,
    /// Model ids offered to users, in display order. Empty means all.
    pub enabled_models: Vec<String>,
}
