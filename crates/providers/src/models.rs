//! Provider-facing request, response and schema types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::ProviderError;

/// Capacity of the hand-off queue between an adapter's reader task and the consumer.
///
/// The adapter blocks when the consumer falls this far behind.
pub const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Role of a message sent to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// A plain-text message in provider round-trip form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    /// Model id to use. Adapters fall back to their first advertised model when empty.
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// Zero when the provider did not report a total.
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: 0,
        }
    }

    /// Reported total, or prompt + completion when the provider omitted it.
    pub fn effective_total(&self) -> u32 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.prompt_tokens.saturating_add(self.completion_tokens)
        }
    }
}

/// One incremental unit of a streaming model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    pub error: Option<ProviderError>,
}

impl Chunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Default::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn error(error: ProviderError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Whether the producer closes the stream after this chunk.
    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.finish_reason.is_some()
    }
}

/// Schema entry for one credential a provider needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialField {
    pub name: String,
    pub label: String,
    pub required: bool,
    /// Secret values live in the secret store and are never written to plain inputs.
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl CredentialField {
    pub fn secret(name: &str, label: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            required,
            secret: true,
            placeholder: None,
        }
    }

    pub fn input(name: &str, label: &str, required: bool) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            required,
            secret: false,
            placeholder: None,
        }
    }

    pub fn with_placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }
}

/// Credential and endpoint values handed to [`ChatProvider::configure`](crate::ChatProvider::configure).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }

    /// Non-blank value for `name`, trimmed.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.trim().is_empty())
    }
}

impl From<BTreeMap<String, String>> for ProviderConfig {
    fn from(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }
}

/// A model advertised by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}
