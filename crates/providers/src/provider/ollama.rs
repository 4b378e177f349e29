//! Ollama adapter for locally hosted models.
//!
//! `/api/chat` streams newline-delimited JSON objects rather than SSE.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::http::{self, StreamParser};
use super::state::AdapterState;
use super::traits::{ChatProvider, ChunkReceiver};
use crate::errors::ProviderError;
use crate::models::{ChatMessage, ChatOptions, Chunk, CredentialField, ModelInfo, ProviderConfig, Usage};

const PROVIDER_NAME: &str = "ollama";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaProvider {
    client: reqwest::Client,
    state: AdapterState,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            state: AdapterState::new(vec![ModelInfo::new("llama3.2")]),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.state.base_url(DEFAULT_BASE_URL), path)
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "GenerationOptions::is_empty")]
    options: GenerationOptions,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize, Default)]
struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

impl GenerationOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.num_predict.is_none()
    }
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Default)]
struct NdjsonParser;

impl StreamParser for NdjsonParser {
    fn parse_line(&mut self, line: &str) -> Result<Vec<Chunk>, ProviderError> {
        let parsed: ChatLine = serde_json::from_str(line.trim())?;
        if let Some(error) = parsed.error {
            return Err(ProviderError::Api {
                status: 500,
                message: error,
            });
        }

        let mut chunks = Vec::new();
        if let Some(text) = parsed.message.map(|m| m.content).filter(|t| !t.is_empty()) {
            let mut chunk = Chunk::content(text);
            chunk.model = parsed.model.clone();
            chunks.push(chunk);
        }
        if parsed.done {
            let usage = Usage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            );
            let mut chunk = Chunk::finish(parsed.done_reason.unwrap_or_else(|| "stop".to_string()))
                .with_usage(usage);
            chunk.model = parsed.model;
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn display_name(&self) -> &str {
        "Ollama"
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        vec![CredentialField::input("base_url", "Server URL", false).with_placeholder(DEFAULT_BASE_URL)]
    }

    fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        self.state.merge(config, &self.credential_fields())
    }

    fn credentials(&self) -> ProviderConfig {
        self.state.credentials()
    }

    fn clear_credentials(&self) {
        self.state.clear();
    }

    async fn chat(
        &self,
        cancel: CancellationToken,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChunkReceiver, ProviderError> {
        let model = self.state.resolve_model(&options.model)?;
        let body = ChatRequest {
            model: &model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            options: GenerationOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };

        debug!("ollama: streaming {} messages to {}", messages.len(), model);
        let request = self.client.post(self.url("/api/chat")).json(&body);
        let response = http::send(&cancel, request).await?;
        Ok(http::spawn_reader(PROVIDER_NAME, response, cancel, NdjsonParser))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let response = self.client.get(self.url("/api/version")).send().await?;
        http::check_status(response).await.map(|_| ())
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let tags: TagList = http::check_status(response).await?.json().await?;
        Ok(tags.models.into_iter().map(|t| ModelInfo::new(t.name)).collect())
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.state.models()
    }

    fn set_models(&self, models: Vec<ModelInfo>) {
        self.state.set_models(models);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ndjson_stream() {
        let mut parser = NdjsonParser;
        let first = parser
            .parse_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":"He"},"done":false}"#)
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content, "He");

        let last = parser
            .parse_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop","prompt_eval_count":3,"eval_count":2}"#)
            .unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(last[0].usage.map(|u| u.effective_total()), Some(5));
    }

    #[test]
    fn test_ndjson_error_line() {
        let mut parser = NdjsonParser;
        let err = parser
            .parse_line(r#"{"error":"model 'nope' not found"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_ollama_needs_no_credentials() {
        let provider = OllamaProvider::new();
        assert!(provider.is_configured());
        assert_eq!(provider.url("/api/tags"), "http://localhost:11434/api/tags");
    }
}
