//! OpenAI chat completions adapter.
//!
//! Speaks the `/chat/completions` SSE protocol, so it also works against
//! OpenAI-compatible endpoints (OpenRouter, LM Studio, vLLM) through
//! [`OpenAiProvider::compatible`] and the `base_url` field.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::http::{self, sse_data, StreamParser};
use super::state::AdapterState;
use super::traits::{ChatProvider, ChunkReceiver};
use crate::errors::ProviderError;
use crate::models::{
    ChatMessage, ChatOptions, Chunk, CredentialField, ModelInfo, ProviderConfig, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    name: String,
    display_name: String,
    default_base_url: String,
    client: reqwest::Client,
    state: AdapterState,
}

impl OpenAiProvider {
    pub fn new() -> Self {
        Self::compatible("openai", "OpenAI", DEFAULT_BASE_URL)
    }

    /// An adapter for another endpoint that speaks the same protocol.
    pub fn compatible(name: &str, display_name: &str, default_base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            default_base_url: default_base_url.to_string(),
            client: reqwest::Client::new(),
            state: AdapterState::new(vec![
                ModelInfo::new("gpt-4o-mini"),
                ModelInfo::new("gpt-4o"),
            ]),
        }
    }

    fn api_key_field() -> CredentialField {
        CredentialField::secret("api_key", "API Key", true).with_placeholder("sk-...")
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.state.require(&Self::api_key_field())?;
        let mut request = request.bearer_auth(key);
        if let Some(org) = self.state.get("organization") {
            request = request.header("OpenAI-Organization", org);
        }
        Ok(request)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.state.base_url(&self.default_base_url), path)
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct CompletionFrame {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<FrameChoice>,
    #[serde(default)]
    usage: Option<FrameUsage>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Deserialize)]
struct FrameChoice {
    #[serde(default)]
    delta: FrameDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct FrameDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct FrameUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct FrameError {
    message: String,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Parser for `/chat/completions` SSE frames.
///
/// `finish_reason` arrives before the usage frame, so the terminal chunk is
/// held back until `[DONE]` (or end of body).
#[derive(Default)]
struct CompletionStreamParser {
    model: Option<String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl CompletionStreamParser {
    fn terminal(&mut self) -> Chunk {
        let mut chunk = Chunk::finish(self.finish_reason.take().unwrap_or_else(|| "stop".into()));
        chunk.model = self.model.clone();
        chunk.usage = self.usage.take();
        chunk
    }
}

impl StreamParser for CompletionStreamParser {
    fn parse_line(&mut self, line: &str) -> Result<Vec<Chunk>, ProviderError> {
        let Some(data) = sse_data(line) else {
            return Ok(Vec::new());
        };
        if data == "[DONE]" {
            return Ok(vec![self.terminal()]);
        }

        let frame: CompletionFrame = serde_json::from_str(data)?;
        if let Some(error) = frame.error {
            return Err(ProviderError::Api {
                status: 500,
                message: error.message,
            });
        }
        if frame.model.is_some() {
            self.model = frame.model;
        }
        if let Some(usage) = frame.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let mut chunks = Vec::new();
        for choice in frame.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                let mut chunk = Chunk::content(text);
                chunk.model = self.model.clone();
                chunks.push(chunk);
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        Ok(chunks)
    }

    fn finish(&mut self) -> Option<Chunk> {
        self.finish_reason.is_some().then(|| self.terminal())
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        vec![
            Self::api_key_field(),
            CredentialField::input("base_url", "Base URL", false)
                .with_placeholder(&self.default_base_url),
            CredentialField::input("organization", "Organization ID", false),
        ]
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
        let body = CompletionRequest {
            model: &model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        debug!("{}: streaming {} messages to {}", self.name, messages.len(), model);
        let request = self
            .authorized(self.client.post(self.url("/chat/completions")))?
            .json(&body);
        let response = http::send(&cancel, request).await?;
        Ok(http::spawn_reader(
            &self.name,
            response,
            cancel,
            CompletionStreamParser::default(),
        ))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let request = self.authorized(self.client.get(self.url("/models")))?;
        let response = http::check_status(request.send().await?).await?;
        let list: ModelList = response.json().await?;
        let mut models: Vec<ModelInfo> = list.data.into_iter().map(|m| ModelInfo::new(m.id)).collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.state.models()
    }

    fn set_models(&self, models: Vec<ModelInfo>) {
        self.state.set_models(models);
    }
}
