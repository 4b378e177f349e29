//! Anthropic Messages API adapter.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::http::{self, sse_data, StreamParser};
use super::state::AdapterState;
use super::traits::{ChatProvider, ChunkReceiver};
use crate::errors::ProviderError;
use crate::models::{
    ChatMessage, ChatOptions, ChatRole, Chunk, CredentialField, ModelInfo, ProviderConfig, Usage,
};

const PROVIDER_NAME: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
/// The Messages API requires an explicit output limit.
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    state: AdapterState,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            state: AdapterState::new(vec![
                ModelInfo::new("claude-3-5-haiku-latest"),
                ModelInfo::new("claude-3-5-sonnet-latest"),
            ]),
        }
    }

    fn api_key_field() -> CredentialField {
        CredentialField::secret("api_key", "API Key", true).with_placeholder("sk-ant-...")
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder, ProviderError> {
        let key = self.state.require(&Self::api_key_field())?;
        let url = format!("{}{}", self.state.base_url(DEFAULT_BASE_URL), path);
        Ok(self
            .client
            .request(method, url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION))
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: BlockDelta,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<EventUsage>,
    },
    MessageStop,
    Error {
        error: EventError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<EventUsage>,
}

#[derive(Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct EventUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Deserialize)]
struct EventError {
    #[serde(rename = "type", default)]
    kind: String,
    message: String,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

/// Map Anthropic stop reasons onto the common vocabulary.
fn normalize_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        other => other.to_string(),
    }
}

#[derive(Default)]
struct MessagesStreamParser {
    model: Option<String>,
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
}

impl MessagesStreamParser {
    fn terminal(&mut self) -> Chunk {
        let reason = self
            .stop_reason
            .take()
            .map(|r| normalize_stop_reason(&r))
            .unwrap_or_else(|| "stop".to_string());
        let mut chunk = Chunk::finish(reason)
            .with_usage(Usage::new(self.input_tokens, self.output_tokens));
        chunk.model = self.model.clone();
        chunk
    }
}

impl StreamParser for MessagesStreamParser {
    fn parse_line(&mut self, line: &str) -> Result<Vec<Chunk>, ProviderError> {
        let Some(data) = sse_data(line) else {
            return Ok(Vec::new());
        };

        match serde_json::from_str::<StreamEvent>(data)? {
            StreamEvent::MessageStart { message } => {
                self.model = message.model;
                let usage = message.usage.unwrap_or_default();
                self.input_tokens = usage.input_tokens;
                self.output_tokens = usage.output_tokens;
                Ok(Vec::new())
            }
            StreamEvent::ContentBlockDelta { delta } => Ok(delta
                .text
                .filter(|t| !t.is_empty())
                .map(|text| {
                    let mut chunk = Chunk::content(text);
                    chunk.model = self.model.clone();
                    vec![chunk]
                })
                .unwrap_or_default()),
            StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    self.output_tokens = usage.output_tokens;
                }
                Ok(Vec::new())
            }
            StreamEvent::MessageStop => Ok(vec![self.terminal()]),
            StreamEvent::Error { error } => {
                let status = if error.kind == "overloaded_error" { 529 } else { 500 };
                Err(ProviderError::Api {
                    status,
                    message: error.message,
                })
            }
            StreamEvent::Other => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> Option<Chunk> {
        self.stop_reason.is_some().then(|| self.terminal())
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn display_name(&self) -> &str {
        "Anthropic"
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        vec![
            Self::api_key_field(),
            CredentialField::input("base_url", "Base URL", false).with_placeholder(DEFAULT_BASE_URL),
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

        // System prompts travel outside the message list.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let body = MessagesRequest {
            model: &model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: messages
                .iter()
                .filter(|m| m.role != ChatRole::System)
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            temperature: options.temperature,
            stream: true,
        };

        debug!("anthropic: streaming {} messages to {}", body.messages.len(), model);
        let request = self.request(reqwest::Method::POST, "/v1/messages")?.json(&body);
        let response = http::send(&cancel, request).await?;
        Ok(http::spawn_reader(
            PROVIDER_NAME,
            response,
            cancel,
            MessagesStreamParser::default(),
        ))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let request = self.request(reqwest::Method::GET, "/v1/models")?;
        let response = http::check_status(request.send().await?).await?;
        let list: ModelList = response.json().await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                name: m.display_name,
            })
            .collect())
    }

    fn models(&self) -> Vec<ModelInfo> {
        self.state.models()
    }

    fn set_models(&self, models: Vec<ModelInfo>) {
        self.state.set_models(models);
    }
}
