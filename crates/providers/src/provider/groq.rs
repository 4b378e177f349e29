//! Groq adapter built on the rig SDK.
//!
//! Streaming goes through rig's agent API; model discovery uses Groq's
//! OpenAI-compatible `/models` endpoint directly.

use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, warn};
use reqwest::Client as HttpClient;
use rig::{
    agent::MultiTurnStreamItem,
    client::CompletionClient,
    completion::Message,
    message::{AssistantContent, Text, UserContent},
    providers::groq,
    streaming::{StreamedAssistantContent, StreamingChat},
    OneOrMany,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::http;
use super::state::AdapterState;
use super::traits::{ChatProvider, ChunkReceiver};
use crate::errors::ProviderError;
use crate::models::{
    ChatMessage, ChatOptions, ChatRole, Chunk, CredentialField, ModelInfo, ProviderConfig, Usage,
    CHUNK_CHANNEL_CAPACITY,
};

const PROVIDER_NAME: &str = "groq";
const MODELS_URL: &str = "https://api.groq.com/openai/v1/models";

pub struct GroqProvider {
    http: HttpClient,
    state: AdapterState,
}

impl GroqProvider {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
            state: AdapterState::new(vec![
                ModelInfo::new("llama-3.3-70b-versatile"),
                ModelInfo::new("llama-3.1-8b-instant"),
            ]),
        }
    }

    fn api_key_field() -> CredentialField {
        CredentialField::secret("api_key", "API Key", true).with_placeholder("gsk_...")
    }

    fn create_client(&self) -> Result<groq::Client<HttpClient>, ProviderError> {
        let key = self.state.require(&Self::api_key_field())?;
        groq::Client::new(&key).map_err(|e| ProviderError::InvalidConfig(e.to_string()))
    }
}

impl Default for GroqProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

/// Split plain messages into rig's (prompt, history) pair plus a preamble.
///
/// The last user message becomes the prompt; system messages are joined
/// into the preamble.
fn build_history(
    messages: &[ChatMessage],
) -> Result<(Option<String>, Message, Vec<Message>), ProviderError> {
    let Some(last_user_index) = messages.iter().rposition(|m| m.role == ChatRole::User) else {
        return Err(ProviderError::InvalidConfig(
            "A user message is required to start the chat".to_string(),
        ));
    };

    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let prompt = Message::User {
        content: OneOrMany::one(UserContent::Text(Text {
            text: messages[last_user_index].content.clone(),
        })),
    };

    let mut history = Vec::new();
    for (idx, msg) in messages.iter().enumerate() {
        if idx == last_user_index {
            continue;
        }
        match msg.role {
            ChatRole::User => history.push(Message::User {
                content: OneOrMany::one(UserContent::Text(Text {
                    text: msg.content.clone(),
                })),
            }),
            ChatRole::Assistant => history.push(Message::Assistant {
                id: None,
                content: OneOrMany::one(AssistantContent::Text(Text {
                    text: msg.content.clone(),
                })),
            }),
            ChatRole::System => {}
        }
    }

    Ok((preamble, prompt, history))
}

#[async_trait]
impl ChatProvider for GroqProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn display_name(&self) -> &str {
        "Groq"
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        vec![Self::api_key_field()]
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
        let (preamble, prompt, history) = build_history(&messages)?;
        let client = self.create_client()?;

        let mut builder = client.agent(&model);
        if let Some(preamble) = preamble {
            builder = builder.preamble(&preamble);
        }
        if let Some(temperature) = options.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(tokens) = options.max_tokens {
            builder = builder.max_tokens(u64::from(tokens));
        }
        let agent = builder.build();

        debug!("groq: streaming {} history messages to {}", history.len(), model);
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut stream = agent.stream_chat(prompt, history).multi_turn(1).await;
            let mut streamed_text = false;
            let mut usage = None;

            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = tx.send(Chunk::error(ProviderError::Cancelled)).await;
                        return;
                    }
                    item = stream.next() => item,
                };
                let Some(item) = item else { break };

                match item {
                    Ok(MultiTurnStreamItem::StreamAssistantItem(StreamedAssistantContent::Text(
                        Text { text },
                    ))) => {
                        if text.is_empty() {
                            continue;
                        }
                        streamed_text = true;
                        if tx.send(Chunk::content(text).with_model(&model)).await.is_err() {
                            return;
                        }
                    }
                    Ok(MultiTurnStreamItem::FinalResponse(final_response)) => {
                        usage = Some(convert_usage(&final_response.usage()));
                        let response_text = final_response.response().to_string();
                        if !streamed_text && !response_text.trim().is_empty() {
                            if tx.send(Chunk::content(response_text).with_model(&model)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("groq stream error: {}", e);
                        let _ = tx.send(Chunk::error(ProviderError::Network(e.to_string()))).await;
                        return;
                    }
                }
            }

            let mut finish = Chunk::finish("stop").with_model(&model);
            if let Some(usage) = usage {
                finish = finish.with_usage(usage);
            }
            let _ = tx.send(finish).await;
        });

        Ok(rx)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.list_models().await.map(|_| ())
    }

    fn supports_model_listing(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let key = self.state.require(&Self::api_key_field())?;
        let response = self.http.get(MODELS_URL).bearer_auth(key).send().await?;
        let list: ModelList = http::check_status(response).await?.json().await?;
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

/// Token counts arrive as u64; anything past u32 is clamped.
fn convert_usage(usage: &rig::completion::Usage) -> Usage {
    let clamp = |n: u64| u32::try_from(n).unwrap_or(u32::MAX);
    Usage {
        prompt_tokens: clamp(usage.input_tokens),
        completion_tokens: clamp(usage.output_tokens),
        total_tokens: clamp(usage.total_tokens),
    }
}
