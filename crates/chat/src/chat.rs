//! Chat orchestration - user message → provider stream → incremental persist.
//!
//! This module ties the conversation service, the provider service and the
//! stream manager together. It handles:
//! - Persisting the user message and deriving the conversation title
//! - Resolving the conversation's provider and building the round-trip history
//! - Consuming the provider's chunk stream on a spawned task
//! - Normalising errors and cancellation into a finalized assistant message

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use switchboard_core::conversations::{
    ConversationServiceTrait, ConversationSettings, ConversationSnapshot, ConversationSummary,
    Message, MessageMetadata, MessageRole, DEFAULT_CONVERSATION_TITLE, FINISH_REASON_CANCELLED,
    FINISH_REASON_STOP,
};
use switchboard_core::events::{ChatEvent, EventEmitter};
use switchboard_providers::{ChatMessage, ChatOptions, ChunkReceiver, Usage};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::provider_service::ProviderService;
use crate::stream_manager::{StreamKey, StreamManager};
use crate::title::derive_title;

/// Outcome of [`ChatOrchestrator::submit_message`].
#[derive(Debug)]
pub struct SubmittedMessage {
    pub user_message: Message,
    /// Assistant placeholder, or the finalized message when the turn failed
    /// before streaming started. `None` when no provider is configured.
    pub assistant_message: Option<Message>,
    /// Background task consuming the provider stream.
    pub completion: Option<JoinHandle<()>>,
}

impl SubmittedMessage {
    fn user_only(user_message: Message) -> Self {
        Self {
            user_message,
            assistant_message: None,
            completion: None,
        }
    }
}

/// Drives chat turns for every conversation.
pub struct ChatOrchestrator {
    conversations: Arc<dyn ConversationServiceTrait>,
    providers: Arc<ProviderService>,
    streams: Arc<StreamManager>,
    emitter: Arc<dyn EventEmitter>,
    config: ChatConfig,
    root: CancellationToken,
}

impl ChatOrchestrator {
    pub fn new(
        conversations: Arc<dyn ConversationServiceTrait>,
        providers: Arc<ProviderService>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            conversations,
            providers,
            streams: Arc::new(StreamManager::new()),
            emitter,
            config: ChatConfig::default(),
            root: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.streams
    }

    pub fn providers(&self) -> &Arc<ProviderService> {
        &self.providers
    }

    // ========================================================================
    // Chat turns
    // ========================================================================

    /// Send a user message and start the assistant reply in the background.
    ///
    /// Returns the persisted user message.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<Message> {
        self.submit_message(conversation_id, content)
            .await
            .map(|submitted| submitted.user_message)
    }

    /// Like [`send_message`](Self::send_message), also returning the assistant
    /// placeholder and the handle of the task consuming the stream.
    pub async fn submit_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> Result<SubmittedMessage> {
        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ChatError::invalid_input("Conversation id is required"));
        }
        if content.trim().is_empty() {
            return Err(ChatError::invalid_input("Message content cannot be empty"));
        }

        let added = self
            .conversations
            .add_user_message(conversation_id, content)
            .await?;
        self.emitter
            .emit_chat_event(ChatEvent::message(&added.message));

        let snapshot = self.conversations.get_conversation(conversation_id).await?;
        let settings = snapshot.settings.clone();
        if !settings.has_provider() {
            debug!(
                "Conversation {} has no provider, message stored only",
                conversation_id
            );
            return Ok(SubmittedMessage::user_only(added.message));
        }

        if added.is_first {
            self.apply_title(conversation_id, content).await;
        } else if snapshot.title == DEFAULT_CONVERSATION_TITLE {
            if let Some(first) = snapshot
                .messages
                .iter()
                .find(|m| m.role == MessageRole::User)
            {
                self.apply_title(conversation_id, &first.text()).await;
            }
        }

        let placeholder = self
            .conversations
            .create_streaming_message(conversation_id)
            .await?;
        self.emitter
            .emit_chat_event(ChatEvent::stream_start(&placeholder));

        let ctx = StreamContext {
            conversations: Arc::clone(&self.conversations),
            emitter: Arc::clone(&self.emitter),
            conversation_id: conversation_id.to_string(),
            message_id: placeholder.id.clone(),
            provider: settings.provider.clone(),
            model: settings.model.clone(),
            started: Instant::now(),
        };

        let provider = match self.providers.resolve_for_chat(&settings.provider).await {
            Ok(provider) => provider,
            Err(err) => {
                warn!(
                    "Cannot start stream for conversation {}: {}",
                    conversation_id, err
                );
                let finalized = ctx.fail(&err, &settings.model, None).await;
                return Ok(SubmittedMessage {
                    user_message: added.message,
                    assistant_message: Some(finalized.unwrap_or(placeholder)),
                    completion: None,
                });
            }
        };

        let messages = build_provider_messages(&snapshot, &placeholder.id);
        let options = ChatOptions {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        };

        let key = StreamKey::new(conversation_id, &placeholder.id);
        let token = self.root.child_token();
        self.streams.start(key.clone(), token.clone());
        let guard = StreamEntryGuard {
            streams: Arc::clone(&self.streams),
            key,
        };

        info!(
            "Streaming reply for conversation {} via {} ({} messages)",
            conversation_id,
            provider.name(),
            messages.len()
        );
        let receiver = match provider.chat(token, messages, options).await {
            Ok(receiver) => receiver,
            Err(err) => {
                let err = ChatError::from(err);
                warn!("Provider '{}' rejected chat: {}", provider.name(), err);
                let finalized = ctx.fail(&err, &settings.model, None).await;
                drop(guard);
                return Ok(SubmittedMessage {
                    user_message: added.message,
                    assistant_message: Some(finalized.unwrap_or(placeholder)),
                    completion: None,
                });
            }
        };

        let completion = tokio::spawn(consume_stream(ctx, receiver, guard));
        Ok(SubmittedMessage {
            user_message: added.message,
            assistant_message: Some(placeholder),
            completion: Some(completion),
        })
    }

    async fn apply_title(&self, conversation_id: &str, text: &str) {
        let Some(title) = derive_title(text, self.config.title_max_chars) else {
            return;
        };
        match self.conversations.set_title(conversation_id, &title).await {
            Ok(()) => self
                .emitter
                .emit_chat_event(ChatEvent::conversation_title(conversation_id, &title)),
            Err(err) => warn!(
                "Failed to set title for conversation {}: {}",
                conversation_id, err
            ),
        }
    }

    /// Stop the most recently started stream.
    pub fn stop_stream(&self) -> bool {
        self.streams.stop()
    }

    pub fn stop_stream_for(&self, conversation_id: &str, message_id: &str) -> bool {
        self.streams
            .cancel(&StreamKey::new(conversation_id, message_id))
    }

    /// Cancel every in-flight stream. New turns started afterwards are
    /// cancelled immediately.
    pub fn shutdown(&self) {
        self.root.cancel();
        let cancelled = self.streams.cancel_all();
        info!("Chat orchestrator shut down, cancelled {} streams", cancelled);
    }

    // ========================================================================
    // Conversation lifecycle
    // ========================================================================

    pub async fn create_conversation(
        &self,
        settings: ConversationSettings,
    ) -> Result<ConversationSnapshot> {
        self.ensure_provider(&settings.provider)?;
        Ok(self.conversations.create_conversation(settings).await?)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<ConversationSnapshot> {
        Ok(self.conversations.get_conversation(id).await?)
    }

    pub async fn list_conversations(
        &self,
        include_archived: bool,
    ) -> Result<Vec<ConversationSummary>> {
        Ok(self.conversations.list_conversations(include_archived).await?)
    }

    /// Archive a conversation. It can be brought back with `restore_conversation`.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        Ok(self.conversations.archive_conversation(id).await?)
    }

    pub async fn restore_conversation(&self, id: &str) -> Result<()> {
        Ok(self.conversations.restore_conversation(id).await?)
    }

    pub async fn purge_conversation(&self, id: &str) -> Result<()> {
        Ok(self.conversations.purge_conversation(id).await?)
    }

    /// Switch the provider and model used for future turns.
    pub async fn update_conversation_model(
        &self,
        id: &str,
        provider: &str,
        model: &str,
    ) -> Result<ConversationSnapshot> {
        self.ensure_provider(provider)?;
        let mut settings = self.conversations.get_conversation(id).await?.settings;
        settings.provider = provider.trim().to_string();
        settings.model = model.trim().to_string();
        Ok(self.conversations.update_settings(id, settings).await?)
    }

    pub async fn set_active_conversation(&self, id: &str) -> Result<()> {
        Ok(self.conversations.set_active_conversation(id).await?)
    }

    pub fn get_active_conversation(&self) -> Option<String> {
        self.conversations.get_active_conversation()
    }

    fn ensure_provider(&self, provider: &str) -> Result<()> {
        let provider = provider.trim();
        if provider.is_empty() || self.providers.registry().contains(provider) {
            Ok(())
        } else {
            Err(ChatError::ProviderNotFound(provider.to_string()))
        }
    }
}

/// History sent to the provider: optional system prompt, then every prior
/// message with text, skipping `exclude_id`.
pub fn build_provider_messages(
    snapshot: &ConversationSnapshot,
    exclude_id: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    if let Some(prompt) = snapshot
        .settings
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        messages.push(ChatMessage::system(prompt));
    }

    for message in snapshot.round_trip_messages(exclude_id) {
        let text = message.text();
        match message.role {
            MessageRole::User => messages.push(ChatMessage::user(text)),
            MessageRole::Assistant => messages.push(ChatMessage::assistant(text)),
            MessageRole::System => messages.push(ChatMessage::system(text)),
            MessageRole::Tool => {}
        }
    }
    messages
}

// ============================================================================
// Stream consumption
// ============================================================================

/// Clears the stream manager entry on every exit path of a turn.
struct StreamEntryGuard {
    streams: Arc<StreamManager>,
    key: StreamKey,
}

impl Drop for StreamEntryGuard {
    fn drop(&mut self) {
        self.streams.clear(&self.key);
    }
}

/// Everything a turn needs after the placeholder exists.
struct StreamContext {
    conversations: Arc<dyn ConversationServiceTrait>,
    emitter: Arc<dyn EventEmitter>,
    conversation_id: String,
    message_id: String,
    provider: String,
    model: String,
    started: Instant,
}

impl StreamContext {
    fn metadata(&self, model: &str, usage: Option<Usage>) -> MessageMetadata {
        let model = if model.is_empty() { self.model.as_str() } else { model };
        let mut metadata = MessageMetadata::new(&self.provider, model)
            .with_latency(self.started.elapsed().as_millis() as u64);
        if let Some(usage) = usage {
            metadata = metadata.with_usage(
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens,
            );
        }
        metadata
    }

    async fn finalize(&self, metadata: MessageMetadata) -> Option<Message> {
        match self
            .conversations
            .finalize_message(&self.conversation_id, &self.message_id, metadata)
            .await
        {
            Ok(message) => Some(message),
            Err(err) => {
                error!(
                    "Failed to finalize message {} in conversation {}: {}",
                    self.message_id, self.conversation_id, err
                );
                None
            }
        }
    }

    /// Finalize normally and emit `chat.stream.complete`.
    async fn complete(&self, metadata: MessageMetadata) -> Option<Message> {
        let finalized = self.finalize(metadata.clone()).await;
        if finalized.is_some() {
            self.emitter.emit_chat_event(ChatEvent::stream_complete(
                &self.conversation_id,
                &self.message_id,
                &metadata,
            ));
        }
        finalized
    }

    /// Finalize after `err`. Cancellation completes with finish reason
    /// `cancelled`; anything else emits `chat.stream.error` first.
    async fn fail(&self, err: &ChatError, model: &str, usage: Option<Usage>) -> Option<Message> {
        let metadata = self.metadata(model, usage);
        if err.is_cancelled() {
            debug!("Stream for message {} cancelled", self.message_id);
            return self
                .complete(metadata.with_finish_reason(FINISH_REASON_CANCELLED))
                .await;
        }

        let message = err.to_string();
        let status_code = err.status_code();
        self.emitter.emit_chat_event(ChatEvent::stream_error(
            &self.conversation_id,
            &self.message_id,
            &message,
            status_code,
        ));
        self.finalize(metadata.failed(&message, status_code)).await
    }
}

async fn consume_stream(ctx: StreamContext, mut receiver: ChunkReceiver, guard: StreamEntryGuard) {
    let mut model = ctx.model.clone();
    let mut usage: Option<Usage> = None;
    let mut finish_reason: Option<String> = None;

    while let Some(chunk) = receiver.recv().await {
        if let Some(chunk_model) = chunk.model.as_deref().filter(|m| !m.is_empty()) {
            model = chunk_model.to_string();
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
        if let Some(err) = chunk.error {
            ctx.fail(&ChatError::from(err), &model, usage).await;
            return;
        }

        if !chunk.content.is_empty() {
            if let Err(err) = ctx
                .conversations
                .append_chunk(&ctx.conversation_id, &ctx.message_id, 0, &chunk.content)
                .await
            {
                ctx.fail(&ChatError::from(err), &model, usage).await;
                return;
            }
            ctx.emitter.emit_chat_event(ChatEvent::stream_chunk(
                &ctx.conversation_id,
                &ctx.message_id,
                0,
                &chunk.content,
            ));
        }

        if let Some(reason) = chunk.finish_reason.filter(|r| !r.is_empty()) {
            finish_reason = Some(reason);
            break;
        }
    }

    let stopped = guard.streams.was_cancelled(&guard.key);
    let reason = finish_reason.unwrap_or_else(|| {
        if stopped {
            FINISH_REASON_CANCELLED.to_string()
        } else {
            FINISH_REASON_STOP.to_string()
        }
    });
    debug!(
        "Stream for message {} finished: {}",
        ctx.message_id, reason
    );
    ctx.complete(ctx.metadata(&model, usage).with_finish_reason(&reason))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::conversations::Block;
    use switchboard_providers::ChatRole;

    fn snapshot_with(messages: Vec<Message>, system_prompt: Option<&str>) -> ConversationSnapshot {
        let mut settings = ConversationSettings::new("demo", "m1");
        settings.system_prompt = system_prompt.map(str::to_string);
        let mut snapshot = ConversationSnapshot::new(settings);
        snapshot.messages = messages;
        snapshot
    }

    #[test]
    fn test_build_provider_messages_order_and_filtering() {
        let conversation_id = "c1";
        let user = Message::user(conversation_id, "Hi");
        let mut assistant = Message::new(
            conversation_id,
            MessageRole::Assistant,
            vec![Block::text("Hel"), Block::text("lo")],
        );
        assistant.is_streaming = false;
        let blank = Message::user(conversation_id, "   ");
        let tool = Message::new(conversation_id, MessageRole::Tool, vec![Block::text("{}")]);
        let placeholder = Message::streaming_assistant(conversation_id);
        let exclude = placeholder.id.clone();

        let snapshot = snapshot_with(
            vec![user, assistant, blank, tool, placeholder],
            Some("Be brief."),
        );
        let messages = build_provider_messages(&snapshot, &exclude);

        let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]
        );
        assert_eq!(messages[0].content, "Be brief.");
        assert_eq!(messages[2].content, "Hello");
    }

    #[test]
    fn test_build_provider_messages_without_system_prompt() {
        let snapshot = snapshot_with(vec![Message::user("c1", "Hi")], Some("  "));
        let messages = build_provider_messages(&snapshot, "none");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
    }
}
