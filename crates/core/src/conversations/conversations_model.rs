//! Conversation domain models.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result, ValidationError};
use crate::utils::time_utils::{next_millis_after, now_millis};

// ============================================================================
// Constants
// ============================================================================

/// Title given to every new conversation.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New conversation";

/// Maximum length, in characters, of the last-message preview in summaries.
pub const PREVIEW_MAX_CHARS: usize = 100;

pub const FINISH_REASON_STOP: &str = "stop";
pub const FINISH_REASON_CANCELLED: &str = "cancelled";
pub const FINISH_REASON_ERROR: &str = "error";

// ============================================================================
// Messages and blocks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Code,
    Artifact,
    Thinking,
    Action,
    Error,
    Image,
}

/// A standalone piece of generated content (document, snippet, diagram).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub kind: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub content: String,
}

/// A side effect the assistant proposed or performed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub kind: String,
    pub target: String,
    pub status: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Typed content segment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub block_type: BlockType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl Block {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            block_type: BlockType::Text,
            content: content.into(),
            artifact: None,
            action: None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.block_type == BlockType::Text
    }
}

/// Provider accounting attached to an assistant message when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    pub provider: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub tokens_total: u32,
    pub latency_ms: u64,
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageMetadata {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            tokens_in: 0,
            tokens_out: 0,
            tokens_total: 0,
            latency_ms: 0,
            finish_reason: FINISH_REASON_STOP.to_string(),
            status_code: None,
            error: None,
        }
    }

    /// Record token usage. A zero `total` is replaced by `tokens_in + tokens_out`.
    pub fn with_usage(mut self, tokens_in: u32, tokens_out: u32, total: u32) -> Self {
        self.tokens_in = tokens_in;
        self.tokens_out = tokens_out;
        self.tokens_total = if total > 0 {
            total
        } else {
            tokens_in.saturating_add(tokens_out)
        };
        self
    }

    pub fn with_finish_reason(mut self, reason: &str) -> Self {
        self.finish_reason = reason.to_string();
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Mark as failed with `error`.
    pub fn failed(mut self, error: &str, status_code: Option<u16>) -> Self {
        self.finish_reason = FINISH_REASON_ERROR.to_string();
        self.error = Some(error.to_string());
        self.status_code = status_code;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub blocks: Vec<Block>,
    pub timestamp: i64,
    pub is_streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn new(conversation_id: &str, role: MessageRole, blocks: Vec<Block>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            blocks,
            timestamp: now_millis(),
            is_streaming: false,
            metadata: None,
        }
    }

    pub fn user(conversation_id: &str, content: &str) -> Self {
        Self::new(conversation_id, MessageRole::User, vec![Block::text(content)])
    }

    /// Empty assistant message that will receive streamed content.
    pub fn streaming_assistant(conversation_id: &str) -> Self {
        let mut message = Self::new(conversation_id, MessageRole::Assistant, vec![Block::text("")]);
        message.is_streaming = true;
        message
    }

    /// Concatenated content of the text blocks, in order.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter(|b| b.is_text())
            .map(|b| b.content.as_str())
            .collect()
    }
}

// ============================================================================
// Conversation records
// ============================================================================

/// Per-conversation provider selection and generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSettings {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ConversationSettings {
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn has_provider(&self) -> bool {
        !self.provider.trim().is_empty()
    }
}

/// Fully hydrated, detached copy of a conversation.
///
/// This is the unit of persistence: repositories store and return snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub settings: ConversationSettings,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_archived: bool,
}

impl ConversationSnapshot {
    pub fn new(settings: ConversationSettings) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
            settings,
            created_at: now,
            updated_at: now,
            is_archived: false,
        }
    }

    /// Messages that take part in a provider round-trip, in order.
    ///
    /// Skips `exclude_id` (the streaming placeholder) and messages with no text.
    pub fn round_trip_messages(&self, exclude_id: &str) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.id != exclude_id)
            .filter(|m| !m.text().trim().is_empty())
            .collect()
    }

    pub fn summary(&self) -> ConversationSummary {
        let last_message_preview = self
            .messages
            .last()
            .map(|m| m.text().chars().take(PREVIEW_MAX_CHARS).collect())
            .unwrap_or_default();
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            last_message_preview,
            updated_at: self.updated_at,
            is_archived: self.is_archived,
        }
    }
}

/// List entry for conversation pickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub last_message_preview: String,
    pub updated_at: i64,
    pub is_archived: bool,
}

// ============================================================================
// Aggregate
// ============================================================================

/// Live conversation aggregate.
///
/// State sits behind a `RwLock`; every mutation bumps `updated_at` to a value
/// strictly greater than the previous one. The separate async `commit_lock`
/// lets the service serialise mutate-then-persist sequences without holding
/// the state lock across an await.
#[derive(Debug)]
pub struct Conversation {
    state: RwLock<ConversationSnapshot>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl Conversation {
    pub fn new(settings: ConversationSettings) -> Self {
        Self::from_snapshot(ConversationSnapshot::new(settings))
    }

    pub fn from_snapshot(snapshot: ConversationSnapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
            commit_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ConversationSnapshot> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("Conversation lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, ConversationSnapshot> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("Conversation lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn touch(state: &mut ConversationSnapshot) {
        state.updated_at = next_millis_after(state.updated_at);
    }

    pub(crate) fn commit_lock(&self) -> &tokio::sync::Mutex<()> {
        &self.commit_lock
    }

    pub fn id(&self) -> String {
        self.read().id.clone()
    }

    pub fn is_archived(&self) -> bool {
        self.read().is_archived
    }

    pub fn settings(&self) -> ConversationSettings {
        self.read().settings.clone()
    }

    pub fn message_count(&self) -> usize {
        self.read().messages.len()
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.read()
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub fn user_message_count(&self) -> usize {
        self.read()
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count()
    }

    /// Append a message.
    pub fn add_message(&self, message: Message) {
        let mut state = self.write();
        state.messages.push(message);
        Self::touch(&mut state);
    }

    /// Detached deep copy of the current state.
    pub fn snapshot(&self) -> ConversationSnapshot {
        self.read().clone()
    }

    pub fn summary(&self) -> ConversationSummary {
        self.read().summary()
    }

    /// Append `content` to block `index` of a streaming message.
    ///
    /// Missing blocks up to `index` are created as empty text blocks.
    pub fn append_to_block(&self, message_id: &str, index: usize, content: &str) -> Result<()> {
        let mut state = self.write();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;
        if !message.is_streaming {
            return Err(ValidationError::InvalidInput(format!(
                "message {} is not streaming",
                message_id
            ))
            .into());
        }

        while message.blocks.len() <= index {
            message.blocks.push(Block::text(""));
        }
        message.blocks[index].content.push_str(content);
        Self::touch(&mut state);
        Ok(())
    }

    /// Close a streaming message and attach its metadata.
    ///
    /// Finalizing an already finalized message replaces the metadata.
    pub fn finalize_message(&self, message_id: &str, metadata: MessageMetadata) -> Result<Message> {
        let mut state = self.write();
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;
        message.is_streaming = false;
        message.metadata = Some(metadata);
        let finalized = message.clone();
        Self::touch(&mut state);
        Ok(finalized)
    }

    pub fn set_title(&self, title: &str) {
        let mut state = self.write();
        state.title = title.to_string();
        Self::touch(&mut state);
    }

    pub fn update_settings(&self, settings: ConversationSettings) {
        let mut state = self.write();
        state.settings = settings;
        Self::touch(&mut state);
    }

    /// Returns whether the flag changed.
    pub fn set_archived(&self, archived: bool) -> bool {
        let mut state = self.write();
        if state.is_archived == archived {
            return false;
        }
        state.is_archived = archived;
        Self::touch(&mut state);
        true
    }

    /// Replace the state wholesale. Used to roll back a failed commit.
    pub fn restore(&self, snapshot: ConversationSnapshot) {
        *self.write() = snapshot;
    }
}
