use async_trait::async_trait;

use crate::conversations::conversations_model::{
    ConversationSettings, ConversationSnapshot, ConversationSummary, Message, MessageMetadata,
};
use crate::errors::Result;

/// Persistence contract for conversations.
///
/// Snapshots are always fully hydrated; `update` replaces the stored record
/// as a whole or fails without partial writes.
#[async_trait]
pub trait ChatRepositoryTrait: Send + Sync {
    async fn create(&self, conversation: ConversationSnapshot) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ConversationSnapshot>>;
    async fn list(&self) -> Result<Vec<ConversationSnapshot>>;
    async fn update(&self, conversation: ConversationSnapshot) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Result of appending a user message.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedUserMessage {
    pub message: Message,
    /// True when no user message existed before this one.
    pub is_first: bool,
}

/// Trait for conversation service operations
#[async_trait]
pub trait ConversationServiceTrait: Send + Sync {
    async fn create_conversation(&self, settings: ConversationSettings) -> Result<ConversationSnapshot>;
    async fn get_conversation(&self, id: &str) -> Result<ConversationSnapshot>;
    /// Summaries ordered newest first.
    async fn list_conversations(&self, include_archived: bool) -> Result<Vec<ConversationSummary>>;
    async fn add_user_message(&self, id: &str, content: &str) -> Result<AddedUserMessage>;
    async fn create_streaming_message(&self, id: &str) -> Result<Message>;
    async fn append_chunk(
        &self,
        id: &str,
        message_id: &str,
        block_index: usize,
        content: &str,
    ) -> Result<()>;
    async fn finalize_message(
        &self,
        id: &str,
        message_id: &str,
        metadata: MessageMetadata,
    ) -> Result<Message>;
    async fn set_title(&self, id: &str, title: &str) -> Result<()>;
    async fn update_settings(
        &self,
        id: &str,
        settings: ConversationSettings,
    ) -> Result<ConversationSnapshot>;
    async fn archive_conversation(&self, id: &str) -> Result<()>;
    async fn restore_conversation(&self, id: &str) -> Result<()>;
    async fn purge_conversation(&self, id: &str) -> Result<()>;
    /// Select the active conversation. An empty id clears the selection.
    async fn set_active_conversation(&self, id: &str) -> Result<()>;
    fn get_active_conversation(&self) -> Option<String>;
}
