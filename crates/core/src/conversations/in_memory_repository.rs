//! In-memory [`ChatRepositoryTrait`] implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::conversations_model::ConversationSnapshot;
use super::conversations_traits::ChatRepositoryTrait;
use crate::errors::{Error, Result};

/// Conversation store kept in a map. Used by tests and standalone embedding.
#[derive(Default)]
pub struct InMemoryChatRepository {
    conversations: RwLock<HashMap<String, ConversationSnapshot>>,
    fail_updates: AtomicBool,
}

impl InMemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `update` fail until switched off.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Stored copy of a conversation.
    pub fn stored(&self, id: &str) -> Option<ConversationSnapshot> {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChatRepositoryTrait for InMemoryChatRepository {
    async fn create(&self, conversation: ConversationSnapshot) -> Result<()> {
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if conversations.contains_key(&conversation.id) {
            return Err(Error::Repository(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        conversations.insert(conversation.id.clone(), conversation);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ConversationSnapshot>> {
        Ok(self.stored(id))
    }

    async fn list(&self) -> Result<Vec<ConversationSnapshot>> {
        Ok(self
            .conversations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect())
    }

    async fn update(&self, conversation: ConversationSnapshot) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(Error::Repository("update rejected".to_string()));
        }
        let mut conversations = self
            .conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match conversations.get_mut(&conversation.id) {
            Some(stored) => {
                *stored = conversation;
                Ok(())
            }
            None => Err(Error::ConversationNotFound(conversation.id)),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.conversations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        Ok(())
    }
}
