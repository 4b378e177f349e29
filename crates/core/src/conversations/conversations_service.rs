use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use log::{debug, info, warn};

use super::conversations_model::{
    Conversation, ConversationSettings, ConversationSnapshot, ConversationSummary, Message,
    MessageMetadata,
};
use super::conversations_traits::{AddedUserMessage, ChatRepositoryTrait, ConversationServiceTrait};
use crate::errors::{Error, Result, ValidationError};

/// Conversation service backed by a [`ChatRepositoryTrait`].
///
/// Live aggregates are loaded on first use and kept in memory. Every mutation
/// runs under the aggregate's commit lock and is persisted before the lock is
/// released; a failed write restores the in-memory state.
pub struct ConversationService {
    repository: Arc<dyn ChatRepositoryTrait>,
    live: RwLock<HashMap<String, Arc<Conversation>>>,
    active: RwLock<Option<String>>,
}

impl ConversationService {
    pub fn new(repository: Arc<dyn ChatRepositoryTrait>) -> Self {
        Self {
            repository,
            live: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    fn cached(&self, id: &str) -> Option<Arc<Conversation>> {
        self.live
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(id)
            .cloned()
    }

    /// Live aggregate for `id`, hydrating it from the repository if needed.
    async fn load(&self, id: &str) -> Result<Arc<Conversation>> {
        if let Some(conversation) = self.cached(id) {
            return Ok(conversation);
        }

        let snapshot = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| Error::ConversationNotFound(id.to_string()))?;
        debug!("Hydrated conversation {} from repository", id);

        let mut live = self.live.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        // A concurrent load may have won the race; keep its aggregate.
        let conversation = live
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Conversation::from_snapshot(snapshot)))
            .clone();
        Ok(conversation)
    }

    /// Like [`load`](Self::load) but treats archived conversations as missing.
    async fn load_open(&self, id: &str) -> Result<Arc<Conversation>> {
        let conversation = self.load(id).await?;
        if conversation.is_archived() {
            return Err(Error::ConversationNotFound(id.to_string()));
        }
        Ok(conversation)
    }

    /// Apply `mutate` and persist the result, rolling back on write failure.
    async fn commit<T, F>(&self, conversation: &Conversation, mutate: F) -> Result<T>
    where
        F: FnOnce(&Conversation) -> Result<T> + Send,
        T: Send,
    {
        let _guard = conversation.commit_lock().lock().await;
        let before = conversation.snapshot();
        let value = mutate(conversation)?;

        if let Err(err) = self.repository.update(conversation.snapshot()).await {
            warn!(
                "Failed to persist conversation {}, rolling back: {}",
                before.id, err
            );
            conversation.restore(before);
            return Err(err);
        }
        Ok(value)
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingField("conversationId".to_string()).into());
    }
    Ok(())
}

#[async_trait]
impl ConversationServiceTrait for ConversationService {
    async fn create_conversation(&self, settings: ConversationSettings) -> Result<ConversationSnapshot> {
        let conversation = Conversation::new(settings);
        let snapshot = conversation.snapshot();
        self.repository.create(snapshot.clone()).await?;

        self.live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(snapshot.id.clone(), Arc::new(conversation));
        info!("Created conversation {}", snapshot.id);
        Ok(snapshot)
    }

    async fn get_conversation(&self, id: &str) -> Result<ConversationSnapshot> {
        require_id(id)?;
        Ok(self.load(id).await?.snapshot())
    }

    async fn list_conversations(&self, include_archived: bool) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<ConversationSummary> = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|stored| match self.cached(&stored.id) {
                Some(live) => live.summary(),
                None => stored.summary(),
            })
            .filter(|summary| include_archived || !summary.is_archived)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn add_user_message(&self, id: &str, content: &str) -> Result<AddedUserMessage> {
        require_id(id)?;
        if content.trim().is_empty() {
            return Err(ValidationError::InvalidInput("message content is empty".to_string()).into());
        }

        let conversation = self.load_open(id).await?;
        let message = Message::user(id, content);
        self.commit(&conversation, |conv| {
            let is_first = conv.user_message_count() == 0;
            conv.add_message(message.clone());
            Ok(AddedUserMessage { message, is_first })
        })
        .await
    }

    async fn create_streaming_message(&self, id: &str) -> Result<Message> {
        require_id(id)?;
        let conversation = self.load_open(id).await?;
        let message = Message::streaming_assistant(id);
        self.commit(&conversation, |conv| {
            conv.add_message(message.clone());
            Ok(message)
        })
        .await
    }

    async fn append_chunk(
        &self,
        id: &str,
        message_id: &str,
        block_index: usize,
        content: &str,
    ) -> Result<()> {
        let conversation = self.load(id).await?;
        self.commit(&conversation, |conv| {
            conv.append_to_block(message_id, block_index, content)
        })
        .await
    }

    async fn finalize_message(
        &self,
        id: &str,
        message_id: &str,
        metadata: MessageMetadata,
    ) -> Result<Message> {
        let conversation = self.load(id).await?;
        self.commit(&conversation, |conv| conv.finalize_message(message_id, metadata))
            .await
    }

    async fn set_title(&self, id: &str, title: &str) -> Result<()> {
        require_id(id)?;
        let conversation = self.load(id).await?;
        self.commit(&conversation, |conv| {
            conv.set_title(title);
            Ok(())
        })
        .await
    }

    async fn update_settings(
        &self,
        id: &str,
        settings: ConversationSettings,
    ) -> Result<ConversationSnapshot> {
        require_id(id)?;
        let conversation = self.load_open(id).await?;
        self.commit(&conversation, |conv| {
            conv.update_settings(settings);
            Ok(conv.snapshot())
        })
        .await
    }

    async fn archive_conversation(&self, id: &str) -> Result<()> {
        require_id(id)?;
        let conversation = self.load(id).await?;
        if conversation.is_archived() {
            return Ok(());
        }
        self.commit(&conversation, |conv| {
            conv.set_archived(true);
            Ok(())
        })
        .await?;
        info!("Archived conversation {}", id);
        Ok(())
    }

    async fn restore_conversation(&self, id: &str) -> Result<()> {
        require_id(id)?;
        let conversation = self.load(id).await?;
        if !conversation.is_archived() {
            return Ok(());
        }
        self.commit(&conversation, |conv| {
            conv.set_archived(false);
            Ok(())
        })
        .await?;
        info!("Restored conversation {}", id);
        Ok(())
    }

    async fn purge_conversation(&self, id: &str) -> Result<()> {
        require_id(id)?;
        let conversation = self.load(id).await?;
        {
            let _guard = conversation.commit_lock().lock().await;
            self.repository.delete(id).await?;
        }

        self.live
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id);
        let mut active = self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if active.as_deref() == Some(id) {
            *active = None;
        }
        info!("Purged conversation {}", id);
        Ok(())
    }

    async fn set_active_conversation(&self, id: &str) -> Result<()> {
        let id = id.trim();
        if !id.is_empty() {
            self.load(id).await?;
        }
        let mut active = self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *active = (!id.is_empty()).then(|| id.to_string());
        Ok(())
    }

    fn get_active_conversation(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
