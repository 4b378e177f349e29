//! Chat provider trait definitions.
//!
//! This module defines the `ChatProvider` capability trait that every
//! provider adapter implements.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::models::{ChatMessage, ChatOptions, Chunk, CredentialField, ModelInfo, ProviderConfig};

/// Receiving end of a provider stream.
///
/// The adapter's reader task owns the only sender and drops it after the
/// terminal chunk (or a transport error), which closes the stream exactly once.
pub type ChunkReceiver = mpsc::Receiver<Chunk>;

/// Capability contract for an external chat API.
///
/// Adapters hold their credentials in memory and use interior mutability so a
/// single `Arc<dyn ChatProvider>` can be shared between the registry, the
/// provider service and in-flight streams.
///
/// # Example
///
/// ```ignore
/// use switchboard_providers::{ChatMessage, ChatOptions, ChatProvider, OpenAiProvider, ProviderConfig};
/// use tokio_util::sync::CancellationToken;
///
/// let provider = OpenAiProvider::new();
/// provider.configure(&ProviderConfig::new().with("api_key", "sk-..."))?;
///
/// let mut chunks = provider
///     .chat(CancellationToken::new(), vec![ChatMessage::user("Hello")], ChatOptions::default())
///     .await?;
/// while let Some(chunk) = chunks.recv().await {
///     print!("{}", chunk.content);
/// }
/// ```
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Unique registry key, e.g. "openai".
    fn name(&self) -> &str;

    /// Human readable name for settings screens.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Ordered credential schema.
    fn credential_fields(&self) -> Vec<CredentialField>;

    /// Merge credentials into the adapter.
    ///
    /// Only non-empty values are applied; existing values are never replaced
    /// by blanks, so calling this repeatedly is safe.
    fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError>;

    /// Credentials currently held in memory.
    fn credentials(&self) -> ProviderConfig;

    /// Forget every in-memory credential.
    fn clear_credentials(&self);

    /// Whether every required field has a value in memory.
    fn is_configured(&self) -> bool {
        let credentials = self.credentials();
        self.credential_fields()
            .iter()
            .filter(|field| field.required)
            .all(|field| credentials.get(&field.name).is_some())
    }

    /// Start a streaming completion.
    ///
    /// Returns once the request has been accepted; content arrives on the
    /// returned receiver. Cancelling `cancel` makes the adapter emit a
    /// [`ProviderError::Cancelled`] chunk and close the stream.
    async fn chat(
        &self,
        cancel: CancellationToken,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChunkReceiver, ProviderError>;

    /// Cheap connectivity and credential check.
    async fn test_connection(&self) -> Result<(), ProviderError>;

    /// Whether [`list_models`](Self::list_models) talks to the provider.
    fn supports_model_listing(&self) -> bool {
        false
    }

    /// Discover models from the provider.
    ///
    /// Default implementation returns `NotSupported`.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        Err(ProviderError::not_supported("list_models", self.name()))
    }

    /// Models currently advertised to callers.
    fn models(&self) -> Vec<ModelInfo>;

    /// Replace the advertised model list.
    fn set_models(&self, models: Vec<ModelInfo>);
}
