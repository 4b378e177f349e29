//! Scriptable in-process provider for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::state::AdapterState;
use super::traits::{ChatProvider, ChunkReceiver};
use crate::errors::ProviderError;
use crate::models::{
    ChatMessage, ChatOptions, ChatRole, Chunk, CredentialField, ModelInfo, ProviderConfig,
    CHUNK_CHANNEL_CAPACITY,
};

/// What a held-open turn does once it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelBehavior {
    /// Emit a `Cancelled` error chunk, like the HTTP adapters.
    ErrorChunk,
    /// Close the stream without a terminal chunk.
    Close,
}

/// One scripted response.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    chunks: Vec<Chunk>,
    delay: Duration,
    hold_open: bool,
    on_cancel: CancelBehavior,
}

impl ScriptedTurn {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks,
            delay: Duration::ZERO,
            hold_open: false,
            on_cancel: CancelBehavior::ErrorChunk,
        }
    }

    /// Content chunks followed by a `stop` finish chunk.
    pub fn text(parts: &[&str]) -> Self {
        let mut chunks: Vec<Chunk> = parts.iter().map(|p| Chunk::content(*p)).collect();
        chunks.push(Chunk::finish("stop"));
        Self::new(chunks)
    }

    /// Sleep between chunks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// After the scripted chunks, keep the stream open until cancelled.
    pub fn hold_open(mut self, on_cancel: CancelBehavior) -> Self {
        self.hold_open = true;
        self.on_cancel = on_cancel;
        self
    }
}

/// Scriptable [`ChatProvider`] with call counters.
///
/// Without scripted turns, `chat` echoes the last user message.
pub struct MockProvider {
    name: String,
    fields: Vec<CredentialField>,
    state: AdapterState,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    listed_models: Mutex<Option<Vec<ModelInfo>>>,
    list_delay: Mutex<Duration>,
    connection_error: Mutex<Option<ProviderError>>,
    chat_error: Mutex<Option<ProviderError>>,
    last_request: Mutex<Option<(Vec<ChatMessage>, ChatOptions)>>,
    chat_calls: AtomicUsize,
    list_calls: AtomicUsize,
    test_calls: AtomicUsize,
}

impl MockProvider {
    /// Mock requiring a secret `api_key`.
    pub fn new(name: &str) -> Self {
        Self::with_fields(
            name,
            vec![
                CredentialField::secret("api_key", "API Key", true),
                CredentialField::input("base_url", "Base URL", false),
            ],
        )
    }

    /// Mock with no credentials at all.
    pub fn without_credentials(name: &str) -> Self {
        Self::with_fields(name, Vec::new())
    }

    pub fn with_fields(name: &str, fields: Vec<CredentialField>) -> Self {
        Self {
            name: name.to_string(),
            fields,
            state: AdapterState::new(vec![ModelInfo::new(format!("{}-model", name))]),
            turns: Mutex::new(VecDeque::new()),
            listed_models: Mutex::new(None),
            list_delay: Mutex::new(Duration::ZERO),
            connection_error: Mutex::new(None),
            chat_error: Mutex::new(None),
            last_request: Mutex::new(None),
            chat_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            test_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a response for the next `chat` call.
    pub fn push_turn(&self, turn: ScriptedTurn) {
        lock(&self.turns).push_back(turn);
    }

    /// Make `list_models` supported and return `models`.
    pub fn set_listed_models(&self, models: Vec<ModelInfo>) {
        *lock(&self.listed_models) = Some(models);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *lock(&self.list_delay) = delay;
    }

    /// Fail `test_connection` with `error`, or succeed again with `None`.
    pub fn set_connection_error(&self, error: Option<ProviderError>) {
        *lock(&self.connection_error) = error;
    }

    /// Fail `chat` with `error`, or succeed again with `None`.
    pub fn set_chat_error(&self, error: Option<ProviderError>) {
        *lock(&self.chat_error) = error;
    }

    /// Messages and options of the most recent `chat` call.
    pub fn last_request(&self) -> Option<(Vec<ChatMessage>, ChatOptions)> {
        lock(&self.last_request).clone()
    }

    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn test_calls(&self) -> usize {
        self.test_calls.load(Ordering::SeqCst)
    }

    fn check_required(&self) -> Result<(), ProviderError> {
        for field in self.fields.iter().filter(|f| f.required) {
            self.state.require(field)?;
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn play(
    turn: ScriptedTurn,
    model: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<Chunk>,
) {
    for chunk in turn.chunks {
        if !turn.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if turn.on_cancel == CancelBehavior::ErrorChunk {
                        let _ = tx.send(Chunk::error(ProviderError::Cancelled)).await;
                    }
                    return;
                }
                _ = tokio::time::sleep(turn.delay) => {}
            }
        } else if cancel.is_cancelled() {
            if turn.on_cancel == CancelBehavior::ErrorChunk {
                let _ = tx.send(Chunk::error(ProviderError::Cancelled)).await;
            }
            return;
        }

        let mut chunk = chunk;
        if chunk.model.is_none() {
            chunk.model = Some(model.clone());
        }
        let terminal = chunk.is_terminal();
        if tx.send(chunk).await.is_err() || terminal {
            return;
        }
    }

    if turn.hold_open {
        cancel.cancelled().await;
        if turn.on_cancel == CancelBehavior::ErrorChunk {
            let _ = tx.send(Chunk::error(ProviderError::Cancelled)).await;
        }
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn credential_fields(&self) -> Vec<CredentialField> {
        self.fields.clone()
    }

    fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        self.state.merge(config, &self.fields)
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
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.check_required()?;
        if let Some(error) = lock(&self.chat_error).clone() {
            return Err(error);
        }
        let model = self.state.resolve_model(&options.model)?;

        let turn = lock(&self.turns).pop_front().unwrap_or_else(|| {
            let echo = messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            ScriptedTurn::text(&[echo.as_str()])
        });
        *lock(&self.last_request) = Some((messages, options));

        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        tokio::spawn(play(turn, model, cancel, tx));
        Ok(rx)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.test_calls.fetch_add(1, Ordering::SeqCst);
        self.check_required()?;
        match lock(&self.connection_error).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn supports_model_listing(&self) -> bool {
        lock(&self.listed_models).is_some()
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.list_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let listed = lock(&self.listed_models).clone();
        listed.ok_or_else(|| ProviderError::not_supported("list_models", &self.name))
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

    async fn collect(mut rx: ChunkReceiver) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.push(chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_echo_without_script() {
        let provider = MockProvider::without_credentials("demo");
        let rx = provider
            .chat(
                CancellationToken::new(),
                vec![ChatMessage::user("ping")],
                ChatOptions::default(),
            )
            .await
            .unwrap();
        let chunks = collect(rx).await;
        assert_eq!(chunks[0].content, "ping");
        assert_eq!(chunks[0].model.as_deref(), Some("demo-model"));
        assert_eq!(chunks[1].finish_reason.as_deref(), Some("stop"));
        assert_eq!(provider.chat_calls(), 1);
    }

    #[tokio::test]
    async fn test_requires_api_key() {
        let provider = MockProvider::new("demo");
        let err = provider
            .chat(CancellationToken::new(), vec![], ChatOptions::default())
            .await
            .err();
        assert_eq!(err, Some(ProviderError::MissingCredential("API Key".into())));
        assert!(provider.test_connection().await.is_err());
    }

    #[tokio::test]
    async fn test_hold_open_until_cancelled() {
        let provider = MockProvider::without_credentials("demo");
        provider.push_turn(
            ScriptedTurn::new(vec![Chunk::content("partial")]).hold_open(CancelBehavior::ErrorChunk),
        );
        let cancel = CancellationToken::new();
        let mut rx = provider
            .chat(cancel.clone(), vec![ChatMessage::user("hi")], ChatOptions::default())
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().content, "partial");
        cancel.cancel();
        let last = rx.recv().await.unwrap();
        assert_eq!(last.error, Some(ProviderError::Cancelled));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_list_models_not_supported_by_default() {
        let provider = MockProvider::without_credentials("demo");
        assert!(!provider.supports_model_listing());
        assert!(matches!(
            provider.list_models().await,
            Err(ProviderError::NotSupported { .. })
        ));
        provider.set_listed_models(vec![ModelInfo::new("a")]);
        assert!(provider.supports_model_listing());
        assert_eq!(provider.list_models().await.unwrap().len(), 1);
        assert_eq!(provider.list_calls(), 2);
    }
}
