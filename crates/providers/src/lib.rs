//! Switchboard Providers
//!
//! Provider-agnostic chat streaming for the Switchboard engine.
//!
//! # Overview
//!
//! Every external model API is represented by one adapter behind the
//! [`ChatProvider`] capability trait. Adapters translate their native response
//! shape into a single bounded stream of [`Chunk`]s:
//!
//! ```text
//! +-------------------+     +-------------------+
//! |  OpenAI (SSE)     |     |  Anthropic (SSE)  |
//! +-------------------+     +-------------------+
//!            \                     /
//! +-------------------+     +-------------------+
//! |  Ollama (NDJSON)  |     |  Groq (rig SDK)   |
//! +-------------------+     +-------------------+
//!            \                     /
//!             v                   v
//!          +-------------------------+
//!          |  mpsc::Receiver<Chunk>  |  (bounded, closed once)
//!          +-------------------------+
//! ```
//!
//! The [`ProviderRegistry`] keeps configured adapters in registration order and
//! tracks the single active provider.

pub mod errors;
pub mod models;
pub mod provider;
pub mod registry;

pub use errors::ProviderError;
pub use models::{
    ChatMessage, ChatOptions, ChatRole, Chunk, CredentialField, ModelInfo, ProviderConfig, Usage,
    CHUNK_CHANNEL_CAPACITY,
};
pub use provider::{
    AnthropicProvider, CancelBehavior, ChatProvider, ChunkReceiver, GroqProvider, MockProvider,
    OllamaProvider, OpenAiProvider, ScriptedTurn,
};
pub use registry::ProviderRegistry;
