//! Switchboard Chat
//!
//! Orchestrates chat turns across pluggable providers.
//!
//! # Overview
//!
//! - [`ChatOrchestrator`] persists user messages, starts provider streams and
//!   writes the assistant reply into the conversation as chunks arrive.
//! - [`ProviderService`] resolves credentials, validates connections, fails
//!   over between providers and keeps a staleness-bounded model cache.
//! - [`StreamManager`] tracks cancellation handles for in-flight streams.
//!
//! ```ignore
//! let providers = Arc::new(ProviderService::new(registry, secrets, inputs, cache, emitter.clone()));
//! providers.connect("openai", ProviderConfig::new().with("api_key", "sk-...")).await?;
//!
//! let chat = ChatOrchestrator::new(conversation_service, providers, emitter);
//! let conversation = chat.create_conversation(ConversationSettings::new("openai", "gpt-4o-mini")).await?;
//! chat.send_message(&conversation.id, "Hello").await?;
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod provider_service;
pub mod resource_cache;
pub mod stream_manager;
pub mod title;

pub use chat::{build_provider_messages, ChatOrchestrator, SubmittedMessage};
pub use config::{ChatConfig, ProviderServiceConfig, ProviderSettings};
pub use error::{ChatError, Result};
pub use provider_service::{ProviderInfo, ProviderService};
pub use resource_cache::{RefreshGuard, ResourceCache};
pub use stream_manager::{StreamKey, StreamManager};
pub use title::derive_title;
