//! Chat provider trait and adapter implementations.

mod anthropic;
mod groq;
mod http;
mod mock;
mod ollama;
mod openai;
mod state;
mod traits;

pub use anthropic::AnthropicProvider;
pub use groq::GroqProvider;
pub use mock::{CancelBehavior, MockProvider, ScriptedTurn};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use traits::{ChatProvider, ChunkReceiver};
