//! Switchboard Core - conversation domain, collaborator contracts and events.
//!
//! This crate owns the conversation aggregate and the service that mutates
//! and persists it. Storage, credential and UI concerns are expressed as
//! traits; in-memory implementations ship alongside so the engine can run
//! (and be tested) standalone.

pub mod conversations;
pub mod errors;
pub mod events;
pub mod providers;
pub mod utils;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
pub use errors::ValidationError;
