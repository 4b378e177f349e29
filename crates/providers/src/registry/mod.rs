//! Provider registry module.
//!
//! Keeps every known adapter in registration order and tracks which one is
//! active for new conversations.

mod registry;

pub use registry::ProviderRegistry;
