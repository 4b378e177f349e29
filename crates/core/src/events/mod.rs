//! Chat events module.
//!
//! Event types emitted while conversations change and streams progress, and
//! the emitter trait runtime adapters implement to forward them to a UI.

mod chat_event;
mod emitter;

pub use chat_event::*;
pub use emitter::*;
