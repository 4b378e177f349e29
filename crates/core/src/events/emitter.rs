//! Event emitter trait and implementations.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{ChatEvent, ChatEventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Trait for publishing engine events to the presentation layer.
///
/// # Design Rules
///
/// - Every method is fire-and-forget and must not block
/// - Failure to deliver must not affect the operation that emitted
pub trait EventEmitter: Send + Sync {
    fn emit_chat_event(&self, event: ChatEvent);

    /// Provider connection state or selection changed.
    fn emit_providers_updated(&self);

    /// The set of available models changed.
    fn emit_catalog_updated(&self);

    fn emit_toast(&self, level: ToastLevel, message: &str);
}

/// Emitter used when no UI session is attached.
#[derive(Clone, Default)]
pub struct NoOpEventEmitter;

impl EventEmitter for NoOpEventEmitter {
    fn emit_chat_event(&self, _event: ChatEvent) {}
    fn emit_providers_updated(&self) {}
    fn emit_catalog_updated(&self) {}
    fn emit_toast(&self, _level: ToastLevel, _message: &str) {}
}

/// Everything a [`MockEventEmitter`] has seen.
#[derive(Debug, Clone, PartialEq)]
pub enum EmittedEvent {
    Chat(ChatEvent),
    ProvidersUpdated,
    CatalogUpdated,
    Toast { level: ToastLevel, message: String },
}

/// Mock emitter for testing - collects emitted events.
#[derive(Clone, Default)]
pub struct MockEventEmitter {
    events: Arc<Mutex<Vec<EmittedEvent>>>,
}

impl MockEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EmittedEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns all collected events.
    pub fn events(&self) -> Vec<EmittedEvent> {
        self.lock().clone()
    }

    /// Returns only the chat events, in emission order.
    pub fn chat_events(&self) -> Vec<ChatEvent> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                EmittedEvent::Chat(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn chat_event_types(&self) -> Vec<ChatEventType> {
        self.chat_events().iter().map(|e| e.event_type).collect()
    }

    pub fn count_of(&self, event_type: ChatEventType) -> usize {
        self.chat_events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn providers_updated_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|e| matches!(e, EmittedEvent::ProvidersUpdated))
            .count()
    }

    /// Clears collected events.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl EventEmitter for MockEventEmitter {
    fn emit_chat_event(&self, event: ChatEvent) {
        self.lock().push(EmittedEvent::Chat(event));
    }

    fn emit_providers_updated(&self) {
        self.lock().push(EmittedEvent::ProvidersUpdated);
    }

    fn emit_catalog_updated(&self) {
        self.lock().push(EmittedEvent::CatalogUpdated);
    }

    fn emit_toast(&self, level: ToastLevel, message: &str) {
        self.lock().push(EmittedEvent::Toast {
            level,
            message: message.to_string(),
        });
    }
}
