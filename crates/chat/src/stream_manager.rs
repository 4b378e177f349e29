//! Cancellation handles for in-flight assistant streams.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// Identifies one streaming assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub conversation_id: String,
    pub message_id: String,
}

impl StreamKey {
    pub fn new(conversation_id: &str, message_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        }
    }
}

#[derive(Default)]
struct StreamState {
    handles: HashMap<StreamKey, CancellationToken>,
    /// Registered keys in start order; the last one is the subject of `stop()`.
    order: Vec<StreamKey>,
    /// Keys stopped by the user, consumed by `was_cancelled`.
    cancelled: HashSet<StreamKey>,
}

/// Registry of cancellation handles keyed by conversation and message.
///
/// A key moves absent → active on `start` and back to absent on `clear`.
/// Every method takes the one internal lock, so the manager can be shared
/// between the orchestrator and its consumer tasks.
#[derive(Default)]
pub struct StreamManager {
    state: Mutex<StreamState>,
}

impl StreamManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Stream manager lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Register `token` for `key` and make it the subject of the next stop.
    ///
    /// An existing handle for the same key is replaced without being cancelled.
    pub fn start(&self, key: StreamKey, token: CancellationToken) {
        let mut state = self.lock();
        state.cancelled.remove(&key);
        if state.handles.insert(key.clone(), token).is_some() {
            debug!("Replacing stream handle for message {}", key.message_id);
            state.order.retain(|k| k != &key);
        }
        state.order.push(key);
    }

    /// Cancel the most recently started stream that is still registered.
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let Some(key) = state.order.last().cloned() else {
            return false;
        };
        Self::cancel_locked(&mut state, &key)
    }

    /// Cancel the stream registered for `key`.
    pub fn cancel(&self, key: &StreamKey) -> bool {
        let mut state = self.lock();
        Self::cancel_locked(&mut state, key)
    }

    fn cancel_locked(state: &mut StreamState, key: &StreamKey) -> bool {
        match state.handles.get(key) {
            Some(token) => {
                token.cancel();
                state.cancelled.insert(key.clone());
                debug!(
                    "Cancelled stream for conversation {} message {}",
                    key.conversation_id, key.message_id
                );
                true
            }
            None => false,
        }
    }

    /// Cancel every registered stream. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        let keys: Vec<StreamKey> = state.handles.keys().cloned().collect();
        for key in &keys {
            Self::cancel_locked(&mut state, key);
        }
        keys.len()
    }

    /// Remove the handle for `key` along with any unread stop mark.
    ///
    /// If `key` was the latest stream, the next newest registered one
    /// becomes the subject of `stop()`.
    pub fn clear(&self, key: &StreamKey) {
        let mut state = self.lock();
        state.handles.remove(key);
        state.cancelled.remove(key);
        state.order.retain(|k| k != key);
    }

    /// Whether `key` was stopped since it started. Consumes the mark.
    pub fn was_cancelled(&self, key: &StreamKey) -> bool {
        self.lock().cancelled.remove(key)
    }

    pub fn is_active(&self, key: &StreamKey) -> bool {
        self.lock().handles.contains_key(key)
    }

    pub fn active_count(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn current(&self) -> Option<StreamKey> {
        self.lock().order.last().cloned()
    }
}
