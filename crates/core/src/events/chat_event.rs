//! Chat events published to the UI layer.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::conversations::{Message, MessageMetadata};
use crate::utils::time_utils::now_millis;

/// Kind of chat event, serialized as its dotted wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatEventType {
    #[serde(rename = "chat.message")]
    Message,
    #[serde(rename = "chat.stream.start")]
    StreamStart,
    #[serde(rename = "chat.stream.chunk")]
    StreamChunk,
    #[serde(rename = "chat.stream.error")]
    StreamError,
    #[serde(rename = "chat.stream.complete")]
    StreamComplete,
    #[serde(rename = "chat.conversation.title")]
    ConversationTitle,
}

impl ChatEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatEventType::Message => "chat.message",
            ChatEventType::StreamStart => "chat.stream.start",
            ChatEventType::StreamChunk => "chat.stream.chunk",
            ChatEventType::StreamError => "chat.stream.error",
            ChatEventType::StreamComplete => "chat.stream.complete",
            ChatEventType::ConversationTitle => "chat.conversation.title",
        }
    }

    /// Whether this event belongs to the assistant stream lifecycle.
    pub fn is_stream_event(&self) -> bool {
        matches!(
            self,
            ChatEventType::StreamStart
                | ChatEventType::StreamChunk
                | ChatEventType::StreamError
                | ChatEventType::StreamComplete
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    #[serde(rename = "type")]
    pub event_type: ChatEventType,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl ChatEvent {
    fn new(
        event_type: ChatEventType,
        conversation_id: &str,
        message_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            conversation_id: conversation_id.to_string(),
            message_id: message_id.map(str::to_string),
            timestamp: now_millis(),
            payload,
        }
    }

    /// A user message was persisted.
    pub fn message(message: &Message) -> Self {
        Self::new(
            ChatEventType::Message,
            &message.conversation_id,
            Some(&message.id),
            serde_json::to_value(message).unwrap_or_default(),
        )
    }

    /// The streaming assistant placeholder was created.
    pub fn stream_start(message: &Message) -> Self {
        Self::new(
            ChatEventType::StreamStart,
            &message.conversation_id,
            Some(&message.id),
            serde_json::to_value(message).unwrap_or_default(),
        )
    }

    pub fn stream_chunk(
        conversation_id: &str,
        message_id: &str,
        block_index: usize,
        content: &str,
    ) -> Self {
        Self::new(
            ChatEventType::StreamChunk,
            conversation_id,
            Some(message_id),
            json!({ "blockIndex": block_index, "content": content, "isDone": false }),
        )
    }

    pub fn stream_error(
        conversation_id: &str,
        message_id: &str,
        error: &str,
        status_code: Option<u16>,
    ) -> Self {
        Self::new(
            ChatEventType::StreamError,
            conversation_id,
            Some(message_id),
            json!({ "isDone": true, "error": error, "statusCode": status_code }),
        )
    }

    pub fn stream_complete(
        conversation_id: &str,
        message_id: &str,
        metadata: &MessageMetadata,
    ) -> Self {
        Self::new(
            ChatEventType::StreamComplete,
            conversation_id,
            Some(message_id),
            json!({ "isDone": true, "metadata": metadata }),
        )
    }

    pub fn conversation_title(conversation_id: &str, title: &str) -> Self {
        Self::new(
            ChatEventType::ConversationTitle,
            conversation_id,
            None,
            json!({ "title": title }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_value(ChatEventType::StreamComplete).unwrap();
        assert_eq!(json, "chat.stream.complete");
        assert_eq!(ChatEventType::Message.as_str(), "chat.message");
        assert!(!ChatEventType::Message.is_stream_event());
        assert!(ChatEventType::StreamChunk.is_stream_event());
    }

    #[test]
    fn test_chunk_event_payload() {
        let event = ChatEvent::stream_chunk("c1", "m1", 0, "He");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chat.stream.chunk");
        assert_eq!(json["conversationId"], "c1");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["payload"]["blockIndex"], 0);
        assert_eq!(json["payload"]["isDone"], false);
    }

    #[test]
    fn test_complete_event_carries_metadata() {
        let metadata = MessageMetadata::new("demo", "m1").with_usage(3, 2, 0);
        let event = ChatEvent::stream_complete("c1", "m1", &metadata);
        assert_eq!(event.payload["metadata"]["tokensTotal"], 5);
        assert_eq!(event.payload["metadata"]["finishReason"], "stop");
    }

    #[test]
    fn test_title_event_has_no_message_id() {
        let event = ChatEvent::conversation_title("c1", "Hello");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("messageId").is_none());
        assert_eq!(json["payload"]["title"], "Hello");
    }
}
