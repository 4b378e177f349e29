//! End-to-end tests for chat turns against the scripted mock provider.

use std::sync::Arc;
use std::time::Duration;

use switchboard_chat::{ChatError, ChatOrchestrator, ProviderService};
use switchboard_core::conversations::{
    ConversationService, ConversationSettings, InMemoryChatRepository, FINISH_REASON_CANCELLED,
    FINISH_REASON_ERROR, FINISH_REASON_STOP,
};
use switchboard_core::events::{ChatEventType, MockEventEmitter};
use switchboard_core::providers::{InMemoryCacheStore, InMemoryInputsStore, InMemorySecretStore};
use switchboard_providers::{
    CancelBehavior, ChatProvider, ChatRole, Chunk, MockProvider, ProviderError, ProviderRegistry,
    ScriptedTurn, Usage,
};

struct Harness {
    chat: ChatOrchestrator,
    emitter: MockEventEmitter,
    mock: Arc<MockProvider>,
}

fn harness(mock: MockProvider) -> Harness {
    let mock = Arc::new(mock);
    let registry = Arc::new(ProviderRegistry::with_providers(vec![
        mock.clone() as Arc<dyn ChatProvider>
    ]));
    let emitter = MockEventEmitter::new();
    let providers = Arc::new(ProviderService::new(
        registry,
        Arc::new(InMemorySecretStore::new()),
        Arc::new(InMemoryInputsStore::new()),
        Arc::new(InMemoryCacheStore::new()),
        Arc::new(emitter.clone()),
    ));
    let conversations = Arc::new(ConversationService::new(Arc::new(
        InMemoryChatRepository::new(),
    )));
    let chat = ChatOrchestrator::new(conversations, providers, Arc::new(emitter.clone()));
    Harness {
        chat,
        emitter,
        mock,
    }
}

async fn wait_for(emitter: &MockEventEmitter, event_type: ChatEventType, count: usize) {
    for _ in 0..200 {
        if emitter.count_of(event_type) >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", event_type.as_str());
}

#[tokio::test]
async fn test_streamed_reply_is_persisted_with_usage() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::new(vec![
        Chunk::content("He"),
        Chunk::content("llo"),
        Chunk::finish("stop").with_usage(Usage::new(3, 2)),
    ]));
    let h = harness(mock);

    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();
    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    assert_eq!(submitted.user_message.text(), "Hi");
    submitted.completion.unwrap().await.unwrap();

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    assert_eq!(snapshot.messages.len(), 2);
    let reply = &snapshot.messages[1];
    assert!(!reply.is_streaming);
    assert_eq!(reply.blocks[0].content, "Hello");

    let metadata = reply.metadata.as_ref().unwrap();
    assert_eq!(metadata.provider, "demo");
    assert_eq!(metadata.model, "m1");
    assert_eq!(metadata.tokens_in, 3);
    assert_eq!(metadata.tokens_out, 2);
    assert_eq!(metadata.tokens_total, 5);
    assert_eq!(metadata.finish_reason, FINISH_REASON_STOP);

    assert_eq!(
        h.emitter.chat_event_types(),
        vec![
            ChatEventType::Message,
            ChatEventType::ConversationTitle,
            ChatEventType::StreamStart,
            ChatEventType::StreamChunk,
            ChatEventType::StreamChunk,
            ChatEventType::StreamComplete,
        ]
    );
    assert_eq!(h.chat.streams().active_count(), 0);
}

#[tokio::test]
async fn test_no_provider_stores_message_only() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::default())
        .await
        .unwrap();

    let message = h.chat.send_message(&conversation.id, "Hello").await.unwrap();
    assert_eq!(message.text(), "Hello");
    assert_eq!(h.emitter.chat_event_types(), vec![ChatEventType::Message]);

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(h.mock.chat_calls(), 0);
}

#[tokio::test]
async fn test_stop_closes_stream_as_cancelled() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::new(vec![Chunk::content("partial")]).hold_open(CancelBehavior::Close));
    let h = harness(mock);
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    wait_for(&h.emitter, ChatEventType::StreamChunk, 1).await;
    assert!(h.chat.stop_stream());
    submitted.completion.unwrap().await.unwrap();

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    let reply = &snapshot.messages[1];
    assert_eq!(reply.text(), "partial");
    let metadata = reply.metadata.as_ref().unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_CANCELLED);
    assert_eq!(metadata.error, None);
    assert_eq!(h.emitter.count_of(ChatEventType::StreamError), 0);
    assert_eq!(h.emitter.count_of(ChatEventType::StreamComplete), 1);
    assert_eq!(h.chat.streams().active_count(), 0);
}

#[tokio::test]
async fn test_cancelled_error_chunk_is_not_an_error() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::new(vec![]).hold_open(CancelBehavior::ErrorChunk));
    let h = harness(mock);
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    let placeholder = submitted.assistant_message.clone().unwrap();
    assert!(h.chat.stop_stream_for(&conversation.id, &placeholder.id));
    submitted.completion.unwrap().await.unwrap();

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    let metadata = snapshot.messages[1].metadata.clone().unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_CANCELLED);
    assert_eq!(h.emitter.count_of(ChatEventType::StreamError), 0);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_streams() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::new(vec![]).hold_open(CancelBehavior::Close));
    let h = harness(mock);
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    h.chat.shutdown();
    submitted.completion.unwrap().await.unwrap();

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    let metadata = snapshot.messages[1].metadata.clone().unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_CANCELLED);
}

#[tokio::test]
async fn test_provider_error_mid_stream_finalizes_with_error() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::new(vec![
        Chunk::content("Hal"),
        Chunk::error(ProviderError::from_status(503, "overloaded")),
    ]));
    let h = harness(mock);
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    submitted.completion.unwrap().await.unwrap();

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    let reply = &snapshot.messages[1];
    assert_eq!(reply.text(), "Hal");
    let metadata = reply.metadata.as_ref().unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_ERROR);
    assert_eq!(metadata.status_code, Some(503));
    assert!(metadata.error.is_some());

    let events = h.emitter.chat_events();
    let error = events
        .iter()
        .find(|e| e.event_type == ChatEventType::StreamError)
        .unwrap();
    assert_eq!(error.payload["statusCode"], 503);
    assert_eq!(error.payload["isDone"], true);
    assert_eq!(h.emitter.count_of(ChatEventType::StreamComplete), 0);
}

#[tokio::test]
async fn test_unresolvable_provider_fails_the_turn() {
    let h = harness(MockProvider::new("keyed"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("keyed", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    assert!(submitted.completion.is_none());
    let reply = submitted.assistant_message.unwrap();
    let metadata = reply.metadata.unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_ERROR);
    assert_eq!(
        metadata.error.as_deref(),
        Some("missing required credential: API Key")
    );
    assert_eq!(h.emitter.count_of(ChatEventType::StreamError), 1);
    assert_eq!(h.mock.chat_calls(), 0);
}

#[tokio::test]
async fn test_chat_call_error_fails_the_turn() {
    let mock = MockProvider::without_credentials("demo");
    mock.set_chat_error(Some(ProviderError::Network("connection refused".into())));
    let h = harness(mock);
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let submitted = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    assert!(submitted.completion.is_none());
    let metadata = submitted.assistant_message.unwrap().metadata.unwrap();
    assert_eq!(metadata.finish_reason, FINISH_REASON_ERROR);
    assert_eq!(h.chat.streams().active_count(), 0);
}

#[tokio::test]
async fn test_history_is_sent_on_follow_up() {
    let mock = MockProvider::without_credentials("demo");
    mock.push_turn(ScriptedTurn::text(&["Hello there"]));
    let h = harness(mock);
    let mut settings = ConversationSettings::new("demo", "m1");
    settings.system_prompt = Some("Be brief.".to_string());
    settings.temperature = Some(0.2);
    let conversation = h.chat.create_conversation(settings).await.unwrap();

    let first = h.chat.submit_message(&conversation.id, "Hi").await.unwrap();
    first.completion.unwrap().await.unwrap();
    let second = h
        .chat
        .submit_message(&conversation.id, "How are you?")
        .await
        .unwrap();
    second.completion.unwrap().await.unwrap();

    let (messages, options) = h.mock.last_request().unwrap();
    let roles: Vec<ChatRole> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::User
        ]
    );
    assert_eq!(messages[2].content, "Hello there");
    assert_eq!(options.model, "m1");
    assert_eq!(options.temperature, Some(0.2));

    // Without a scripted turn the mock echoes the prompt.
    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    assert_eq!(snapshot.messages[3].text(), "How are you?");
    assert_eq!(h.emitter.count_of(ChatEventType::ConversationTitle), 1);
}

#[tokio::test]
async fn test_long_first_message_is_truncated_into_title() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let content = "x".repeat(80);
    let submitted = h.chat.submit_message(&conversation.id, &content).await.unwrap();
    submitted.completion.unwrap().await.unwrap();

    let expected = format!("{}...", "x".repeat(50));
    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    assert_eq!(snapshot.title, expected);
    let title_event = h
        .emitter
        .chat_events()
        .into_iter()
        .find(|e| e.event_type == ChatEventType::ConversationTitle)
        .unwrap();
    assert_eq!(title_event.payload["title"], expected.as_str());
    assert_eq!(title_event.message_id, None);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_without_mutation() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    let err = h.chat.send_message(&conversation.id, "   ").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    let err = h.chat.send_message("", "Hi").await.unwrap_err();
    assert!(matches!(err, ChatError::InvalidInput(_)));
    assert!(h.emitter.is_empty());

    let err = h.chat.send_message("missing", "Hi").await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound(_)));

    let snapshot = h.chat.get_conversation(&conversation.id).await.unwrap();
    assert!(snapshot.messages.is_empty());
}

#[tokio::test]
async fn test_archived_conversation_rejects_messages() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::new("demo", "m1"))
        .await
        .unwrap();

    h.chat.delete_conversation(&conversation.id).await.unwrap();
    let err = h.chat.send_message(&conversation.id, "Hi").await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound(_)));
    assert!(h.chat.list_conversations(false).await.unwrap().is_empty());
    assert_eq!(h.chat.list_conversations(true).await.unwrap().len(), 1);

    h.chat.restore_conversation(&conversation.id).await.unwrap();
    assert_eq!(h.chat.list_conversations(false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_conversation_model() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::default())
        .await
        .unwrap();

    let updated = h
        .chat
        .update_conversation_model(&conversation.id, "demo", "m2")
        .await
        .unwrap();
    assert_eq!(updated.settings.provider, "demo");
    assert_eq!(updated.settings.model, "m2");

    let err = h
        .chat
        .update_conversation_model(&conversation.id, "nope", "m1")
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::ProviderNotFound(_)));
}

#[tokio::test]
async fn test_purge_clears_active_conversation() {
    let h = harness(MockProvider::without_credentials("demo"));
    let conversation = h
        .chat
        .create_conversation(ConversationSettings::default())
        .await
        .unwrap();

    h.chat.set_active_conversation(&conversation.id).await.unwrap();
    assert_eq!(h.chat.get_active_conversation(), Some(conversation.id.clone()));
    h.chat.purge_conversation(&conversation.id).await.unwrap();
    assert_eq!(h.chat.get_active_conversation(), None);
    assert!(h.chat.get_conversation(&conversation.id).await.is_err());
}
