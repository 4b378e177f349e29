//! Provider service lifecycle tests: connect, failover, healing and refresh.

use std::sync::Arc;
use std::time::Duration;

use switchboard_chat::{ChatError, ProviderService, ProviderServiceConfig, ProviderSettings};
use switchboard_core::events::MockEventEmitter;
use switchboard_core::providers::{
    InMemoryCacheStore, InMemoryInputsStore, InMemorySecretStore, ProviderInputs,
    ProviderInputsStore, ProviderSecretStore, ResourceCacheEntry, ResourceCacheSnapshot,
};
use switchboard_providers::{
    ChatProvider, CredentialField, MockProvider, ModelInfo, ProviderConfig, ProviderError,
    ProviderRegistry,
};

struct Fixture {
    service: Arc<ProviderService>,
    secrets: Arc<InMemorySecretStore>,
    inputs: Arc<InMemoryInputsStore>,
    emitter: MockEventEmitter,
}

fn fixture(providers: &[Arc<MockProvider>]) -> Fixture {
    fixture_with(providers, InMemoryCacheStore::new(), ProviderServiceConfig::default())
}

fn fixture_with(
    providers: &[Arc<MockProvider>],
    cache: InMemoryCacheStore,
    config: ProviderServiceConfig,
) -> Fixture {
    let registry = Arc::new(ProviderRegistry::with_providers(
        providers
            .iter()
            .map(|p| p.clone() as Arc<dyn ChatProvider>)
            .collect(),
    ));
    let secrets = Arc::new(InMemorySecretStore::new());
    let inputs = Arc::new(InMemoryInputsStore::new());
    let emitter = MockEventEmitter::new();
    let service = ProviderService::new(
        registry,
        secrets.clone(),
        inputs.clone(),
        Arc::new(cache),
        Arc::new(emitter.clone()),
    )
    .with_config(config);
    Fixture {
        service: Arc::new(service),
        secrets,
        inputs,
        emitter,
    }
}

fn key(value: &str) -> ProviderConfig {
    ProviderConfig::new().with("api_key", value)
}

fn model_ids(provider: &MockProvider) -> Vec<String> {
    provider.models().into_iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn test_connect_without_required_credential_touches_nothing() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);

    let err = f
        .service
        .connect("a", ProviderConfig::new().with("api_key", "   "))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing required credential"));
    assert_eq!(f.inputs.save_count(), 0);
    assert!(f.secrets.is_empty());
    assert_eq!(f.service.get_active(), None);
    assert_eq!(a.test_calls(), 0);

    let status = f.service.status("a").unwrap();
    assert!(!status.ok);
    assert!(status
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("missing required credential"));
    assert_eq!(f.emitter.providers_updated_count(), 1);
}

#[tokio::test]
async fn test_connect_persists_and_activates() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);

    f.service
        .connect(
            "a",
            key(" sk-1 ").with("base_url", "https://example.com/v1"),
        )
        .await
        .unwrap();

    assert_eq!(
        f.secrets.get_provider_secret("a", "api_key").unwrap().as_deref(),
        Some("sk-1")
    );
    let inputs = f.inputs.load_provider_inputs("a").unwrap().unwrap();
    assert_eq!(inputs.get("base_url").map(String::as_str), Some("https://example.com/v1"));
    assert!(!inputs.contains_key("api_key"));

    assert_eq!(f.service.get_active().as_deref(), Some("a"));
    assert!(f.service.is_connected("a"));
    assert!(f.service.status("a").unwrap().ok);
    assert_eq!(a.credentials().get("api_key"), Some("sk-1"));
    assert!(f.emitter.providers_updated_count() >= 1);
}

#[tokio::test]
async fn test_configure_does_not_change_active() {
    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let f = fixture(&[a.clone(), b.clone()]);

    f.service.connect("a", key("sk-a")).await.unwrap();
    f.service.configure("b", key("sk-b")).await.unwrap();
    assert_eq!(f.service.get_active().as_deref(), Some("a"));
    assert!(f.service.is_connected("b"));
}

#[tokio::test]
async fn test_failed_validation_rolls_back_credentials() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("sk-good")).await.unwrap();
    let saves = f.inputs.save_count();

    a.set_connection_error(Some(ProviderError::from_status(401, "bad key")));
    let err = f.service.connect("a", key("sk-bad")).await.unwrap_err();
    assert!(matches!(
        err,
        ChatError::Provider(ProviderError::Auth { status: 401, .. })
    ));

    assert_eq!(a.credentials().get("api_key"), Some("sk-good"));
    assert_eq!(
        f.secrets.get_provider_secret("a", "api_key").unwrap().as_deref(),
        Some("sk-good")
    );
    assert_eq!(f.inputs.save_count(), saves);
    let status = f.service.status("a").unwrap();
    assert!(!status.ok);
    assert!(status.message.unwrap().contains("bad key"));
}

#[tokio::test]
async fn test_validation_timeout() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![ModelInfo::new("m1")]);
    a.set_list_delay(Duration::from_millis(200));
    let config = ProviderServiceConfig {
        validation_timeout_secs: 0,
        ..Default::default()
    };
    let f = fixture_with(&[a.clone()], InMemoryCacheStore::new(), config);

    let err = f.service.connect("a", key("sk-1")).await.unwrap_err();
    assert!(matches!(err, ChatError::Provider(ProviderError::Timeout)));
    assert_eq!(f.service.get_active(), None);
    assert!(a.credentials().is_empty());
}

#[tokio::test]
async fn test_sensitive_value_in_plain_field_is_rejected() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);

    let err = f
        .service
        .connect(
            "a",
            key("sk-1").with("base_url", "https://example.com/v1?api_key=sk-1"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::SensitiveInput(field) if field == "base_url"));
    assert_eq!(f.inputs.save_count(), 0);
    assert!(f.secrets.is_empty());
    assert!(!f.service.status("a").unwrap().ok);
    assert_eq!(f.emitter.providers_updated_count(), 1);
}

#[tokio::test]
async fn test_stored_credentials_are_merged_with_overrides() {
    let a = Arc::new(MockProvider::with_fields(
        "a",
        vec![
            CredentialField::secret("api_key", "API Key", true),
            CredentialField::input("base_url", "Base URL", true),
        ],
    ));
    let f = fixture(&[a.clone()]);
    f.secrets.save_provider_secret("a", "api_key", "sk-stored").unwrap();
    let mut stored = ProviderInputs::new();
    stored.insert("base_url".to_string(), "https://stored.example.com".to_string());
    f.inputs.save_provider_inputs("a", &stored).unwrap();

    let resolved = f
        .service
        .resolve_credentials(
            a.as_ref(),
            &ProviderConfig::new().with("base_url", "https://override.example.com"),
        )
        .unwrap();
    assert_eq!(resolved.get("api_key"), Some("sk-stored"));
    assert_eq!(resolved.get("base_url"), Some("https://override.example.com"));
}

#[tokio::test]
async fn test_disconnect_fails_over_with_wrap_around() {
    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let c = Arc::new(MockProvider::new("c"));
    let f = fixture(&[a.clone(), b.clone(), c.clone()]);

    f.service.connect("a", key("sk-a")).await.unwrap();
    f.service.connect("c", key("sk-c")).await.unwrap();
    assert_eq!(f.service.get_active().as_deref(), Some("c"));

    f.service.disconnect("c").await.unwrap();
    assert_eq!(f.service.get_active().as_deref(), Some("a"));
    assert!(c.credentials().is_empty());
    assert!(!f.service.is_connected("c"));
    assert_eq!(f.service.status("c"), None);
    assert_eq!(f.inputs.load_provider_inputs("c").unwrap(), None);

    f.service.disconnect("a").await.unwrap();
    assert_eq!(f.service.get_active(), None);
    assert!(f.secrets.is_empty());
}

#[tokio::test]
async fn test_disconnect_inactive_keeps_selection() {
    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let f = fixture(&[a.clone(), b.clone()]);

    f.service.connect("b", key("sk-b")).await.unwrap();
    f.service.configure("a", key("sk-a")).await.unwrap();
    f.service.disconnect("a").await.unwrap();
    assert_eq!(f.service.get_active().as_deref(), Some("b"));
}

#[tokio::test]
async fn test_list_heals_active_selection() {
    let a = Arc::new(MockProvider::new("a"));
    let b = Arc::new(MockProvider::new("b"));
    let f = fixture(&[a.clone(), b.clone()]);
    f.secrets.save_provider_secret("b", "api_key", "sk-b").unwrap();
    f.inputs
        .save_provider_inputs("b", &ProviderInputs::new())
        .unwrap();

    let listed = f.service.list();
    assert_eq!(f.service.get_active().as_deref(), Some("b"));
    assert_eq!(listed.len(), 2);
    assert!(!listed[0].connected);
    assert!(listed[1].connected);
    assert!(listed[1].active);
    assert_eq!(b.credentials().get("api_key"), Some("sk-b"));
}

#[tokio::test]
async fn test_list_clears_unusable_active_provider() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("sk-a")).await.unwrap();
    f.secrets.delete_provider_secret("a", "api_key").unwrap();

    let listed = f.service.list();
    assert_eq!(f.service.get_active(), None);
    assert!(!listed[0].active);
}

#[tokio::test]
async fn test_connect_caches_models_filtered_by_settings() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![
        ModelInfo::new("m1"),
        ModelInfo::new("m2"),
        ModelInfo::new("m3"),
    ]);
    let f = fixture(&[a.clone()]);

    f.service.connect("a", key("sk-a")).await.unwrap();
    assert_eq!(a.test_calls(), 0);
    assert_eq!(a.list_calls(), 1);
    assert_eq!(model_ids(&a), vec!["m1", "m2", "m3"]);
    assert_eq!(f.service.resources().get("a").unwrap().models.len(), 3);

    f.service
        .set_provider_settings(
            "a",
            ProviderSettings {
                enabled_models: vec!["m3".into(), "m1".into(), "gone".into()],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(model_ids(&a), vec!["m3", "m1"]);
}

#[tokio::test]
async fn test_concurrent_refresh_is_a_no_op() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![ModelInfo::new("m1")]);
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("sk-a")).await.unwrap();
    assert_eq!(a.list_calls(), 1);

    a.set_list_delay(Duration::from_millis(50));
    let (first, second) = tokio::join!(
        f.service.refresh_resources("a"),
        f.service.refresh_resources("a")
    );
    assert!(first.unwrap());
    assert!(!second.unwrap());
    assert_eq!(a.list_calls(), 2);
    assert!(!f.service.resources().is_refreshing("a"));
}

#[tokio::test]
async fn test_list_spawns_refresh_when_stale() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![ModelInfo::new("m1")]);
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("sk-a")).await.unwrap();
    f.service
        .set_provider_settings(
            "a",
            ProviderSettings {
                refresh_interval_secs: Some(0),
                ..Default::default()
            },
        )
        .unwrap();

    a.set_listed_models(vec![ModelInfo::new("m1"), ModelInfo::new("m2")]);
    f.service.list();
    for _ in 0..200 {
        if a.list_calls() >= 2 && !f.service.resources().is_refreshing("a") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(a.list_calls() >= 2);
    assert_eq!(f.service.resources().get("a").unwrap().models.len(), 2);
}

#[tokio::test]
async fn test_initialize_restores_cache_and_credentials() {
    let a = Arc::new(MockProvider::new("a"));
    let mut snapshot = ResourceCacheSnapshot::new();
    snapshot.insert(
        "a".to_string(),
        ResourceCacheEntry::new(vec![ModelInfo::new("x"), ModelInfo::new("y")]),
    );
    let f = fixture_with(
        &[a.clone()],
        InMemoryCacheStore::with_snapshot(snapshot),
        ProviderServiceConfig::default(),
    );
    f.secrets.save_provider_secret("a", "api_key", "sk-a").unwrap();
    f.inputs
        .save_provider_inputs("a", &ProviderInputs::new())
        .unwrap();

    f.service.initialize().unwrap();
    assert_eq!(model_ids(&a), vec!["x", "y"]);
    assert_eq!(a.credentials().get("api_key"), Some("sk-a"));
    assert_eq!(f.service.get_active().as_deref(), Some("a"));
}

#[tokio::test]
async fn test_test_connection_records_status() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("sk-a")).await.unwrap();

    a.set_connection_error(Some(ProviderError::Network("unreachable".into())));
    let status = f.service.test_connection("a").await.unwrap();
    assert!(!status.ok);
    assert_eq!(f.service.status("a"), Some(status));

    a.set_connection_error(None);
    assert!(f.service.test_connection("a").await.unwrap().ok);
}

#[tokio::test]
async fn test_test_connection_without_credentials_records_failure() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a.clone()]);

    let err = f.service.test_connection("a").await.unwrap_err();
    assert!(matches!(err, ChatError::MissingCredential(_)));
    let status = f.service.status("a").unwrap();
    assert!(!status.ok);
    assert_eq!(f.emitter.providers_updated_count(), 1);
    assert_eq!(a.test_calls(), 0);
}

#[tokio::test]
async fn test_chat_resolution_waits_for_connect_in_flight() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![ModelInfo::new("m1")]);
    let f = fixture(&[a.clone()]);
    f.service.connect("a", key("old-key")).await.unwrap();

    a.set_list_delay(Duration::from_millis(200));
    let (connected, resolved) = tokio::join!(f.service.connect("a", key("new-key")), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.service.list();
        assert_eq!(a.credentials().get("api_key"), Some("new-key"));
        f.service.resolve_for_chat("a").await
    });
    connected.unwrap();
    let resolved = resolved.unwrap();

    assert_eq!(resolved.credentials().get("api_key"), Some("new-key"));
    assert_eq!(
        f.secrets.get_provider_secret("a", "api_key").unwrap().as_deref(),
        Some("new-key")
    );
}

#[tokio::test]
async fn test_failed_refresh_is_not_retried_on_every_list() {
    let a = Arc::new(MockProvider::new("a"));
    a.set_listed_models(vec![ModelInfo::new("m1")]);
    a.set_list_delay(Duration::from_millis(1500));
    let mut old = ResourceCacheEntry::new(vec![ModelInfo::new("m1")]);
    old.updated_at -= 8 * 60 * 60 * 1000;
    let mut snapshot = ResourceCacheSnapshot::new();
    snapshot.insert("a".to_string(), old);
    let f = fixture_with(
        &[a.clone()],
        InMemoryCacheStore::with_snapshot(snapshot),
        ProviderServiceConfig {
            validation_timeout_secs: 1,
            ..Default::default()
        },
    );
    f.secrets.save_provider_secret("a", "api_key", "sk-a").unwrap();
    f.inputs
        .save_provider_inputs("a", &ProviderInputs::new())
        .unwrap();
    f.service.initialize().unwrap();

    f.service.list();
    for _ in 0..400 {
        if a.list_calls() >= 1 && !f.service.resources().is_refreshing("a") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(a.list_calls(), 1);
    assert!(!f.service.status("a").unwrap().ok);

    f.service.list();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.list_calls(), 1);
    assert_eq!(f.service.resources().get("a").unwrap().models.len(), 1);
}

#[tokio::test]
async fn test_set_active_unknown_provider() {
    let a = Arc::new(MockProvider::new("a"));
    let f = fixture(&[a]);
    let err = f.service.set_active("zzz").await.unwrap_err();
    assert!(matches!(err, ChatError::ProviderNotFound(_)));
    f.service.set_active("a").await.unwrap();
    assert_eq!(f.service.get_active().as_deref(), Some("a"));
    f.service.set_active("").await.unwrap();
    assert_eq!(f.service.get_active(), None);
}
