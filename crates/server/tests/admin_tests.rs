use relay_core::auth::AuthStore;
use relay_core::config::Config;
use relay_core::metrics::Metrics;
use relay_core::registry::{ModelDescriptor, ModelRegistry};
use relay_core::transport::TransportPool;
use relay_provider::build_registry;
use relay_provider::routing::RoutingEngine;
use relay_server::{AppState, build_router};
use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helper: build a test AppState backed by a real temp config file
// ---------------------------------------------------------------------------

struct TestHarness {
    state: AppState,
    config_path: std::path::PathBuf,
    _temp_dir: tempfile::TempDir,
}

fn create_test_harness(mutate: impl FnOnce(&mut Config)) -> TestHarness {
    let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
    let config_path = temp_dir.path().join("config.yaml");

    let mut config = Config::default();
    mutate(&mut config);
    config.sanitize();

    let yaml = serde_yaml_ng::to_string(&config).expect("failed to serialize config");
    std::fs::write(&config_path, &yaml).expect("failed to write config");

    let store = Arc::new(AuthStore::new());
    store.replace_all(config.build_auths());

    let registry = Arc::new(ModelRegistry::new());
    for entry in &config.credentials {
        let models = entry
            .models
            .iter()
            .map(|id| ModelDescriptor::new(id.as_str(), entry.provider.as_str()))
            .collect();
        registry.register_client(&entry.id, &entry.provider, models);
    }

    let pool = Arc::new(TransportPool::new());
    let executors = Arc::new(build_registry(pool, config.proxy_url.clone()));
    let engine = Arc::new(RoutingEngine::new(
        store.clone(),
        registry.clone(),
        executors.clone(),
    ));

    let state = AppState {
        config: Arc::new(ArcSwap::from_pointee(config)),
        store,
        registry,
        engine,
        executors,
        translators: Arc::new(relay_translator::build_registry()),
        metrics: Arc::new(Metrics::new()),
        config_path: Arc::new(Mutex::new(config_path.to_str().unwrap().to_string())),
    };

    TestHarness {
        state,
        config_path,
        _temp_dir: temp_dir,
    }
}

/// Send a request through the router and return (status, body as Value).
async fn send_request(harness: &TestHarness, request: Request<Body>) -> (StatusCode, Value) {
    let router = build_router(harness.state.clone());
    let response = router.oneshot(request).await.expect("request failed");
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let value: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn put(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json!({"value": value}).to_string()))
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Routing mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_routing_mode_aliases_are_normalized() {
    let harness = create_test_harness(|_| {});

    let (status, _) = send_request(&harness, put("/routing/mode", json!("key"))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send_request(&harness, get("/routing/mode")).await;
    assert_eq!(body["value"], "key-based");

    let (status, _) = send_request(&harness, put("/routing/mode", json!("provider"))).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send_request(&harness, get("/routing/mode")).await;
    assert_eq!(body["value"], "provider-based");

    let (status, body) =
        send_request(&harness, put("/routing/mode", json!("invalid-mode"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body:?}");
}

#[tokio::test]
async fn test_routing_mode_persists_to_config_file() {
    let harness = create_test_harness(|_| {});

    let (status, _) = send_request(&harness, put("/routing/mode", json!("model-only"))).await;
    assert_eq!(status, StatusCode::OK);

    let written = std::fs::read_to_string(&harness.config_path).unwrap();
    let reloaded: Config = serde_yaml_ng::from_str(&written).unwrap();
    assert_eq!(reloaded.routing.mode.as_str(), "key-based");
}

// ---------------------------------------------------------------------------
// Fallback models / chain validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fallback_models_cycle_rejection() {
    let harness = create_test_harness(|_| {});

    let (status, _) =
        send_request(&harness, put("/fallback/models", json!({"a": "a"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_request(
        &harness,
        put("/fallback/models", json!({"a": "b", "b": "a"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_request(
        &harness,
        put("/fallback/models", json!({"a": "b", "b": "c", "c": "d"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_request(&harness, get("/fallback/models")).await;
    assert_eq!(body["value"]["a"], "b");
    assert_eq!(body["value"]["c"], "d");
}

#[tokio::test]
async fn test_fallback_chain_length_boundary() {
    let harness = create_test_harness(|_| {});

    let twenty: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    let (status, _) = send_request(&harness, put("/fallback/chain", json!(twenty))).await;
    assert_eq!(status, StatusCode::OK);

    let twenty_one: Vec<String> = (0..21).map(|i| format!("m{i}")).collect();
    let (status, _) = send_request(&harness, put("/fallback/chain", json!(twenty_one))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // The rejected write did not clobber the accepted one
    let (_, body) = send_request(&harness, get("/fallback/chain")).await;
    assert_eq!(body["value"].as_array().unwrap().len(), 20);
}

// ---------------------------------------------------------------------------
// Provider priority and order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_provider_priority_per_model_crud() {
    let harness = create_test_harness(|_| {});

    let (status, _) = send_request(
        &harness,
        put(
            "/provider-priority/glm-4.5",
            json!(["kilocode", "ampcode"]),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_request(&harness, get("/provider-priority/glm-4.5")).await;
    assert_eq!(body["value"], json!(["kilocode", "ampcode"]));

    let (_, body) = send_request(&harness, get("/provider-priority")).await;
    assert_eq!(body["value"]["glm-4.5"], json!(["kilocode", "ampcode"]));

    let delete = Request::builder()
        .method("DELETE")
        .uri("/provider-priority/glm-4.5")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_request(&harness, delete).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_request(&harness, get("/provider-priority/glm-4.5")).await;
    assert_eq!(body["value"], json!([]));
}

#[tokio::test]
async fn test_provider_order_round_trip() {
    let harness = create_test_harness(|_| {});

    let (status, _) = send_request(
        &harness,
        put("/provider-order", json!(["trae", "cline", "ampcode"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_request(&harness, get("/provider-order")).await;
    assert_eq!(body["value"], json!(["trae", "cline", "ampcode"]));
}

// ---------------------------------------------------------------------------
// Inbound API surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_models_listing_requires_api_key() {
    let harness = create_test_harness(|config| {
        config.api_keys = vec!["secret".to_string()];
        config.credentials = vec![relay_core::config::CredentialEntry {
            label: "kilo".into(),
            provider: "kilocode".into(),
            api_key: Some("kc-1".into()),
            models: vec!["glm-4.5".into()],
            ..Default::default()
        }];
    });

    let (status, _) = send_request(&harness, get("/v1/models")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let authed = Request::builder()
        .method("GET")
        .uri("/v1/models")
        .header("authorization", "Bearer secret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send_request(&harness, authed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "glm-4.5");
}

#[tokio::test]
async fn test_chat_completions_without_model_is_bad_request() {
    let harness = create_test_harness(|_| {});
    let (status, _) = send_request(
        &harness,
        post_json("/v1/chat/completions", json!({"messages": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_completions_without_credentials_is_unavailable() {
    let harness = create_test_harness(|_| {});
    let (status, body) = send_request(
        &harness,
        post_json(
            "/v1/chat/completions",
            json!({"model": "glm-4.5", "messages": []}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body:?}");
}

#[tokio::test]
async fn test_health_is_public() {
    let harness = create_test_harness(|config| {
        config.api_keys = vec!["secret".to_string()];
    });
    let (status, body) = send_request(&harness, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_gemini_route_rejects_unknown_action() {
    let harness = create_test_harness(|_| {});
    let (status, _) = send_request(
        &harness,
        post_json(
            "/v1beta/models/gemini-2.0-flash:countTokens",
            json!({"contents": []}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
