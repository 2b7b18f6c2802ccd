//! HTTP API integration tests
//!
//! Drive the full router with tower's oneshot against an in-memory
//! ledger: auth, the suggestion pipeline, decisions, pagination, and
//! rate limiting.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use edtech_api::audit::AuditLog;
use edtech_api::inference::{HeuristicBackend, InferenceBackend, OllamaBackend};
use edtech_api::ledger::init_tables;
use edtech_api::services::{GroupingEngine, Sanitizer};
use edtech_api::{build_router, AppState, HealthFlags};
use edtech_common::config::{
    BackendKind, InferenceConfig, PollerConfig, ServiceConfig, VlanConfigEntry,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const TEST_KEY: &str = "classroom-secret";

struct TestApp {
    app: Router,
    _audit_dir: TempDir,
}

/// Build a router over an in-memory ledger with the heuristic backend
async fn test_app(api_key: &str, rate_limit: &str) -> TestApp {
    test_app_with_backend(api_key, rate_limit, Arc::new(HeuristicBackend)).await
}

/// Same as [`test_app`] but with a caller-chosen inference backend
async fn test_app_with_backend(
    api_key: &str,
    rate_limit: &str,
    backend: Arc<dyn InferenceBackend>,
) -> TestApp {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    init_tables(&pool).await.unwrap();

    let audit_dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig {
        api_key: api_key.to_string(),
        inference: InferenceConfig {
            backend: BackendKind::Heuristic,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            timeout_secs: 5,
        },
        review_threshold: 0.7,
        rate_limit: rate_limit.parse().unwrap(),
        hash_key: Some("test-hash-key".to_string()),
        poller: PollerConfig {
            enabled: false,
            interval_secs: 30,
            unifi_url: None,
            unifi_username: None,
            unifi_password: None,
            unifi_site: "default".to_string(),
        },
        retention_days: 90,
        audit_log_path: audit_dir.path().join("audit.log"),
        hostname_denylist: Vec::new(),
        vlans: vec![
            VlanConfigEntry {
                id: 101,
                label: "Classroom-A".to_string(),
                capacity: Some(30),
            },
            VlanConfigEntry {
                id: 102,
                label: "Classroom-B".to_string(),
                capacity: Some(30),
            },
            VlanConfigEntry {
                id: 900,
                label: "Guest-WiFi".to_string(),
                capacity: None,
            },
        ],
    };

    let sanitizer = Arc::new(Sanitizer::new("test-hash-key"));
    let engine = Arc::new(GroupingEngine::new(backend, config.review_threshold));
    let audit = Arc::new(AuditLog::new(config.audit_log_path.clone()));
    let health = Arc::new(HealthFlags::new(false));

    let state = AppState::new(pool, Arc::new(config), sanitizer, engine, audit, health);
    TestApp {
        app: build_router(state),
        _audit_dir: audit_dir,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("X-API-Key", key);
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn classroom_devices() -> Value {
    json!([
        {"mac": "AA:BB:CC:00:00:01", "ssid": "Classroom-A", "signal": -60, "hostname": "Jakes-iPad"},
        {"mac": "AA:BB:CC:00:00:02", "ssid": "Classroom-A", "signal": -75},
        {"mac": "AA:BB:CC:00:00:03", "ssid": "Guest-WiFi", "signal": -50, "hostname": "guest-laptop"},
    ])
}

// ============================================================================
// Open routes
// ============================================================================

#[tokio::test]
async fn test_health_is_open_and_healthy() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(&app.app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "edtech-api");
    assert_eq!(body["inference"]["backend"], "heuristic");
    assert_eq!(body["inference"]["reachable"], true);
    // Poller disabled, so no device-source section at all
    assert!(body.get("device_source").is_none());
}

#[tokio::test]
async fn test_version_reports_backend() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(&app.app, "GET", "/api/version", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "edtech-api");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["backend"]["name"], "heuristic");
}

#[tokio::test]
async fn test_health_reports_unreachable_backend() {
    // Nothing listens on the discard port, so the probe fails fast
    let backend =
        OllamaBackend::new("http://127.0.0.1:9", "llama3.2", Duration::from_secs(1)).unwrap();
    let app = test_app_with_backend(TEST_KEY, "100/minute", Arc::new(backend)).await;

    let (status, body) = send(&app.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["inference"]["backend"], "ollama");
    assert_eq!(body["inference"]["reachable"], false);
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_api_key_is_401() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(&app.app, "GET", "/suggestions", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "AUTH");
    assert_eq!(body["error"]["message"], "Invalid or missing API key");
}

#[tokio::test]
async fn test_wrong_api_key_is_401_with_same_message() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(&app.app, "GET", "/suggestions", Some("nope"), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid or missing API key");
}

#[tokio::test]
async fn test_correct_api_key_is_accepted() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, _) = send(&app.app, "GET", "/suggestions", Some(TEST_KEY), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_empty_configured_key_disables_auth() {
    let app = test_app("", "100/minute").await;
    let (status, _) = send(&app.app, "GET", "/suggestions", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// POST /vlan-group
// ============================================================================

#[tokio::test]
async fn test_vlan_group_matches_ssid_labels() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": classroom_devices()})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend"], "heuristic");
    assert_eq!(body["origin"], "api");
    assert_eq!(body["confidence"], 0.6);
    assert_eq!(body["human_review_required"], true);
    assert_eq!(body["degraded"], false);

    // Every device appears exactly once, mapped by SSID/label match
    let devices = body["devices"].as_array().unwrap();
    assert_eq!(devices.len(), 3);
    let assignments = body["assignments"].as_object().unwrap();
    assert_eq!(assignments.len(), 3);
    assert_eq!(assignments[devices[0]["device_id"].as_str().unwrap()], 101);
    assert_eq!(assignments[devices[1]["device_id"].as_str().unwrap()], 101);
    assert_eq!(assignments[devices[2]["device_id"].as_str().unwrap()], 900);

    // Personal names are gone, purpose words survive
    assert_eq!(devices[0]["hostname"], "[redacted]-iPad");
    assert_eq!(devices[2]["hostname"], "guest-laptop");

    // Raw MACs never appear anywhere in the response
    let rendered = body.to_string().to_lowercase();
    assert!(!rendered.contains("aa:bb:cc"));
}

#[tokio::test]
async fn test_vlan_group_rejects_bad_input() {
    let app = test_app(TEST_KEY, "100/minute").await;

    // Empty device list
    let (status, body) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");

    // Malformed MAC
    let (status, body) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": [
            {"mac": "not-a-mac", "ssid": "Classroom-A", "signal": -60}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // The error names the device by position, never by content
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("Device 1"));
    assert!(!message.to_lowercase().contains("not-a-mac"));

    // Blank SSID
    let (status, _) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": [
            {"mac": "AA:BB:CC:00:00:01", "ssid": "  ", "signal": -60}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Catalogue override present but empty
    let (status, _) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": classroom_devices(), "vlans": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Body that is not JSON at all
    let request = Request::builder()
        .method("POST")
        .uri("/vlan-group")
        .header("X-API-Key", TEST_KEY)
        .header("content-type", "application/json")
        .body(Body::from("not json"))
        .unwrap();
    let response = app.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_vlan_group_catalogue_override() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({
            "devices": [{"mac": "AA:BB:CC:00:00:09", "ssid": "Lab", "signal": -55}],
            "vlans": [{"id": 7, "label": "Lab"}]
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let devices = body["devices"].as_array().unwrap();
    let assignments = body["assignments"].as_object().unwrap();
    assert_eq!(assignments[devices[0]["device_id"].as_str().unwrap()], 7);
}

#[tokio::test]
async fn test_vlan_group_idempotent_replay() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let payload = json!({
        "devices": classroom_devices(),
        "idempotency_key": "req-42"
    });

    let (status, first) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = send(
        &app.app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["suggestion_id"], second["suggestion_id"]);

    // Only one ledger row exists
    let (_, page) = send(&app.app, "GET", "/suggestions", Some(TEST_KEY), None).await;
    assert_eq!(page["suggestions"].as_array().unwrap().len(), 1);
}

// ============================================================================
// POST /decisions/:id
// ============================================================================

async fn create_suggestion(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/vlan-group",
        Some(TEST_KEY),
        Some(json!({"devices": classroom_devices()})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["suggestion_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_decision_lifecycle() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let id = create_suggestion(&app.app).await;

    // First decision lands
    let (status, body) = send(
        &app.app,
        "POST",
        &format!("/decisions/{}", id),
        Some(TEST_KEY),
        Some(json!({"outcome": "approved", "reviewer": "taylor"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "approved");
    assert_eq!(body["suggestion_id"], id.as_str());

    // Second decision conflicts
    let (status, body) = send(
        &app.app,
        "POST",
        &format!("/decisions/{}", id),
        Some(TEST_KEY),
        Some(json!({"outcome": "ignored", "reviewer": "jo"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_decision_validation_and_lookup_failures() {
    let app = test_app(TEST_KEY, "100/minute").await;

    // Unknown suggestion
    let (status, body) = send(
        &app.app,
        "POST",
        &format!("/decisions/{}", uuid::Uuid::new_v4()),
        Some(TEST_KEY),
        Some(json!({"outcome": "approved", "reviewer": "taylor"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    // Malformed id segment
    let (status, body) = send(
        &app.app,
        "POST",
        "/decisions/not-a-uuid",
        Some(TEST_KEY),
        Some(json!({"outcome": "approved", "reviewer": "taylor"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");

    // Overridden without an override mapping
    let id = create_suggestion(&app.app).await;
    let (status, _) = send(
        &app.app,
        "POST",
        &format!("/decisions/{}", id),
        Some(TEST_KEY),
        Some(json!({"outcome": "overridden", "reviewer": "taylor"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// GET /suggestions
// ============================================================================

#[tokio::test]
async fn test_suggestions_paginate_with_embedded_decisions() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let first = create_suggestion(&app.app).await;
    let _second = create_suggestion(&app.app).await;
    let _third = create_suggestion(&app.app).await;

    send(
        &app.app,
        "POST",
        &format!("/decisions/{}", first),
        Some(TEST_KEY),
        Some(json!({"outcome": "approved", "reviewer": "taylor"})),
    )
    .await;

    let (status, page) = send(
        &app.app,
        "GET",
        "/suggestions?limit=2",
        Some(TEST_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = page["suggestions"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    let next = page["next_cursor"].as_str().expect("more pages remain");

    let (status, rest) = send(
        &app.app,
        "GET",
        &format!("/suggestions?limit=2&cursor={}", next),
        Some(TEST_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tail = rest["suggestions"].as_array().unwrap();
    assert_eq!(tail.len(), 1);
    assert!(rest.get("next_cursor").is_none());

    // The decided suggestion embeds its decision
    assert_eq!(tail[0]["suggestion_id"], first.as_str());
    assert_eq!(tail[0]["decision"]["outcome"], "approved");
    assert_eq!(tail[0]["decision"]["reviewer"], "taylor");
}

#[tokio::test]
async fn test_garbage_cursor_is_400() {
    let app = test_app(TEST_KEY, "100/minute").await;
    let (status, body) = send(
        &app.app,
        "GET",
        "/suggestions?cursor=!!garbage!!",
        Some(TEST_KEY),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION");
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_rate_limit_answers_429_with_retry_after() {
    let app = test_app(TEST_KEY, "2/hour").await;

    for _ in 0..2 {
        let (status, _) = send(&app.app, "GET", "/suggestions", Some(TEST_KEY), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let request = Request::builder()
        .method("GET")
        .uri("/suggestions")
        .header("X-API-Key", TEST_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after = response
        .headers()
        .get("retry-after")
        .expect("Retry-After header present")
        .to_str()
        .unwrap()
        .parse::<u64>()
        .unwrap();
    assert!(retry_after >= 1);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");

    // Health stays reachable even for a throttled caller
    let (status, _) = send(&app.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}
