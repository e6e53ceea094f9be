//! Common test utilities for Fleetgate
//!
//! Catalog fixtures, state construction around a wiremock upstream, and
//! request helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum_test::{TestRequest, TestServer};
use serde_json::{json, Value};
use wiremock::matchers::{header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetgate::{
    catalog::{Catalog, CatalogData, CatalogStore},
    routes::create_router,
    AppState, Config, HttpUpstream,
};

/// Test configuration constants
pub mod constants {
    pub const ADMIN_TOKEN: &str = "test-admin-token";
    pub const MODEL: &str = "sonnet";
    pub const KEY_A1_SECRET: &str = "sk-a1";
    pub const KEY_B1_SECRET: &str = "sk-b1";
}

/// Two providers, one key each; provider A is preferred.
///
/// A's endpoint lives under `/a` on the mock server and B's under `/b`.
pub fn two_provider_catalog(upstream_url: &str) -> Value {
    json!({
        "providers": [
            { "id": "A", "name": "Alpha", "priority": 1 },
            { "id": "B", "name": "Beta", "priority": 2, "billing_type": "monthly_quota", "monthly_quota_usd": 100.0 }
        ],
        "endpoints": [
            {
                "id": "ea",
                "provider_id": "A",
                "api_format": "claude",
                "base_url": format!("{}/a", upstream_url),
                "cache_ttl_minutes": 60
            },
            {
                "id": "eb",
                "provider_id": "B",
                "api_format": "claude",
                "base_url": format!("{}/b", upstream_url)
            }
        ],
        "keys": [
            {
                "id": "A1",
                "endpoint_id": "ea",
                "name": "alpha primary",
                "secret": constants::KEY_A1_SECRET,
                "internal_priority": 1,
                "concurrency_limit": 2,
                "capabilities": ["cache_1h"]
            },
            {
                "id": "B1",
                "endpoint_id": "eb",
                "name": "beta primary",
                "secret": constants::KEY_B1_SECRET,
                "internal_priority": 1
            }
        ],
        "global_models": [
            { "name": constants::MODEL, "supported_capabilities": ["cache_1h", "context_1m"] }
        ],
        "model_mappings": [
            { "global_model": constants::MODEL, "provider_id": "A", "provider_model_name": "claude-sonnet-a" },
            { "global_model": constants::MODEL, "provider_id": "B", "provider_model_name": "claude-sonnet-b", "price_multiplier": 1.5 }
        ]
    })
}

pub fn build_catalog(value: Value) -> Catalog {
    let data: CatalogData = serde_json::from_value(value).expect("catalog fixture must parse");
    Catalog::build(data).expect("catalog fixture must validate")
}

/// Defaults plus short timeouts and the test admin token
pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).expect("default config");
    config.admin_token = Some(constants::ADMIN_TOKEN.to_string());
    config.attempt_timeout = Duration::from_secs(2);
    config.status_bucket = Duration::from_secs(60);
    config.status_buckets = 5;
    config.health.failure_threshold = 2;
    config
}

/// State with an in-memory catalog and the real reqwest executor
pub fn test_state(config: Config, catalog: Catalog) -> Arc<AppState> {
    Arc::new(AppState::with_components(
        config,
        Arc::new(CatalogStore::new(catalog)),
        Arc::new(HttpUpstream::new(reqwest::Client::new())),
    ))
}

/// State whose catalog was loaded from a file, so reload works
pub fn test_state_from_file(config: Config, catalog_path: &PathBuf) -> Arc<AppState> {
    Arc::new(AppState::with_components(
        config,
        Arc::new(CatalogStore::from_file(catalog_path).expect("catalog file must load")),
        Arc::new(HttpUpstream::new(reqwest::Client::new())),
    ))
}

pub fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(create_router(state)).expect("Failed to create test server")
}

/// Gateway fixture: mock upstream, two-provider catalog, test server
pub async fn gateway_fixture() -> (MockServer, Arc<AppState>, TestServer) {
    let upstream = MockServer::start().await;
    let state = test_state(test_config(), build_catalog(two_provider_catalog(&upstream.uri())));
    let server = test_server(state.clone());
    (upstream, state, server)
}

/// Attach the admin bearer token
pub fn admin(request: TestRequest) -> TestRequest {
    request.add_header(
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", constants::ADMIN_TOKEN))
            .expect("valid header"),
    )
}

/// Minimal Anthropic-style request body
pub fn messages_body() -> Value {
    json!({
        "model": constants::MODEL,
        "max_tokens": 16,
        "messages": [{ "role": "user", "content": "ping" }]
    })
}

/// Write a catalog to a unique temp file
pub fn write_catalog_file(value: &Value) -> PathBuf {
    let path = std::env::temp_dir().join(format!("fleetgate-catalog-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, serde_json::to_vec_pretty(value).expect("serialize catalog"))
        .expect("write catalog file");
    path
}

/// Mock upstream responses
pub mod upstream_mocks {
    use super::*;

    /// Successful messages response for one provider prefix
    pub async fn mock_messages_ok(server: &MockServer, prefix: &str, secret: &str, served_by: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/{}/v1/messages", prefix)))
            .and(header_matcher("x-api-key", secret))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_test",
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "text", "text": "pong" }],
                "served_by": served_by
            })))
            .mount(server)
            .await;
    }

    /// Any request under `prefix` fails with `status`
    pub async fn mock_messages_status(server: &MockServer, prefix: &str, status: u16) {
        Mock::given(method("POST"))
            .and(path(format!("/{}/v1/messages", prefix)))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "type": "error",
                "error": { "type": "overloaded_error", "message": "try later" }
            })))
            .mount(server)
            .await;
    }
}
