//! Health and status endpoint integration tests
//!
//! - GET /health, /health/ready, /health/live
//! - GET /status/timeline (public) and /admin/status/timeline

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::Value;

use fleetgate::routing::Subject;

use crate::common::{admin, constants, gateway_fixture, messages_body, upstream_mocks};

#[tokio::test]
async fn test_liveness_always_ok() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server.get("/health/live").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_full_health_reports_routing_capacity() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server.get("/health").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["routing"]["active_keys"], 2);
    assert_eq!(json["routing"]["available_keys"], 2);
    assert!(json.get("version").is_some());
}

#[tokio::test]
async fn test_degraded_then_not_ready_as_breakers_open() {
    let (_upstream, state, server) = gateway_fixture().await;
    let now = Instant::now();
    let open = |key: &str| {
        for _ in 0..2 {
            state.health.record_failure(
                Subject::Key(key),
                "transport",
                Some(Duration::from_secs(60)),
                now,
            );
        }
    };

    open("A1");
    let json: Value = server.get("/health").await.json();
    assert_eq!(json["status"], "degraded");
    server.get("/health/ready").await.assert_status_ok();

    open("B1");
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server
        .get("/health")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_endpoints_reject_post() {
    let (_upstream, _state, server) = gateway_fixture().await;

    server
        .post("/health/live")
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
    server
        .post("/health/ready")
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_status_timelines_reflect_attempts() {
    let (upstream, _state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 529).await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    server
        .post("/v1/messages")
        .json(&messages_body())
        .await
        .assert_status_ok();

    let json: Value = admin(server.get("/admin/status/timeline")).await.json();
    let claude = &json["formats"][0];
    assert_eq!(claude["api_format"], "claude");
    assert_eq!(claude["providers"], 2);
    assert_eq!(claude["active_keys"], 2);

    let buckets = claude["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 5);
    let totals: u64 = buckets.iter().map(|b| b["total"].as_u64().unwrap()).sum();
    let successes: u64 = buckets.iter().map(|b| b["successes"].as_u64().unwrap()).sum();
    assert_eq!(totals, 2);
    assert_eq!(successes, 1);

    let public: Value = server.get("/status/timeline").await.json();
    let claude = &public["formats"][0];
    assert_eq!(claude["api_format"], "claude");
    assert!(claude.get("active_keys").is_none());
    assert_eq!(claude["current"], "degraded");
}

#[tokio::test]
async fn test_admin_timeline_requires_token() {
    let (_upstream, _state, server) = gateway_fixture().await;

    server
        .get("/admin/status/timeline")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server.get("/status/timeline").await.assert_status_ok();
}
