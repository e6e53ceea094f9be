//! Admin endpoint integration tests

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use fleetgate::routing::Subject;

use crate::common::{
    admin, build_catalog, constants, gateway_fixture, messages_body, test_config, test_server,
    test_state, test_state_from_file, two_provider_catalog, upstream_mocks, write_catalog_file,
};

#[tokio::test]
async fn test_admin_routes_require_token() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server.get("/admin/health/summary").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "UNAUTHORIZED");

    let response = server
        .get("/admin/health/summary")
        .add_header(
            axum::http::header::AUTHORIZATION,
            axum::http::HeaderValue::from_static("Bearer wrong"),
        )
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    admin(server.get("/admin/health/summary")).await.assert_status_ok();
}

#[tokio::test]
async fn test_admin_routes_open_without_configured_token() {
    let mut config = test_config();
    config.admin_token = None;
    let state = test_state(config, build_catalog(two_provider_catalog("http://127.0.0.1:9")));
    let server = test_server(state);

    server.get("/admin/health/summary").await.assert_status_ok();
}

#[tokio::test]
async fn test_toggle_adaptive_mode() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = admin(server.patch("/admin/keys/A1/concurrency/mode"))
        .json(&json!({ "enabled": true }))
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["previous_mode"], "fixed");
    assert_eq!(json["mode"], "adaptive");
    assert_eq!(json["effective_limit"], 4);

    let response = admin(server.patch("/admin/keys/A1/concurrency/mode"))
        .json(&json!({ "enabled": false, "fixed_limit": 7 }))
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["previous_mode"], "adaptive");
    assert_eq!(json["effective_limit"], 7);

    let stats: Value = admin(server.get("/admin/keys/A1/concurrency")).await.json();
    assert_eq!(stats["mode"], "fixed");
    assert_eq!(stats["limit"], 7);
    assert_eq!(stats["previous_mode"], "adaptive");
}

#[tokio::test]
async fn test_set_fixed_limit() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = admin(server.put("/admin/keys/B1/concurrency/limit"))
        .json(&json!({ "limit": 12 }))
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["limit"], 12);
    assert_eq!(json["previous_mode"], "fixed");

    let response = admin(server.put("/admin/keys/B1/concurrency/limit"))
        .json(&json!({ "limit": 0 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_key_is_404() {
    let (_upstream, _state, server) = gateway_fixture().await;

    admin(server.get("/admin/keys/nope/concurrency"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    admin(server.post("/admin/keys/nope/recover"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    admin(server.get("/admin/health/keys/nope"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    admin(server.get("/admin/health/endpoints/nope"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reset_learning_returns_default_ceiling() {
    let (_upstream, _state, server) = gateway_fixture().await;

    admin(server.put("/admin/keys/A1/concurrency/limit"))
        .json(&json!({ "limit": 9 }))
        .await
        .assert_status_ok();

    let response = admin(server.delete("/admin/keys/A1/concurrency/learning")).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["limit"], 4);
    assert_eq!(json["mode"], "fixed");
    assert_eq!(json["successes"], 0);
}

#[tokio::test]
async fn test_recover_open_key() {
    let (upstream, state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 503).await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    for _ in 0..2 {
        server.post("/v1/messages").json(&messages_body()).await;
    }
    let health: Value = admin(server.get("/admin/health/keys/A1")).await.json();
    assert_eq!(health["circuit_state"], "open");
    assert_eq!(health["last_failure_reason"], "overloaded");

    let response = admin(server.post("/admin/keys/A1/recover")).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["key_id"], "A1");
    assert_eq!(json["health_score"], 1.0);
    assert_eq!(json["circuit_breaker_open"], false);
    assert_eq!(json["is_active"], true);
    assert_eq!(json["reactivated"], false);
    assert_eq!(json["health"]["circuit_state"], "closed");

    assert_eq!(
        state
            .health
            .state(Subject::Key("A1"), Instant::now()),
        fleetgate::routing::CircuitState::Closed
    );
}

#[tokio::test]
async fn test_recover_reactivates_inactive_key() {
    let upstream_url = "http://127.0.0.1:9";
    let mut catalog = two_provider_catalog(upstream_url);
    catalog["keys"][1]["is_active"] = json!(false);
    let state = test_state(test_config(), build_catalog(catalog));
    let server = test_server(state.clone());

    let json: Value = admin(server.post("/admin/keys/B1/recover")).await.json();
    assert_eq!(json["is_active"], true);
    assert_eq!(json["reactivated"], true);
    assert_eq!(json["circuit_breaker_open"], false);
    assert!(state.catalog.snapshot().key("B1").unwrap().is_active);
}

#[tokio::test]
async fn test_recover_all_open_keys() {
    let (_upstream, state, server) = gateway_fixture().await;
    let now = Instant::now();
    for key in ["A1", "B1"] {
        for _ in 0..2 {
            state.health.record_failure(
                Subject::Key(key),
                "transport",
                Some(Duration::from_secs(60)),
                now,
            );
        }
    }

    let response = admin(server.post("/admin/keys/recover-all")).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["count"], 2);
    assert_eq!(json["recovered"], json!(["A1", "B1"]));

    let summary: Value = admin(server.get("/admin/health/summary")).await.json();
    assert_eq!(summary["keys"]["open"], 0);
    assert_eq!(summary["keys"]["closed"], 2);
}

#[tokio::test]
async fn test_endpoint_health_defaults_to_healthy() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let json: Value = admin(server.get("/admin/health/endpoints/ea")).await.json();
    assert_eq!(json["id"], "ea");
    assert_eq!(json["kind"], "endpoint");
    assert_eq!(json["circuit_state"], "closed");
    assert_eq!(json["health_score"], 1.0);
}

#[tokio::test]
async fn test_scheduling_mode_roundtrip() {
    let (_upstream, state, server) = gateway_fixture().await;

    let json: Value = admin(server.get("/admin/routing/scheduling-mode")).await.json();
    assert_eq!(json["mode"], "provider_priority");

    let response = admin(server.put("/admin/routing/scheduling-mode"))
        .json(&json!({ "mode": "global_key_priority" }))
        .await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["previous"], "provider_priority");
    assert_eq!(json["mode"], "global_key_priority");

    use fleetgate::routing::SchedulingModeSource;
    assert_eq!(
        state.settings.scheduling_mode(),
        fleetgate::routing::SchedulingMode::GlobalKeyPriority
    );
}

#[tokio::test]
async fn test_catalog_reload_without_source_is_rejected() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = admin(server.post("/admin/catalog/reload")).await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "CATALOG_ERROR");
}

#[tokio::test]
async fn test_catalog_reload_picks_up_new_keys() {
    let mut catalog = two_provider_catalog("http://127.0.0.1:9");
    let path = write_catalog_file(&catalog);
    let state = test_state_from_file(test_config(), &path);
    let server = test_server(state.clone());

    catalog["keys"]
        .as_array_mut()
        .unwrap()
        .push(json!({ "id": "B2", "endpoint_id": "eb", "secret": "sk-b2", "adaptive_mode": true }));
    std::fs::write(&path, serde_json::to_vec(&catalog).unwrap()).unwrap();

    let response = admin(server.post("/admin/catalog/reload")).await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["keys"], 3);

    let stats: Value = admin(server.get("/admin/keys/B2/concurrency")).await.json();
    assert_eq!(stats["mode"], "adaptive");

    // A broken file keeps the previous catalog
    std::fs::write(&path, b"{ broken").unwrap();
    admin(server.post("/admin/catalog/reload"))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert!(state.catalog.snapshot().key("B2").is_some());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let json: Value = admin(server.get("/admin/docs/openapi.json")).await.json();
    assert!(json["paths"]["/admin/keys/recover-all"]["post"].is_object());
}
