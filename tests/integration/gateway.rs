//! Gateway endpoint integration tests
//!
//! Drive `/v1/messages` through the real router and reqwest executor against
//! a wiremock upstream.

use axum::http::{HeaderName, HeaderValue, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{constants, gateway_fixture, messages_body, upstream_mocks};

#[tokio::test]
async fn test_routes_to_preferred_provider_with_mapped_model() {
    let (upstream, _state, server) = gateway_fixture().await;

    Mock::given(method("POST"))
        .and(path("/a/v1/messages"))
        .and(body_partial_json(json!({ "model": "claude-sonnet-a" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "served_by": "A1" })))
        .expect(1)
        .mount(&upstream)
        .await;

    let response = server.post("/v1/messages").json(&messages_body()).await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["served_by"], "A1");
    assert_eq!(response.header("x-fleetgate-provider"), "A");
    assert_eq!(response.header("x-fleetgate-attempts"), "1");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let (upstream, _state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_ok(&upstream, "a", constants::KEY_A1_SECRET, "A1").await;

    let response = server
        .post("/v1/messages")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("req-fixed-1"),
        )
        .json(&messages_body())
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("x-request-id"), "req-fixed-1");
}

#[tokio::test]
async fn test_fails_over_when_preferred_provider_is_overloaded() {
    let (upstream, state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 529).await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    let response = server.post("/v1/messages").json(&messages_body()).await;

    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["served_by"], "B1");
    assert_eq!(response.header("x-fleetgate-provider"), "B");
    assert_eq!(response.header("x-fleetgate-attempts"), "2");
    assert_eq!(response.header("x-fleetgate-price-multiplier"), "1.5");

    let stats = state.concurrency.stats("A1").unwrap();
    assert_eq!(stats.overloads, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_all_candidates_failing_returns_aggregated_error() {
    let (upstream, _state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 500).await;
    upstream_mocks::mock_messages_status(&upstream, "b", 429).await;

    let response = server.post("/v1/messages").json(&messages_body()).await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "ALL_CANDIDATES_EXHAUSTED");

    let failures = json["error"]["details"]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0]["key_id"], "A1");
    assert_eq!(failures[0]["reason"], "upstream");
    assert_eq!(failures[0]["failure"]["kind"], "http");
    assert_eq!(failures[1]["key_id"], "B1");
    assert_eq!(failures[1]["failure"]["kind"], "rate_limited");
}

#[tokio::test]
async fn test_open_breaker_is_skipped_on_next_request() {
    let (upstream, state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 503).await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    // failure_threshold is 2 in the test config
    for _ in 0..2 {
        server
            .post("/v1/messages")
            .json(&messages_body())
            .await
            .assert_status_ok();
    }

    let response = server.post("/v1/messages").json(&messages_body()).await;
    response.assert_status_ok();
    assert_eq!(response.header("x-fleetgate-attempts"), "1");

    let received = upstream.received_requests().await.unwrap();
    let to_a = received.iter().filter(|r| r.url.path().starts_with("/a/")).count();
    assert_eq!(to_a, 2);

    let snapshot = state
        .health
        .snapshot(
            fleetgate::routing::Subject::Key("A1"),
            std::time::Instant::now(),
        )
        .unwrap();
    assert!(snapshot.circuit_breaker_open);
}

#[tokio::test]
async fn test_invalid_request_is_returned_without_failover() {
    let (upstream, _state, server) = gateway_fixture().await;
    Mock::given(method("POST"))
        .and(path("/a/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("max_tokens required"))
        .mount(&upstream)
        .await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    let response = server.post("/v1/messages").json(&messages_body()).await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "UPSTREAM_REJECTED");

    let received = upstream.received_requests().await.unwrap();
    assert!(received.iter().all(|r| r.url.path().starts_with("/a/")));
}

#[tokio::test]
async fn test_one_hour_cache_requirement_limits_candidates() {
    let (upstream, _state, server) = gateway_fixture().await;
    upstream_mocks::mock_messages_status(&upstream, "a", 503).await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    let body = json!({
        "model": constants::MODEL,
        "system": [{ "type": "text", "text": "long prompt", "cache_control": { "type": "ephemeral", "ttl": "1h" } }],
        "messages": [{ "role": "user", "content": "ping" }]
    });
    let response = server.post("/v1/messages").json(&body).await;

    // Only A1 supports 1h caching, so B1 is never a candidate
    response.assert_status(StatusCode::BAD_GATEWAY);
    let json: Value = response.json();
    let failures = json["error"]["details"]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["key_id"], "A1");
}

#[tokio::test]
async fn test_context_1m_without_capable_key_is_503() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server
        .post("/v1/messages")
        .add_header(
            HeaderName::from_static("anthropic-beta"),
            HeaderValue::from_static("context-1m-2025-08-07"),
        )
        .json(&messages_body())
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "NO_CAPABLE_CANDIDATE");
    assert_eq!(
        json["error"]["details"]["required_capabilities"],
        json!(["context_1m"])
    );
}

#[tokio::test]
async fn test_unknown_model_is_503() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server
        .post("/v1/chat/completions")
        .json(&json!({ "model": "does-not-exist", "messages": [] }))
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_missing_model_is_bad_request() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server
        .post("/v1/messages")
        .json(&json!({ "messages": [] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let (_upstream, _state, server) = gateway_fixture().await;

    let response = server.post("/v1/messages").text("{not json").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "INVALID_JSON");
}

#[tokio::test]
async fn test_saturated_key_spills_to_next_provider() {
    let (upstream, _state, server) = gateway_fixture().await;
    Mock::given(method("POST"))
        .and(path("/a/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "served_by": "A1" }))
                .set_delay(std::time::Duration::from_millis(300)),
        )
        .mount(&upstream)
        .await;
    upstream_mocks::mock_messages_ok(&upstream, "b", constants::KEY_B1_SECRET, "B1").await;

    // A1 has a fixed limit of 2
    let requests = (0..3).map(|_| {
        std::future::IntoFuture::into_future(server.post("/v1/messages").json(&messages_body()))
    });
    let responses = futures::future::join_all(requests).await;

    let mut served: Vec<String> = responses
        .iter()
        .map(|r| {
            r.assert_status_ok();
            r.json::<Value>()["served_by"].as_str().unwrap().to_string()
        })
        .collect();
    served.sort();
    assert_eq!(served, vec!["A1", "A1", "B1"]);
}
