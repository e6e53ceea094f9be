//! Gateway endpoints
//!
//! Client-facing inference routes. The body is forwarded as-is apart from
//! the `model` field, which the upstream executor rewrites to the provider's
//! model name.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    routes::metrics::record_request,
    routing::{CapabilityRequirements, DispatchRequest},
    upstream::{headers::forwardable_headers, UpstreamRequest},
    AppState,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROVIDER_HEADER: &str = "x-fleetgate-provider";
pub const ATTEMPTS_HEADER: &str = "x-fleetgate-attempts";
pub const PRICE_MULTIPLIER_HEADER: &str = "x-fleetgate-price-multiplier";

/// OpenAI-compatible chat completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    forward(&state, "/v1/chat/completions", &headers, &body).await
}

/// Anthropic-compatible messages
pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    forward(&state, "/v1/messages", &headers, &body).await
}

/// OpenAI responses API
pub async fn responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    forward(&state, "/v1/responses", &headers, &body).await
}

/// Caller-supplied request id, or a fresh UUID
fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[instrument(skip_all, fields(path = path))]
async fn forward(
    state: &AppState,
    path: &'static str,
    headers: &HeaderMap,
    body: &[u8],
) -> AppResult<Response> {
    let started = Instant::now();
    let body: Value = serde_json::from_slice(body)?;

    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::BadRequest("Request body must include a model".to_string()))?
        .to_string();

    let request_id = request_id(headers);
    let requirements = CapabilityRequirements::from_request(headers, &body);

    let result = state
        .dispatcher
        .dispatch(DispatchRequest {
            request_id: Some(request_id.clone()),
            model: model.clone(),
            requirements,
            upstream: UpstreamRequest {
                path: path.to_string(),
                body,
                forwarded_headers: forwardable_headers(headers),
            },
        })
        .await;

    let served = match result {
        Ok(served) => served,
        Err(e) => {
            record_request("error", &model, started.elapsed().as_secs_f64());
            return Err(e.into());
        }
    };
    record_request("success", &model, started.elapsed().as_secs_f64());

    info!(
        request_id = %request_id,
        model = %model,
        provider_id = %served.provider_id,
        attempts = served.attempts,
        "Gateway request completed"
    );

    let status = StatusCode::from_u16(served.response.status).unwrap_or(StatusCode::OK);
    let content_type = served
        .response
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    let mut response = Response::new(Body::from(served.response.body));
    *response.status_mut() = status;
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, content_type);
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        out.insert(REQUEST_ID_HEADER, v);
    }
    if let Ok(v) = HeaderValue::from_str(&served.provider_id) {
        out.insert(PROVIDER_HEADER, v);
    }
    out.insert(ATTEMPTS_HEADER, HeaderValue::from(served.attempts));
    if let Ok(v) = HeaderValue::from_str(&served.price_multiplier.to_string()) {
        out.insert(PRICE_MULTIPLIER_HEADER, v);
    }

    Ok(response)
}
