//! Administrative endpoints
//!
//! Per-key concurrency control, health recovery and inspection, scheduling
//! mode, and catalog reload. Mounted under `/admin` behind the admin token.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    catalog::Catalog,
    error::{AppError, AppResult, ErrorResponse, RoutingError},
    routing::{
        ConcurrencyMode, ConcurrencyStats, HealthSnapshot, HealthSummary, ModeChange,
        SchedulingMode, SchedulingModeSource, Subject,
    },
    AppState,
};

/// Toggle adaptive concurrency for a key
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetModeRequest {
    /// `true` for adaptive, `false` for fixed
    pub enabled: bool,
    /// Fixed ceiling to apply when disabling; defaults to the current ceiling
    #[serde(default)]
    pub fixed_limit: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetLimitRequest {
    pub limit: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SetLimitResponse {
    pub key_id: String,
    pub limit: u32,
    pub previous_mode: ConcurrencyMode,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecoverResponse {
    pub key_id: String,
    pub health_score: f64,
    pub circuit_breaker_open: bool,
    /// Catalog activity after recovery
    pub is_active: bool,
    /// Whether the key had to be reactivated in the catalog
    pub reactivated: bool,
    pub health: HealthSnapshot,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecoverAllResponse {
    pub recovered: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SchedulingModeBody {
    pub mode: SchedulingMode,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SchedulingModeChange {
    pub previous: SchedulingMode,
    pub mode: SchedulingMode,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CatalogReloadResponse {
    pub providers: usize,
    pub endpoints: usize,
    pub keys: usize,
}

/// Resolve a catalog key and make sure the controller knows it
fn registered_key(state: &AppState, key_id: &str) -> Result<(), RoutingError> {
    let catalog = state.catalog.snapshot();
    let key = catalog.key(key_id).ok_or_else(|| RoutingError::NotFound {
        kind: "key",
        id: key_id.to_string(),
    })?;
    state.concurrency.ensure_registered(key);
    Ok(())
}

fn register_all(state: &AppState, catalog: &Catalog) {
    for key in catalog.keys() {
        state.concurrency.ensure_registered(key);
    }
}

#[utoipa::path(
    patch,
    path = "/admin/keys/{key_id}/concurrency/mode",
    tag = "Concurrency",
    params(("key_id" = String, Path, description = "Key id")),
    request_body = SetModeRequest,
    responses(
        (status = 200, description = "Mode changed", body = ModeChange),
        (status = 400, description = "Invalid fixed limit", body = ErrorResponse),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_concurrency_mode(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
    Json(body): Json<SetModeRequest>,
) -> AppResult<Json<ModeChange>> {
    registered_key(&state, &key_id)?;
    let change = state
        .concurrency
        .set_mode(&key_id, body.enabled, body.fixed_limit)
        .map_err(RoutingError::from)?;
    Ok(Json(change))
}

#[utoipa::path(
    put,
    path = "/admin/keys/{key_id}/concurrency/limit",
    tag = "Concurrency",
    params(("key_id" = String, Path, description = "Key id")),
    request_body = SetLimitRequest,
    responses(
        (status = 200, description = "Fixed limit applied", body = SetLimitResponse),
        (status = 400, description = "Limit below 1", body = ErrorResponse),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn set_concurrency_limit(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
    Json(body): Json<SetLimitRequest>,
) -> AppResult<Json<SetLimitResponse>> {
    registered_key(&state, &key_id)?;
    let previous_mode = state
        .concurrency
        .set_fixed_limit(&key_id, body.limit)
        .map_err(RoutingError::from)?;
    Ok(Json(SetLimitResponse {
        key_id,
        limit: body.limit,
        previous_mode,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/keys/{key_id}/concurrency",
    tag = "Concurrency",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Current concurrency state", body = ConcurrencyStats),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_concurrency_stats(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> AppResult<Json<ConcurrencyStats>> {
    registered_key(&state, &key_id)?;
    let stats = state
        .concurrency
        .stats(&key_id)
        .map_err(RoutingError::from)?;
    Ok(Json(stats))
}

#[utoipa::path(
    delete,
    path = "/admin/keys/{key_id}/concurrency/learning",
    tag = "Concurrency",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Learning reset", body = ConcurrencyStats),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn reset_learning(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> AppResult<Json<ConcurrencyStats>> {
    registered_key(&state, &key_id)?;
    let stats = state
        .concurrency
        .reset_learning(&key_id)
        .map_err(RoutingError::from)?;
    Ok(Json(stats))
}

#[utoipa::path(
    post,
    path = "/admin/keys/{key_id}/recover",
    tag = "Health",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Key recovered", body = RecoverResponse),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn recover_key(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> AppResult<Json<RecoverResponse>> {
    let was_active = state
        .catalog
        .snapshot()
        .key(&key_id)
        .map(|k| k.is_active)
        .ok_or_else(|| RoutingError::NotFound {
            kind: "key",
            id: key_id.clone(),
        })?;

    let health = state.health.recover(Subject::Key(&key_id), Instant::now());
    if !state.catalog.set_key_active(&key_id, true) {
        return Err(AppError::Internal(anyhow::anyhow!(
            "failed to reactivate key {} in the catalog",
            key_id
        )));
    }

    let is_active = state
        .catalog
        .snapshot()
        .key(&key_id)
        .map(|k| k.is_active)
        .ok_or_else(|| RoutingError::NotFound {
            kind: "key",
            id: key_id.clone(),
        })?;

    Ok(Json(RecoverResponse {
        key_id,
        health_score: health.health_score,
        circuit_breaker_open: health.circuit_breaker_open,
        is_active,
        reactivated: is_active && !was_active,
        health,
    }))
}

#[utoipa::path(
    post,
    path = "/admin/keys/recover-all",
    tag = "Health",
    responses(
        (status = 200, description = "Every open key recovered", body = RecoverAllResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn recover_all_keys(State(state): State<Arc<AppState>>) -> Json<RecoverAllResponse> {
    let now = Instant::now();
    let recovered = state.health.open_keys();
    for key_id in &recovered {
        state.health.recover(Subject::Key(key_id), now);
        if !state.catalog.set_key_active(key_id, true) {
            warn!(key_id = %key_id, "Recovered key could not be reactivated in the catalog");
        }
    }
    info!(count = recovered.len(), "Recovered all open keys");

    Json(RecoverAllResponse {
        count: recovered.len(),
        recovered,
    })
}

#[utoipa::path(
    get,
    path = "/admin/health/summary",
    tag = "Health",
    responses((status = 200, description = "Breaker state counts", body = HealthSummary)),
    security(("bearer_auth" = []))
)]
pub async fn health_summary(State(state): State<Arc<AppState>>) -> Json<HealthSummary> {
    Json(state.health.summary(Instant::now()))
}

#[utoipa::path(
    get,
    path = "/admin/health/endpoints/{endpoint_id}",
    tag = "Health",
    params(("endpoint_id" = String, Path, description = "Endpoint id")),
    responses(
        (status = 200, description = "Endpoint health", body = HealthSnapshot),
        (status = 404, description = "Unknown endpoint", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn endpoint_health(
    State(state): State<Arc<AppState>>,
    Path(endpoint_id): Path<String>,
) -> AppResult<Json<HealthSnapshot>> {
    if state.catalog.snapshot().endpoint(&endpoint_id).is_none() {
        return Err(RoutingError::NotFound {
            kind: "endpoint",
            id: endpoint_id,
        }
        .into());
    }
    Ok(Json(state.health.snapshot_or_default(
        Subject::Endpoint(&endpoint_id),
        Instant::now(),
    )))
}

#[utoipa::path(
    get,
    path = "/admin/health/keys/{key_id}",
    tag = "Health",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Key health", body = HealthSnapshot),
        (status = 404, description = "Unknown key", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn key_health(
    State(state): State<Arc<AppState>>,
    Path(key_id): Path<String>,
) -> AppResult<Json<HealthSnapshot>> {
    if state.catalog.snapshot().key(&key_id).is_none() {
        return Err(RoutingError::NotFound {
            kind: "key",
            id: key_id,
        }
        .into());
    }
    Ok(Json(
        state
            .health
            .snapshot_or_default(Subject::Key(&key_id), Instant::now()),
    ))
}

#[utoipa::path(
    get,
    path = "/admin/routing/scheduling-mode",
    tag = "Routing",
    responses((status = 200, description = "Current scheduling mode", body = SchedulingModeBody)),
    security(("bearer_auth" = []))
)]
pub async fn get_scheduling_mode(State(state): State<Arc<AppState>>) -> Json<SchedulingModeBody> {
    Json(SchedulingModeBody {
        mode: state.settings.scheduling_mode(),
    })
}

#[utoipa::path(
    put,
    path = "/admin/routing/scheduling-mode",
    tag = "Routing",
    request_body = SchedulingModeBody,
    responses((status = 200, description = "Scheduling mode changed", body = SchedulingModeChange)),
    security(("bearer_auth" = []))
)]
pub async fn set_scheduling_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SchedulingModeBody>,
) -> Json<SchedulingModeChange> {
    let previous = state.settings.set_scheduling_mode(body.mode);
    Json(SchedulingModeChange {
        previous,
        mode: body.mode,
    })
}

#[utoipa::path(
    post,
    path = "/admin/catalog/reload",
    tag = "Catalog",
    responses(
        (status = 200, description = "Catalog reloaded", body = CatalogReloadResponse),
        (status = 422, description = "Catalog invalid; previous catalog kept", body = ErrorResponse)
    ),
    security(("bearer_auth" = []))
)]
pub async fn reload_catalog(
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<CatalogReloadResponse>> {
    let catalog = state.catalog.reload()?;
    register_all(&state, &catalog);

    Ok(Json(CatalogReloadResponse {
        providers: catalog.providers().count(),
        endpoints: catalog.endpoints().count(),
        keys: catalog.keys().count(),
    }))
}
