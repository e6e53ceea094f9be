//! Status timeline endpoints

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, Json};
use chrono::Utc;

use crate::{
    status::{PublicStatusTimeline, StatusTimeline},
    AppState,
};

#[utoipa::path(
    get,
    path = "/admin/status/timeline",
    tag = "Status",
    responses((status = 200, description = "Per-format outcome buckets with key counts", body = StatusTimeline)),
    security(("bearer_auth" = []))
)]
pub async fn admin_timeline(State(state): State<Arc<AppState>>) -> Json<StatusTimeline> {
    let catalog = state.catalog.snapshot();
    Json(
        state
            .status
            .admin_timeline(&catalog, &state.health, Utc::now(), Instant::now()),
    )
}

/// Public status page data; no counts or key details
pub async fn public_timeline(State(state): State<Arc<AppState>>) -> Json<PublicStatusTimeline> {
    let catalog = state.catalog.snapshot();
    Json(state.status.public_timeline(&catalog, Utc::now()))
}
