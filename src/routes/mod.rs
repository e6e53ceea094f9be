//! HTTP routes for Fleetgate
//!
//! This module defines all HTTP endpoints exposed by the gateway.

pub mod admin;
pub mod docs;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod status;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{middleware::admin_auth::admin_auth_middleware, AppState};

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gateway_routes = Router::new()
        .route("/v1/chat/completions", post(gateway::chat_completions))
        .route("/v1/messages", post(gateway::messages))
        .route("/v1/responses", post(gateway::responses));

    let admin_routes = Router::new()
        .route(
            "/admin/keys/:key_id/concurrency",
            get(admin::get_concurrency_stats),
        )
        .route(
            "/admin/keys/:key_id/concurrency/mode",
            patch(admin::set_concurrency_mode),
        )
        .route(
            "/admin/keys/:key_id/concurrency/limit",
            put(admin::set_concurrency_limit),
        )
        .route(
            "/admin/keys/:key_id/concurrency/learning",
            delete(admin::reset_learning),
        )
        .route("/admin/keys/:key_id/recover", post(admin::recover_key))
        .route("/admin/keys/recover-all", post(admin::recover_all_keys))
        .route("/admin/health/summary", get(admin::health_summary))
        .route(
            "/admin/health/endpoints/:endpoint_id",
            get(admin::endpoint_health),
        )
        .route("/admin/health/keys/:key_id", get(admin::key_health))
        .route(
            "/admin/routing/scheduling-mode",
            get(admin::get_scheduling_mode).put(admin::set_scheduling_mode),
        )
        .route("/admin/catalog/reload", post(admin::reload_catalog))
        .route("/admin/status/timeline", get(status::admin_timeline))
        .merge(docs::create_docs_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    // Public routes (health checks, metrics, status page) - no auth required
    let public_routes = Router::new()
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness_check))
        .route("/health/live", get(health::liveness_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/status/timeline", get(status::public_timeline));

    Router::new()
        .merge(public_routes)
        .merge(gateway_routes)
        .merge(admin_routes)
        // Global middleware (applied to all routes)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
