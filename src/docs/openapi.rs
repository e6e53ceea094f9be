//! OpenAPI specification for the admin API
//!
//! Aggregates all admin endpoints and schemas into a single OpenAPI document.

use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};

use crate::{
    error::{CandidateFailure, ErrorBody, ErrorDetails, ErrorResponse, FailureReason},
    routes::admin::{
        CatalogReloadResponse, RecoverAllResponse, RecoverResponse, SchedulingModeBody,
        SchedulingModeChange, SetLimitRequest, SetLimitResponse, SetModeRequest,
    },
    routing::{
        CircuitState, ConcurrencyMode, ConcurrencyStats, HealthSnapshot, HealthSummary,
        ModeChange, SchedulingMode, StateCounts,
    },
    status::{BucketStatus, BucketView, FormatTimeline, StatusTimeline},
    upstream::UpstreamFailure,
};

/// OpenAPI specification for the Fleetgate admin API
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fleetgate Admin API",
        version = "1.0.0",
        description = "Key concurrency, health recovery, scheduling and status endpoints for Fleetgate"
    ),
    paths(
        crate::routes::admin::set_concurrency_mode,
        crate::routes::admin::set_concurrency_limit,
        crate::routes::admin::get_concurrency_stats,
        crate::routes::admin::reset_learning,
        crate::routes::admin::recover_key,
        crate::routes::admin::recover_all_keys,
        crate::routes::admin::health_summary,
        crate::routes::admin::endpoint_health,
        crate::routes::admin::key_health,
        crate::routes::admin::get_scheduling_mode,
        crate::routes::admin::set_scheduling_mode,
        crate::routes::admin::reload_catalog,
        crate::routes::status::admin_timeline,
    ),
    components(
        schemas(
            // Concurrency
            ConcurrencyMode,
            ConcurrencyStats,
            ModeChange,
            SetModeRequest,
            SetLimitRequest,
            SetLimitResponse,
            // Health
            CircuitState,
            HealthSnapshot,
            HealthSummary,
            StateCounts,
            RecoverResponse,
            RecoverAllResponse,
            // Routing
            SchedulingMode,
            SchedulingModeBody,
            SchedulingModeChange,
            CatalogReloadResponse,
            // Status
            BucketStatus,
            BucketView,
            FormatTimeline,
            StatusTimeline,
            // Errors
            ErrorResponse,
            ErrorBody,
            ErrorDetails,
            CandidateFailure,
            FailureReason,
            UpstreamFailure,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Concurrency", description = "Per-key concurrency ceilings"),
        (name = "Health", description = "Circuit breakers and recovery"),
        (name = "Routing", description = "Scheduling mode"),
        (name = "Catalog", description = "Catalog reload"),
        (name = "Status", description = "Status timeline")
    )
)]
pub struct AdminApiDoc;

/// Security scheme addon for the admin bearer token
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}
