//! Error types for Fleetgate
//!
//! [`RoutingError`] is what the engine reports; [`AppError`] is what the HTTP
//! layer turns into a JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    catalog::{Capability, CatalogError},
    routing::ConcurrencyError,
    upstream::UpstreamFailure,
};

/// Why a single candidate was skipped or failed
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// Key or endpoint breaker is open
    CircuitOpen { subject: String },
    /// Half-open and another request already owns the trial
    TrialInProgress { subject: String },
    ConcurrencyExceeded { in_flight: u32, limit: u32 },
    RateCapped { per_minute: u32 },
    Upstream { failure: UpstreamFailure },
}

impl FailureReason {
    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::CircuitOpen { .. } => "circuit_open",
            FailureReason::TrialInProgress { .. } => "trial_in_progress",
            FailureReason::ConcurrencyExceeded { .. } => "concurrency_exceeded",
            FailureReason::RateCapped { .. } => "rate_capped",
            FailureReason::Upstream { failure } => failure.label(),
        }
    }
}

/// One entry in an aggregated dispatch failure
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct CandidateFailure {
    pub key_id: String,
    pub endpoint_id: String,
    pub provider_id: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

/// Routing engine errors
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no active key can serve model {model} with required capabilities {required:?}")]
    NoCapableCandidate {
        model: String,
        required: Vec<Capability>,
    },

    #[error("all candidates for model {model} failed ({} tried or filtered)", .failures.len())]
    AllCandidatesExhausted {
        model: String,
        failures: Vec<CandidateFailure>,
    },

    #[error("upstream rejected the request via key {key_id}: {failure}")]
    UpstreamRejected {
        key_id: String,
        failure: UpstreamFailure,
    },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<ConcurrencyError> for RoutingError {
    fn from(err: ConcurrencyError) -> Self {
        match err {
            ConcurrencyError::UnknownKey(id) => RoutingError::NotFound { kind: "key", id },
            ConcurrencyError::InvalidLimit => RoutingError::InvalidArgument(err.to_string()),
        }
    }
}

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Extra context for routing failures
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct ErrorDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_capabilities: Option<Vec<Capability>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<CandidateFailure>>,
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String, Option<ErrorDetails>) {
        match self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
                None,
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None),
            AppError::Routing(err) => routing_parts(err),
            AppError::Catalog(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CATALOG_ERROR",
                e.to_string(),
                None,
            ),
            AppError::JsonError(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_JSON",
                "Invalid JSON in request".to_string(),
                None,
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error".to_string(),
                None,
            ),
        }
    }
}

fn routing_parts(err: &RoutingError) -> (StatusCode, &'static str, String, Option<ErrorDetails>) {
    match err {
        RoutingError::NoCapableCandidate { required, .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "NO_CAPABLE_CANDIDATE",
            err.to_string(),
            Some(ErrorDetails {
                required_capabilities: Some(required.clone()),
                ..ErrorDetails::default()
            }),
        ),
        RoutingError::AllCandidatesExhausted { failures, .. } => {
            // 502 when an upstream actually answered badly, 503 when nothing
            // could even be attempted
            let attempted = failures
                .iter()
                .any(|f| matches!(f.reason, FailureReason::Upstream { .. }));
            let status = if attempted {
                StatusCode::BAD_GATEWAY
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                "ALL_CANDIDATES_EXHAUSTED",
                err.to_string(),
                Some(ErrorDetails {
                    failures: Some(failures.clone()),
                    ..ErrorDetails::default()
                }),
            )
        }
        RoutingError::UpstreamRejected { failure, .. } => {
            let status = match failure {
                UpstreamFailure::InvalidRequest { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
                }
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, "UPSTREAM_REJECTED", failure.to_string(), None)
        }
        RoutingError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string(), None),
        RoutingError::InvalidArgument(msg) => {
            (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone(), None)
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = self.parts();

        if status.is_server_error() {
            tracing::warn!(code, error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
