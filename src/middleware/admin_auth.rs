//! Admin authentication middleware
//!
//! Guards `/admin` routes with a static bearer token from configuration.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{error::AppError, AppState};

/// Extract the bearer token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Hex SHA-256 of a token, for comparisons and log fingerprints
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Admin authentication middleware
///
/// With no token configured every request passes.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(AppError::Unauthorized)?;

    let presented = hash_token(token);
    if presented != hash_token(expected) {
        warn!(fingerprint = &presented[..8], "Rejected admin token");
        return Err(AppError::Unauthorized);
    }

    debug!("Admin request authenticated");
    Ok(next.run(request).await)
}
