//! Upstream call abstraction
//!
//! The dispatcher hands a fully-resolved target to an [`UpstreamExecutor`]
//! and gets back either a response or a classified [`UpstreamFailure`].
//! Classification drives health and adaptive-concurrency learning.

pub mod headers;
pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub use http::HttpUpstream;

/// Everything needed to call one upstream credential
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    pub key_id: String,
    pub endpoint_id: String,
    pub provider_id: String,
    pub api_format: String,
    pub base_url: String,
    /// Provider-side model name substituted into the request body
    pub provider_model_name: String,
    pub secret: String,
}

/// Normalized request forwarded to the upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    /// Path appended to the endpoint base URL (e.g. "/v1/messages")
    pub path: String,
    pub body: serde_json::Value,
    /// Client headers that passed the forwarding allowlist
    pub forwarded_headers: Vec<(String, String)>,
}

/// Successful upstream response
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Why an upstream attempt failed
#[derive(Debug, Clone, Error, Serialize, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamFailure {
    #[error("upstream timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("rate limited by provider (status {status})")]
    RateLimited {
        status: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    #[error("provider overloaded (status {status})")]
    Overloaded { status: u16 },

    #[error("credential rejected (status {status})")]
    Unauthorized { status: u16 },

    #[error("request rejected by provider (status {status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("provider returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl UpstreamFailure {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16, message: String, retry_after_secs: Option<u64>) -> Self {
        match status {
            429 => UpstreamFailure::RateLimited {
                status,
                retry_after_secs,
            },
            503 | 529 => UpstreamFailure::Overloaded { status },
            408 | 504 => UpstreamFailure::Timeout { after_ms: 0 },
            401 | 403 => UpstreamFailure::Unauthorized { status },
            400 | 404 | 413 | 422 => UpstreamFailure::InvalidRequest { status, message },
            _ => UpstreamFailure::Http { status, message },
        }
    }

    pub fn timeout(after: Duration) -> Self {
        UpstreamFailure::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    /// Signals that the credential is being pushed past its sustainable load
    pub fn is_overload(&self) -> bool {
        matches!(
            self,
            UpstreamFailure::Timeout { .. }
                | UpstreamFailure::RateLimited { .. }
                | UpstreamFailure::Overloaded { .. }
        )
    }

    /// Failures that say something about the endpoint, not just the key
    pub fn affects_endpoint(&self) -> bool {
        match self {
            UpstreamFailure::Timeout { .. }
            | UpstreamFailure::Overloaded { .. }
            | UpstreamFailure::Transport { .. } => true,
            UpstreamFailure::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The request itself is bad; trying another key will not help
    pub fn is_request_fault(&self) -> bool {
        matches!(self, UpstreamFailure::InvalidRequest { .. })
    }

    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamFailure::Timeout { .. } => "timeout",
            UpstreamFailure::RateLimited { .. } => "rate_limited",
            UpstreamFailure::Overloaded { .. } => "overloaded",
            UpstreamFailure::Unauthorized { .. } => "unauthorized",
            UpstreamFailure::InvalidRequest { .. } => "invalid_request",
            UpstreamFailure::Http { .. } => "http_error",
            UpstreamFailure::Transport { .. } => "transport",
        }
    }
}

/// Issues the actual upstream call for one attempt
///
/// The dispatcher bounds each call with its own timeout, so implementations
/// need not enforce one (but may).
#[async_trait]
pub trait UpstreamExecutor: Send + Sync {
    async fn execute(
        &self,
        target: &UpstreamTarget,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamFailure>;
}
