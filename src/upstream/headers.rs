//! Header utilities for upstream calls
//!
//! Client credentials are never forwarded; the upstream key is injected in the
//! scheme the endpoint's API format expects.

use axum::http::header::HeaderName;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// Client headers that may be forwarded upstream
const FORWARDED_HEADERS: &[&str] = &["anthropic-beta", "anthropic-version", "openai-beta"];

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Pick the client headers allowed through to the upstream
pub fn forwardable_headers(incoming: &HeaderMap) -> Vec<(String, String)> {
    FORWARDED_HEADERS
        .iter()
        .filter_map(|name| {
            incoming
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

/// Build upstream request headers
///
/// Claude-format endpoints take the key in `x-api-key`; everything else gets a
/// bearer token. Invalid secrets or forwarded values are skipped rather than
/// failing the request.
pub fn build_upstream_headers(
    api_format: &str,
    secret: &str,
    forwarded: &[(String, String)],
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if api_format.eq_ignore_ascii_case("claude") {
        if let Ok(value) = HeaderValue::from_str(secret) {
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static(DEFAULT_ANTHROPIC_VERSION),
        );
    } else if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", secret)) {
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in forwarded {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claude_format_uses_api_key_header() {
        let headers = build_upstream_headers("claude", "sk-ant-123", &[]);
        assert_eq!(headers.get("x-api-key").unwrap(), "sk-ant-123");
        assert!(headers.get(AUTHORIZATION).is_none());
        assert_eq!(headers.get("anthropic-version").unwrap(), DEFAULT_ANTHROPIC_VERSION);
    }

    #[test]
    fn test_openai_format_uses_bearer() {
        let headers = build_upstream_headers("openai", "sk-123", &[]);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-123");
        assert!(headers.get("x-api-key").is_none());
    }

    #[test]
    fn test_forwarded_version_overrides_default() {
        let forwarded = vec![("anthropic-version".to_string(), "2024-01-01".to_string())];
        let headers = build_upstream_headers("claude", "k", &forwarded);
        assert_eq!(headers.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[test]
    fn test_client_authorization_not_forwarded() {
        let mut incoming = HeaderMap::new();
        incoming.insert(AUTHORIZATION, HeaderValue::from_static("Bearer client-token"));
        incoming.insert("anthropic-beta", HeaderValue::from_static("context-1m-2025-08-07"));

        let forwarded = forwardable_headers(&incoming);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0, "anthropic-beta");
    }
}
