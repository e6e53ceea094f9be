//! HTTP upstream executor
//!
//! Forwards the normalized request body to the candidate's endpoint, with the
//! `model` field rewritten to the provider-side model name.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use tracing::debug;

use super::{
    headers::build_upstream_headers, UpstreamExecutor, UpstreamFailure, UpstreamRequest,
    UpstreamResponse, UpstreamTarget,
};

/// Longest upstream error body kept in failure messages
const MAX_ERROR_BODY: usize = 512;

/// reqwest-backed executor
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UpstreamExecutor for HttpUpstream {
    async fn execute(
        &self,
        target: &UpstreamTarget,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamFailure> {
        let url = format!(
            "{}{}",
            target.base_url.trim_end_matches('/'),
            request.path
        );

        let mut body = request.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "model".to_string(),
                serde_json::Value::String(target.provider_model_name.clone()),
            );
        }

        debug!(
            key_id = %target.key_id,
            endpoint_id = %target.endpoint_id,
            url = %url,
            model = %target.provider_model_name,
            "Sending upstream request"
        );

        let response = self
            .client
            .post(&url)
            .headers(build_upstream_headers(
                &target.api_format,
                &target.secret,
                &request.forwarded_headers,
            ))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let mut text = response.text().await.unwrap_or_default();
            truncate_utf8(&mut text, MAX_ERROR_BODY);
            return Err(UpstreamFailure::from_status(
                status.as_u16(),
                text,
                retry_after,
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(classify_transport_error)?;

        Ok(UpstreamResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}

fn classify_transport_error(err: reqwest::Error) -> UpstreamFailure {
    if err.is_timeout() {
        UpstreamFailure::Timeout { after_ms: 0 }
    } else {
        UpstreamFailure::Transport {
            message: err.to_string(),
        }
    }
}

fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}
