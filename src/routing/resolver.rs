//! Candidate resolution
//!
//! Expands a logical model name into every (provider, endpoint, key) triple
//! that can serve it with the capabilities the request needs.

use std::collections::HashSet;
use std::time::Duration;

use axum::http::HeaderMap;
use serde_json::Value;
use tracing::debug;

use crate::{
    catalog::{Capability, Catalog},
    error::RoutingError,
};

/// Header set by the account layer when the caller must use 1-hour caching
pub const FORCE_CACHE_1H_HEADER: &str = "x-fleetgate-force-cache-1h";

/// Capability flags a request requires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityRequirements {
    pub context_1m: bool,
    pub cache_1h: bool,
}

impl CapabilityRequirements {
    /// Derive requirements from the inbound request
    ///
    /// - `anthropic-beta` listing a `context-1m-*` feature needs 1M context
    /// - a `cache_control` block with `ttl: "1h"` anywhere in the body, or the
    ///   forced-cache header, needs 1-hour caching
    pub fn from_request(headers: &HeaderMap, body: &Value) -> Self {
        let context_1m = headers
            .get_all("anthropic-beta")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|feature| feature.trim().starts_with("context-1m"));

        let forced_cache = headers
            .get(FORCE_CACHE_1H_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            context_1m,
            cache_1h: forced_cache || requests_one_hour_cache(body),
        }
    }

    pub fn required(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.context_1m {
            caps.push(Capability::Context1m);
        }
        if self.cache_1h {
            caps.push(Capability::Cache1h);
        }
        caps
    }
}

fn requests_one_hour_cache(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            let here = map
                .get("cache_control")
                .and_then(|cc| cc.get("ttl"))
                .and_then(Value::as_str)
                .map(|ttl| ttl == "1h")
                .unwrap_or(false);
            here || map.values().any(requests_one_hour_cache)
        }
        Value::Array(items) => items.iter().any(requests_one_hour_cache),
        _ => false,
    }
}

/// One eligible (provider, endpoint, key) triple
#[derive(Debug, Clone, PartialEq)]
pub struct RequestCandidate {
    pub key_id: String,
    pub endpoint_id: String,
    pub provider_id: String,
    pub provider_priority: i32,
    pub key_priority: i32,
    pub api_format: String,
    pub base_url: String,
    pub provider_model_name: String,
    pub price_multiplier: f64,
    /// Breaker cool-down base taken from the endpoint
    pub probe_interval: Option<Duration>,
}

/// Resolves eligible candidates from a catalog snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateResolver;

impl CandidateResolver {
    pub fn new() -> Self {
        Self
    }

    /// Every active triple that exposes `model` and satisfies `requirements`
    ///
    /// Fails with `NoCapableCandidate` when nothing qualifies.
    pub fn resolve(
        &self,
        catalog: &Catalog,
        model: &str,
        requirements: &CapabilityRequirements,
    ) -> Result<Vec<RequestCandidate>, RoutingError> {
        let required = requirements.required();
        let no_candidate = || RoutingError::NoCapableCandidate {
            model: model.to_string(),
            required: required.clone(),
        };

        let Some(global) = catalog.global_model(model).filter(|m| m.is_active) else {
            debug!(model = %model, "Unknown or inactive model");
            return Err(no_candidate());
        };

        // A model that declares capabilities must declare the requested ones
        if !global.supported_capabilities.is_empty()
            && !required
                .iter()
                .all(|c| global.supported_capabilities.contains(c))
        {
            debug!(model = %model, ?required, "Model does not support required capabilities");
            return Err(no_candidate());
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for mapping in catalog.mappings_for(model) {
            let Some(provider) = catalog.provider(&mapping.provider_id).filter(|p| p.is_active)
            else {
                continue;
            };

            for endpoint in catalog.endpoints_of(&provider.id).filter(|e| e.is_active) {
                if requirements.cache_1h && endpoint.cache_ttl_minutes == 0 {
                    continue;
                }

                for key in catalog.keys_of(&endpoint.id) {
                    if !key.is_active || !key.supports_all(&required) {
                        continue;
                    }
                    if !seen.insert(key.id.clone()) {
                        continue;
                    }
                    candidates.push(RequestCandidate {
                        key_id: key.id.clone(),
                        endpoint_id: endpoint.id.clone(),
                        provider_id: provider.id.clone(),
                        provider_priority: provider.priority,
                        key_priority: key.internal_priority,
                        api_format: endpoint.api_format.clone(),
                        base_url: endpoint.base_url.clone(),
                        provider_model_name: mapping.provider_model_name.clone(),
                        price_multiplier: mapping.price_multiplier,
                        probe_interval: (endpoint.probe_interval_secs > 0)
                            .then(|| Duration::from_secs(endpoint.probe_interval_secs)),
                    });
                }
            }
        }

        if candidates.is_empty() {
            debug!(model = %model, ?required, "No capable candidate");
            return Err(no_candidate());
        }

        debug!(model = %model, count = candidates.len(), "Resolved candidates");
        Ok(candidates)
    }
}
