//! Catalog data models
//!
//! Providers, endpoints, keys and model mappings as loaded from the catalog
//! file. These are read-only inputs to routing; only the key `is_active` flag
//! is written back (by health recovery).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Optional capability a key may advertise
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// 1M-token context window
    #[serde(rename = "context_1m")]
    Context1m,
    /// 1-hour prompt cache TTL
    #[serde(rename = "cache_1h")]
    Cache1h,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Context1m => write!(f, "context_1m"),
            Capability::Cache1h => write!(f, "cache_1h"),
        }
    }
}

/// How a provider is billed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    MonthlyQuota,
    #[default]
    PayAsYouGo,
    FreeTier,
}

/// An upstream AI vendor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    /// Lower is preferred. Only consulted in provider-priority mode.
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub billing_type: BillingType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_quota_usd: Option<f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// A base URL under a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub provider_id: String,
    /// Wire format served by this endpoint (e.g. "openai", "claude")
    pub api_format: String,
    pub base_url: String,
    /// 0 means prompt caching is unsupported
    #[serde(default)]
    pub cache_ttl_minutes: u32,
    /// Base breaker cool-down; 0 falls back to the configured default
    #[serde(default)]
    pub probe_interval_secs: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// An upstream credential
#[derive(Clone, Serialize, Deserialize)]
pub struct Key {
    pub id: String,
    pub endpoint_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(skip_serializing)]
    pub secret: String,
    /// Lower is preferred
    #[serde(default)]
    pub internal_priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Learn the concurrency ceiling instead of using a fixed one
    #[serde(default)]
    pub adaptive_mode: bool,
    /// Fixed ceiling; `None` uses the configured default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_limit: Option<u32>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
}

// Hand-written so the secret never reaches logs
impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("endpoint_id", &self.endpoint_id)
            .field("name", &self.name)
            .field("internal_priority", &self.internal_priority)
            .field("is_active", &self.is_active)
            .field("adaptive_mode", &self.adaptive_mode)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("capabilities", &self.capabilities)
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .finish_non_exhaustive()
    }
}

impl Key {
    /// Whether this key advertises every capability in `required`
    pub fn supports_all<'a>(&self, required: impl IntoIterator<Item = &'a Capability>) -> bool {
        required.into_iter().all(|c| self.capabilities.contains(c))
    }
}

/// A logical model name exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalModel {
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub supported_capabilities: BTreeSet<Capability>,
}

/// Provider-side implementation of a global model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub global_model: String,
    pub provider_id: String,
    pub provider_model_name: String,
    #[serde(default = "default_multiplier")]
    pub price_multiplier: f64,
}

fn default_true() -> bool {
    true
}

fn default_multiplier() -> f64 {
    1.0
}
