//! Configuration management for Fleetgate
//!
//! Configuration is loaded from environment variables.

use anyhow::{ensure, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::routing::{AimdRule, ConcurrencyConfig, HealthConfig, SchedulingMode};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// JSON catalog of providers, endpoints, keys and model mappings
    pub catalog_path: PathBuf,

    /// Initial scheduling mode (changeable at runtime)
    pub scheduling_mode: SchedulingMode,
    /// Deadline for a single upstream attempt
    pub attempt_timeout: Duration,

    /// Bearer token for /admin routes; admin routes are open when unset
    pub admin_token: Option<String>,

    /// Status monitor bucket width
    pub status_bucket: Duration,
    /// Status monitor buckets retained
    pub status_buckets: usize,

    pub health: HealthConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let health_defaults = HealthConfig::default();
        let aimd_defaults = AimdRule::default();
        let concurrency_defaults = ConcurrencyConfig::default();

        let config = Self {
            host: var("FLEETGATE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&var, "FLEETGATE_PORT", 8080)?,

            catalog_path: var("FLEETGATE_CATALOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("catalog.json")),

            scheduling_mode: match var("FLEETGATE_SCHEDULING_MODE") {
                Some(raw) => raw
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Invalid FLEETGATE_SCHEDULING_MODE")?,
                None => SchedulingMode::default(),
            },
            attempt_timeout: Duration::from_secs(parse(&var, "FLEETGATE_ATTEMPT_TIMEOUT_SECS", 120)?),

            admin_token: var("FLEETGATE_ADMIN_TOKEN"),

            status_bucket: Duration::from_secs(parse(&var, "FLEETGATE_STATUS_BUCKET_SECS", 300)?),
            status_buckets: parse(&var, "FLEETGATE_STATUS_BUCKETS", 288)?,

            health: HealthConfig {
                failure_threshold: parse(
                    &var,
                    "FLEETGATE_BREAKER_FAILURE_THRESHOLD",
                    health_defaults.failure_threshold,
                )?,
                open_score_threshold: parse(
                    &var,
                    "FLEETGATE_BREAKER_OPEN_SCORE",
                    health_defaults.open_score_threshold,
                )?,
                default_cooldown: Duration::from_secs(parse(
                    &var,
                    "FLEETGATE_BREAKER_COOLDOWN_SECS",
                    health_defaults.default_cooldown.as_secs(),
                )?),
                max_cooldown: Duration::from_secs(parse(
                    &var,
                    "FLEETGATE_BREAKER_MAX_COOLDOWN_SECS",
                    health_defaults.max_cooldown.as_secs(),
                )?),
                backoff_multiplier: parse(
                    &var,
                    "FLEETGATE_BREAKER_BACKOFF_MULTIPLIER",
                    health_defaults.backoff_multiplier,
                )?,
                ..health_defaults
            },

            concurrency: ConcurrencyConfig {
                default_limit: parse(
                    &var,
                    "FLEETGATE_CONCURRENCY_DEFAULT_LIMIT",
                    concurrency_defaults.default_limit,
                )?,
                aimd: AimdRule {
                    min_limit: parse(&var, "FLEETGATE_CONCURRENCY_MIN_LIMIT", aimd_defaults.min_limit)?,
                    max_limit: parse(&var, "FLEETGATE_CONCURRENCY_MAX_LIMIT", aimd_defaults.max_limit)?,
                    decrease_factor: parse(
                        &var,
                        "FLEETGATE_CONCURRENCY_DECREASE_FACTOR",
                        aimd_defaults.decrease_factor,
                    )?,
                    ..aimd_defaults
                },
                ..concurrency_defaults
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject tunables the breaker and AIMD arithmetic cannot work with
    fn validate(&self) -> Result<()> {
        let health = &self.health;
        ensure!(
            health.backoff_multiplier.is_finite() && health.backoff_multiplier >= 1.0,
            "Invalid FLEETGATE_BREAKER_BACKOFF_MULTIPLIER: must be at least 1.0, got {}",
            health.backoff_multiplier
        );
        ensure!(
            (0.0..=1.0).contains(&health.open_score_threshold),
            "Invalid FLEETGATE_BREAKER_OPEN_SCORE: must be within [0, 1], got {}",
            health.open_score_threshold
        );
        ensure!(
            health.failure_threshold >= 1,
            "Invalid FLEETGATE_BREAKER_FAILURE_THRESHOLD: must be at least 1"
        );

        let aimd = &self.concurrency.aimd;
        ensure!(
            aimd.decrease_factor > 0.0 && aimd.decrease_factor < 1.0,
            "Invalid FLEETGATE_CONCURRENCY_DECREASE_FACTOR: must be within (0, 1), got {}",
            aimd.decrease_factor
        );
        ensure!(
            aimd.min_limit >= 1,
            "Invalid FLEETGATE_CONCURRENCY_MIN_LIMIT: must be at least 1"
        );
        ensure!(
            aimd.min_limit <= aimd.max_limit,
            "Invalid FLEETGATE_CONCURRENCY_MIN_LIMIT: {} exceeds FLEETGATE_CONCURRENCY_MAX_LIMIT {}",
            aimd.min_limit,
            aimd.max_limit
        );
        Ok(())
    }
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        None => Ok(default),
    }
}
