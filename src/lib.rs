//! Fleetgate - routing and admission control for multi-provider AI gateways
//!
//! This library selects one upstream credential per attempt from a catalog of
//! providers, endpoints and keys, gates it through per-key concurrency and
//! health tracking, and fails over on error.

pub mod catalog;
pub mod config;
pub mod docs;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod routing;
pub mod status;
pub mod upstream;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

pub use crate::catalog::CatalogStore;
pub use crate::config::Config;
pub use crate::routing::{
    AdaptiveConcurrencyController, Dispatcher, DispatcherComponents, HealthTracker, KeyRateCaps,
    RoutingSettings,
};
pub use crate::status::StatusMonitor;
pub use crate::upstream::{HttpUpstream, UpstreamExecutor};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub start_time: Instant,
    pub catalog: Arc<CatalogStore>,
    pub health: Arc<HealthTracker>,
    pub concurrency: Arc<AdaptiveConcurrencyController>,
    pub settings: Arc<RoutingSettings>,
    pub status: Arc<StatusMonitor>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config) -> Result<Self> {
        let catalog = CatalogStore::from_file(&config.catalog_path).with_context(|| {
            format!("Failed to load catalog from {}", config.catalog_path.display())
        })?;

        // Connection pooling only; per-attempt deadlines are enforced by the dispatcher
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .build()?;

        Ok(Self::with_components(
            config,
            Arc::new(catalog),
            Arc::new(HttpUpstream::new(http_client)),
        ))
    }

    /// Assemble state around a given catalog and upstream executor
    ///
    /// Used by tests to inject a fixed catalog and a mock upstream.
    pub fn with_components(
        config: Config,
        catalog: Arc<CatalogStore>,
        executor: Arc<dyn UpstreamExecutor>,
    ) -> Self {
        let health = Arc::new(HealthTracker::with_config(config.health.clone()));
        let concurrency = Arc::new(AdaptiveConcurrencyController::with_config(
            config.concurrency.clone(),
        ));
        let settings = Arc::new(RoutingSettings::new(config.scheduling_mode));
        let status = Arc::new(StatusMonitor::new(
            config.status_bucket,
            config.status_buckets,
        ));

        // Seed learning state so admin views work before the first request
        for key in catalog.snapshot().keys() {
            concurrency.ensure_registered(key);
        }

        let dispatcher = Arc::new(Dispatcher::new(DispatcherComponents {
            catalog: catalog.clone(),
            health: health.clone(),
            concurrency: concurrency.clone(),
            rate_caps: Arc::new(KeyRateCaps::new()),
            settings: settings.clone(),
            executor,
            status: status.clone(),
            attempt_timeout: config.attempt_timeout,
        }));

        Self {
            config,
            start_time: Instant::now(),
            catalog,
            health,
            concurrency,
            settings,
            status,
            dispatcher,
        }
    }
}
