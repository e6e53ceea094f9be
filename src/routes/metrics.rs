//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::warn;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

fn handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder");
                None
            }
        })
        .as_ref()
}

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = handle();
    register_metrics();
}

/// Register all custom metrics
fn register_metrics() {
    metrics::describe_counter!(
        "fleetgate_requests_total",
        "Gateway requests by outcome and model"
    );
    metrics::describe_histogram!(
        "fleetgate_request_duration_seconds",
        "Gateway request duration in seconds, failover included"
    );
    metrics::describe_counter!(
        "fleetgate_dispatch_total",
        "Dispatch results (success, rejected, exhausted, no_candidate)"
    );
    metrics::describe_counter!(
        "fleetgate_attempts_total",
        "Per-candidate attempt outcomes"
    );
    metrics::describe_histogram!(
        "fleetgate_upstream_latency_seconds",
        "Latency of individual upstream calls"
    );
    metrics::describe_counter!(
        "fleetgate_circuit_transitions_total",
        "Circuit breaker transitions by subject and target state"
    );
    metrics::describe_counter!(
        "fleetgate_probation_attempts_total",
        "Upstream calls made as half-open trials"
    );
    metrics::describe_counter!(
        "fleetgate_concurrency_adjustments_total",
        "Adaptive concurrency ceiling changes"
    );
}

/// Prometheus metrics endpoint handler
///
/// Returns metrics in Prometheus text format for scraping.
pub async fn prometheus_metrics() -> impl IntoResponse {
    handle().map(|h| h.render()).unwrap_or_default()
}

/// Record a gateway request
pub fn record_request(status: &str, model: &str, duration_secs: f64) {
    metrics::counter!("fleetgate_requests_total", "status" => status.to_string(), "model" => model.to_string())
        .increment(1);
    metrics::histogram!("fleetgate_request_duration_seconds", "model" => model.to_string())
        .record(duration_secs);
}
