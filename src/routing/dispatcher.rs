//! Request dispatch
//!
//! resolve -> schedule -> admit -> execute -> record -> fail over.
//!
//! Each candidate is attempted at most once per request. Admission never
//! waits: a key at its ceiling, over its rate cap, or whose half-open trial
//! is taken is skipped in favour of the next candidate.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    concurrency::{AdaptiveConcurrencyController, ReleaseOutcome},
    health::{CircuitState, HealthTracker, Subject, TrialClaim},
    rate_cap::KeyRateCaps,
    resolver::{CandidateResolver, CapabilityRequirements, RequestCandidate},
    scheduler::SchedulingPolicy,
    settings::SchedulingModeSource,
};
use crate::{
    catalog::{CatalogStore, Key},
    error::{CandidateFailure, FailureReason, RoutingError},
    status::{AttemptOutcome, StatusMonitor},
    upstream::{UpstreamExecutor, UpstreamFailure, UpstreamRequest, UpstreamResponse, UpstreamTarget},
};

/// A request ready for routing
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Seeds the tie-break; `None` falls back to round-robin
    pub request_id: Option<String>,
    pub model: String,
    pub requirements: CapabilityRequirements,
    pub upstream: UpstreamRequest,
}

/// The response plus which credential served it
#[derive(Debug, Clone)]
pub struct DispatchSuccess {
    pub response: UpstreamResponse,
    pub key_id: String,
    pub endpoint_id: String,
    pub provider_id: String,
    pub price_multiplier: f64,
    /// Upstream calls made, including the successful one
    pub attempts: u32,
    /// Served by a half-open key or endpoint as its trial
    pub probation: bool,
}

/// Shared components the dispatcher is built from
pub struct DispatcherComponents {
    pub catalog: Arc<CatalogStore>,
    pub health: Arc<HealthTracker>,
    pub concurrency: Arc<AdaptiveConcurrencyController>,
    pub rate_caps: Arc<KeyRateCaps>,
    pub settings: Arc<dyn SchedulingModeSource>,
    pub executor: Arc<dyn UpstreamExecutor>,
    pub status: Arc<StatusMonitor>,
    pub attempt_timeout: Duration,
}

pub struct Dispatcher {
    catalog: Arc<CatalogStore>,
    resolver: CandidateResolver,
    scheduler: SchedulingPolicy,
    health: Arc<HealthTracker>,
    concurrency: Arc<AdaptiveConcurrencyController>,
    rate_caps: Arc<KeyRateCaps>,
    settings: Arc<dyn SchedulingModeSource>,
    executor: Arc<dyn UpstreamExecutor>,
    status: Arc<StatusMonitor>,
    attempt_timeout: Duration,
}

enum Attempt {
    Served(UpstreamResponse),
    /// Never reached the upstream
    Skipped(FailureReason),
    Failed(UpstreamFailure),
    /// The request itself is invalid; stop failing over
    Rejected(UpstreamFailure),
}

/// Half-open trial claims held for one attempt
///
/// Claims not settled by a recorded outcome are handed back on drop, which
/// also covers a cancelled request future.
struct TrialClaims<'a> {
    health: &'a HealthTracker,
    key_id: &'a str,
    endpoint_id: &'a str,
    key: bool,
    endpoint: bool,
}

impl TrialClaims<'_> {
    fn settle_key(&mut self) {
        self.key = false;
    }

    fn settle_endpoint(&mut self) {
        self.endpoint = false;
    }
}

impl Drop for TrialClaims<'_> {
    fn drop(&mut self) {
        if self.key {
            self.health.abandon_trial(Subject::Key(self.key_id));
        }
        if self.endpoint {
            self.health.abandon_trial(Subject::Endpoint(self.endpoint_id));
        }
    }
}

impl Dispatcher {
    pub fn new(components: DispatcherComponents) -> Self {
        Self {
            catalog: components.catalog,
            resolver: CandidateResolver::new(),
            scheduler: SchedulingPolicy::new(),
            health: components.health,
            concurrency: components.concurrency,
            rate_caps: components.rate_caps,
            settings: components.settings,
            executor: components.executor,
            status: components.status,
            attempt_timeout: components.attempt_timeout,
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Route one request, failing over until a candidate succeeds
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchSuccess, RoutingError> {
        let catalog = self.catalog.snapshot();

        let candidates = match self
            .resolver
            .resolve(&catalog, &request.model, &request.requirements)
        {
            Ok(candidates) => candidates,
            Err(e) => {
                metrics::counter!("fleetgate_dispatch_total", "result" => "no_candidate").increment(1);
                return Err(e);
            }
        };

        for candidate in &candidates {
            if let Some(key) = catalog.key(&candidate.key_id) {
                self.concurrency.ensure_registered(key);
            }
        }

        let mode = self.settings.scheduling_mode();
        let tie_break = self.scheduler.tie_break(request.request_id.as_deref());
        let plan = self
            .scheduler
            .plan(candidates, mode, tie_break, &self.health, Instant::now());

        debug!(
            request_id = ?request.request_id,
            model = %request.model,
            mode = mode.as_str(),
            viable = plan.attempts.len(),
            filtered = plan.filtered.len(),
            "Dispatch plan ready"
        );

        let mut failures = plan.filtered;
        let mut tried = HashSet::new();
        let mut upstream_calls = 0u32;

        for scheduled in plan.attempts {
            let probation = scheduled.probation;
            let candidate = scheduled.candidate;
            if !tried.insert(candidate.key_id.clone()) {
                continue;
            }
            let Some(key) = catalog.key(&candidate.key_id) else {
                continue;
            };

            let attempt = self.attempt(&candidate, key, &request.upstream).await;
            if matches!(
                attempt,
                Attempt::Served(_) | Attempt::Failed(_) | Attempt::Rejected(_)
            ) {
                upstream_calls += 1;
                if probation {
                    let result = match &attempt {
                        Attempt::Served(_) => "served",
                        Attempt::Rejected(_) => "rejected",
                        _ => "failed",
                    };
                    metrics::counter!("fleetgate_probation_attempts_total", "result" => result)
                        .increment(1);
                }
            }

            let reason = match attempt {
                Attempt::Served(response) => {
                    metrics::counter!("fleetgate_dispatch_total", "result" => "success").increment(1);
                    info!(
                        request_id = ?request.request_id,
                        model = %request.model,
                        key_id = %candidate.key_id,
                        provider_id = %candidate.provider_id,
                        attempts = upstream_calls,
                        probation,
                        "Request served"
                    );
                    return Ok(DispatchSuccess {
                        response,
                        key_id: candidate.key_id,
                        endpoint_id: candidate.endpoint_id,
                        provider_id: candidate.provider_id,
                        price_multiplier: candidate.price_multiplier,
                        attempts: upstream_calls,
                        probation,
                    });
                }
                Attempt::Rejected(failure) => {
                    metrics::counter!("fleetgate_dispatch_total", "result" => "rejected").increment(1);
                    return Err(RoutingError::UpstreamRejected {
                        key_id: candidate.key_id,
                        failure,
                    });
                }
                Attempt::Skipped(reason) => reason,
                Attempt::Failed(failure) => {
                    warn!(
                        request_id = ?request.request_id,
                        key_id = %candidate.key_id,
                        endpoint_id = %candidate.endpoint_id,
                        error = %failure,
                        probation,
                        "Upstream attempt failed, failing over"
                    );
                    FailureReason::Upstream { failure }
                }
            };

            failures.push(CandidateFailure {
                key_id: candidate.key_id,
                endpoint_id: candidate.endpoint_id,
                provider_id: candidate.provider_id,
                reason,
            });
        }

        metrics::counter!("fleetgate_dispatch_total", "result" => "exhausted").increment(1);
        warn!(
            request_id = ?request.request_id,
            model = %request.model,
            failures = failures.len(),
            "All candidates exhausted"
        );
        Err(RoutingError::AllCandidatesExhausted {
            model: request.model,
            failures,
        })
    }

    async fn attempt(
        &self,
        candidate: &RequestCandidate,
        key: &Key,
        request: &UpstreamRequest,
    ) -> Attempt {
        let now = Instant::now();
        let key_subject = Subject::Key(&candidate.key_id);
        let endpoint_subject = Subject::Endpoint(&candidate.endpoint_id);

        let mut claims = TrialClaims {
            health: &self.health,
            key_id: &candidate.key_id,
            endpoint_id: &candidate.endpoint_id,
            key: false,
            endpoint: false,
        };

        match self.health.try_begin_trial(key_subject, now) {
            TrialClaim::Denied => return self.skip(self.unavailable(key_subject, now)),
            TrialClaim::Granted => claims.key = true,
            TrialClaim::NotRequired => {}
        }
        match self.health.try_begin_trial(endpoint_subject, now) {
            TrialClaim::Denied => return self.skip(self.unavailable(endpoint_subject, now)),
            TrialClaim::Granted => claims.endpoint = true,
            TrialClaim::NotRequired => {}
        }

        let permit = match self.concurrency.try_acquire(&candidate.key_id) {
            Ok(permit) => permit,
            Err(exceeded) => {
                return self.skip(FailureReason::ConcurrencyExceeded {
                    in_flight: exceeded.in_flight,
                    limit: exceeded.limit,
                })
            }
        };

        if let Err(capped) = self.rate_caps.check(key) {
            permit.release(ReleaseOutcome::Neutral);
            return self.skip(FailureReason::RateCapped {
                per_minute: capped.per_minute,
            });
        }

        let target = UpstreamTarget {
            key_id: candidate.key_id.clone(),
            endpoint_id: candidate.endpoint_id.clone(),
            provider_id: candidate.provider_id.clone(),
            api_format: candidate.api_format.clone(),
            base_url: candidate.base_url.clone(),
            provider_model_name: candidate.provider_model_name.clone(),
            secret: key.secret.clone(),
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.attempt_timeout,
            self.executor.execute(&target, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamFailure::timeout(self.attempt_timeout)),
        };
        let latency = started.elapsed();
        let finished = Instant::now();

        metrics::histogram!("fleetgate_upstream_latency_seconds").record(latency.as_secs_f64());

        match result {
            Ok(response) => {
                permit.release(ReleaseOutcome::Success { latency });
                self.health.record_success(key_subject, finished);
                self.health.record_success(endpoint_subject, finished);
                claims.settle_key();
                claims.settle_endpoint();
                self.status
                    .record(&candidate.api_format, AttemptOutcome::Success, Utc::now());
                metrics::counter!("fleetgate_attempts_total", "outcome" => "success").increment(1);
                Attempt::Served(response)
            }
            Err(failure) if failure.is_request_fault() => {
                // Upstream answered; the request is at fault, not the credential
                permit.release(ReleaseOutcome::Neutral);
                metrics::counter!("fleetgate_attempts_total", "outcome" => failure.label())
                    .increment(1);
                Attempt::Rejected(failure)
            }
            Err(failure) => {
                let outcome = match failure {
                    UpstreamFailure::Timeout { .. } => ReleaseOutcome::Timeout,
                    ref f if f.is_overload() => ReleaseOutcome::Overloaded,
                    _ => ReleaseOutcome::Error,
                };
                permit.release(outcome);

                self.health.record_failure(
                    key_subject,
                    failure.label(),
                    candidate.probe_interval,
                    finished,
                );
                claims.settle_key();
                if failure.affects_endpoint() {
                    self.health.record_failure(
                        endpoint_subject,
                        failure.label(),
                        candidate.probe_interval,
                        finished,
                    );
                    claims.settle_endpoint();
                }

                let status_outcome = match failure {
                    UpstreamFailure::Timeout { .. } => AttemptOutcome::Timeout,
                    UpstreamFailure::RateLimited { .. } => AttemptOutcome::RateLimited,
                    _ => AttemptOutcome::Failure,
                };
                self.status
                    .record(&candidate.api_format, status_outcome, Utc::now());
                metrics::counter!("fleetgate_attempts_total", "outcome" => failure.label())
                    .increment(1);
                Attempt::Failed(failure)
            }
        }
    }

    fn unavailable(&self, subject: Subject<'_>, now: Instant) -> FailureReason {
        let kind = match subject {
            Subject::Key(_) => "key",
            Subject::Endpoint(_) => "endpoint",
        };
        match self.health.state(subject, now) {
            CircuitState::Open => FailureReason::CircuitOpen {
                subject: kind.to_string(),
            },
            _ => FailureReason::TrialInProgress {
                subject: kind.to_string(),
            },
        }
    }

    fn skip(&self, reason: FailureReason) -> Attempt {
        metrics::counter!("fleetgate_attempts_total", "outcome" => reason.label()).increment(1);
        Attempt::Skipped(reason)
    }
}
