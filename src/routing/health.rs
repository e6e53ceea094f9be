//! Key and endpoint health tracking with circuit breaking
//!
//! Every key and every endpoint gets a [`HealthRecord`] holding a smoothed
//! health score and a closed / open / half-open breaker. Records live in a
//! sharded map and each has its own lock, so outcomes on different keys never
//! contend.
//!
//! The open -> half-open transition is evaluated lazily by comparing the
//! current time with the last transition; there is no background timer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Configuration for health tracking
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures that open a closed breaker (default: 5)
    pub failure_threshold: u32,
    /// Score at or below which a closed breaker opens (default: 0.15)
    pub open_score_threshold: f64,
    /// Fraction of the distance to 1.0 recovered per success (default: 0.1)
    pub success_weight: f64,
    /// Fraction of the score lost per failure (default: 0.3)
    pub failure_weight: f64,
    /// Minimum score after a successful half-open trial (default: 0.5)
    pub half_open_restore_score: f64,
    /// Score assigned by an admin recovery (default: 1.0)
    pub recovered_score: f64,
    /// Cool-down when the endpoint has no probe interval (default: 30 seconds)
    pub default_cooldown: Duration,
    /// Upper bound on backed-off cool-downs (default: 5 minutes)
    pub max_cooldown: Duration,
    /// Cool-down multiplier for each failed trial (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_score_threshold: 0.15,
            success_weight: 0.1,
            failure_weight: 0.3,
            half_open_restore_score: 0.5,
            recovered_score: 1.0,
            default_cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300), // 5 minutes
            backoff_multiplier: 2.0,
        }
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, usable
    Closed,
    /// Tripped, unusable until the cool-down elapses
    Open,
    /// Probation: one trial request at a time
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// What a health record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject<'a> {
    Key(&'a str),
    Endpoint(&'a str),
}

impl Subject<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Subject::Key(_) => "key",
            Subject::Endpoint(_) => "endpoint",
        }
    }

    fn id(&self) -> &str {
        match self {
            Subject::Key(id) | Subject::Endpoint(id) => id,
        }
    }
}

/// Result of trying to claim the half-open trial slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialClaim {
    /// Breaker is closed; no trial needed
    NotRequired,
    /// This caller owns the trial and must report its outcome (or abandon it)
    Granted,
    /// Breaker is open or another trial is already running
    Denied,
}

/// Mutable per-subject health state
#[derive(Debug)]
struct HealthRecord {
    score: f64,
    consecutive_failures: u32,
    state: CircuitState,
    last_transition: Instant,
    last_transition_at: DateTime<Utc>,
    cooldown: Duration,
    reopen_count: u32,
    trial_in_flight: bool,
    last_failure_reason: Option<String>,
    total_trips: u64,
    successes: u64,
    failures: u64,
}

impl HealthRecord {
    fn new(now: Instant) -> Self {
        Self {
            score: 1.0,
            consecutive_failures: 0,
            state: CircuitState::Closed,
            last_transition: now,
            last_transition_at: Utc::now(),
            cooldown: Duration::ZERO,
            reopen_count: 0,
            trial_in_flight: false,
            last_failure_reason: None,
            total_trips: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_transition) >= self.cooldown
    }

    /// State as seen at `now`, without mutating
    fn effective_state(&self, now: Instant) -> CircuitState {
        match self.state {
            CircuitState::Open if self.cooldown_elapsed(now) => CircuitState::HalfOpen,
            state => state,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.last_transition = now;
        self.last_transition_at = Utc::now();
        self.trial_in_flight = false;
    }

    /// Materialize a lazily-elapsed cool-down
    fn promote(&mut self, now: Instant) -> bool {
        if self.state == CircuitState::Open && self.cooldown_elapsed(now) {
            self.transition(CircuitState::HalfOpen, now);
            return true;
        }
        false
    }

    fn snapshot(&self, id: &str, kind: &'static str, now: Instant) -> HealthSnapshot {
        let state = self.effective_state(now);
        let cooldown_remaining_secs = match state {
            CircuitState::Open => Some(
                self.cooldown
                    .saturating_sub(now.saturating_duration_since(self.last_transition))
                    .as_secs(),
            ),
            _ => None,
        };

        HealthSnapshot {
            id: id.to_string(),
            kind: kind.to_string(),
            health_score: self.score,
            consecutive_failures: self.consecutive_failures,
            circuit_state: state,
            circuit_breaker_open: state == CircuitState::Open,
            last_transition_at: self.last_transition_at.to_rfc3339(),
            cooldown_remaining_secs,
            trial_in_flight: self.trial_in_flight,
            last_failure_reason: self.last_failure_reason.clone(),
            total_trips: self.total_trips,
            successes: self.successes,
            failures: self.failures,
        }
    }
}

/// Read-only view of one health record
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthSnapshot {
    pub id: String,
    /// "key" or "endpoint"
    pub kind: String,
    pub health_score: f64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    pub circuit_breaker_open: bool,
    pub last_transition_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
    pub trial_in_flight: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    pub total_trips: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Breaker state counts for one subject kind
#[derive(Debug, Clone, Default, Serialize, ToSchema)]
pub struct StateCounts {
    pub tracked: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub average_score: f64,
}

/// Summary across all tracked keys and endpoints
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthSummary {
    pub keys: StateCounts,
    pub endpoints: StateCounts,
}

type RecordMap = DashMap<String, Arc<Mutex<HealthRecord>>>;

/// Tracks health of keys and endpoints
///
/// Unknown subjects are healthy: records are created on the first outcome.
pub struct HealthTracker {
    keys: RecordMap,
    endpoints: RecordMap,
    config: HealthConfig,
}

impl HealthTracker {
    /// Create a new health tracker with default configuration
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create a new health tracker with custom configuration
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            keys: DashMap::new(),
            endpoints: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    fn map(&self, subject: Subject<'_>) -> &RecordMap {
        match subject {
            Subject::Key(_) => &self.keys,
            Subject::Endpoint(_) => &self.endpoints,
        }
    }

    fn existing(&self, subject: Subject<'_>) -> Option<Arc<Mutex<HealthRecord>>> {
        self.map(subject).get(subject.id()).map(|r| r.value().clone())
    }

    fn record(&self, subject: Subject<'_>, now: Instant) -> Arc<Mutex<HealthRecord>> {
        if let Some(record) = self.existing(subject) {
            return record;
        }
        self.map(subject)
            .entry(subject.id().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HealthRecord::new(now))))
            .value()
            .clone()
    }

    /// Effective breaker state at `now` (unknown = closed)
    pub fn state(&self, subject: Subject<'_>, now: Instant) -> CircuitState {
        self.existing(subject)
            .map(|r| r.lock().effective_state(now))
            .unwrap_or(CircuitState::Closed)
    }

    /// Current health score (unknown = 1.0)
    pub fn score(&self, subject: Subject<'_>) -> f64 {
        self.existing(subject)
            .map(|r| r.lock().score)
            .unwrap_or(1.0)
    }

    /// Claim the single half-open trial slot
    pub fn try_begin_trial(&self, subject: Subject<'_>, now: Instant) -> TrialClaim {
        let Some(record) = self.existing(subject) else {
            return TrialClaim::NotRequired;
        };
        let mut record = record.lock();
        if record.promote(now) {
            self.log_transition(subject, CircuitState::HalfOpen, &record);
        }

        match record.state {
            CircuitState::Closed => TrialClaim::NotRequired,
            CircuitState::Open => TrialClaim::Denied,
            CircuitState::HalfOpen if record.trial_in_flight => TrialClaim::Denied,
            CircuitState::HalfOpen => {
                record.trial_in_flight = true;
                debug!(
                    subject = subject.kind(),
                    id = %subject.id(),
                    "Half-open trial granted"
                );
                TrialClaim::Granted
            }
        }
    }

    /// Give back a granted trial that never reached the upstream
    pub fn abandon_trial(&self, subject: Subject<'_>) {
        if let Some(record) = self.existing(subject) {
            record.lock().trial_in_flight = false;
        }
    }

    /// Record a successful outcome
    pub fn record_success(&self, subject: Subject<'_>, now: Instant) {
        let record = self.record(subject, now);
        let mut record = record.lock();
        record.promote(now);

        record.successes += 1;
        record.consecutive_failures = 0;
        record.score += self.config.success_weight * (1.0 - record.score);
        record.score = record.score.clamp(0.0, 1.0);

        match record.state {
            CircuitState::HalfOpen => {
                record.score = record.score.max(self.config.half_open_restore_score);
                record.reopen_count = 0;
                record.cooldown = Duration::ZERO;
                record.transition(CircuitState::Closed, now);
                self.log_transition(subject, CircuitState::Closed, &record);
            }
            // A request admitted before the breaker opened; the breaker
            // stays open until its own trial succeeds.
            CircuitState::Open | CircuitState::Closed => {}
        }
    }

    /// Record a failed outcome
    ///
    /// `base_cooldown` is the owning endpoint's probe interval; `None` uses the
    /// configured default.
    pub fn record_failure(
        &self,
        subject: Subject<'_>,
        reason: &str,
        base_cooldown: Option<Duration>,
        now: Instant,
    ) {
        let record = self.record(subject, now);
        let mut record = record.lock();
        record.promote(now);

        record.failures += 1;
        record.consecutive_failures += 1;
        record.score *= 1.0 - self.config.failure_weight;
        record.score = record.score.clamp(0.0, 1.0);
        record.last_failure_reason = Some(reason.to_string());

        let base = base_cooldown
            .filter(|d| !d.is_zero())
            .unwrap_or(self.config.default_cooldown);

        match record.state {
            CircuitState::Closed => {
                let tripped = record.consecutive_failures >= self.config.failure_threshold
                    || record.score <= self.config.open_score_threshold;
                if tripped {
                    record.reopen_count = 0;
                    record.cooldown = base.min(self.config.max_cooldown);
                    record.total_trips += 1;
                    record.transition(CircuitState::Open, now);
                    self.log_transition(subject, CircuitState::Open, &record);
                }
            }
            CircuitState::HalfOpen => {
                record.reopen_count += 1;
                record.cooldown = self.backoff(base, record.reopen_count);
                record.total_trips += 1;
                record.transition(CircuitState::Open, now);
                self.log_transition(subject, CircuitState::Open, &record);
            }
            CircuitState::Open => {}
        }
    }

    fn backoff(&self, base: Duration, reopens: u32) -> Duration {
        let max = self.config.max_cooldown.as_secs_f64();
        let secs = base.as_secs_f64() * self.config.backoff_multiplier.powi(reopens as i32);
        if secs.is_nan() {
            return base.min(self.config.max_cooldown);
        }
        Duration::from_secs_f64(secs.clamp(0.0, max))
    }

    /// Force a subject closed with a fresh score
    pub fn recover(&self, subject: Subject<'_>, now: Instant) -> HealthSnapshot {
        let record = self.record(subject, now);
        let mut record = record.lock();
        let previous = record.state;

        record.score = self.config.recovered_score;
        record.consecutive_failures = 0;
        record.reopen_count = 0;
        record.cooldown = Duration::ZERO;
        record.last_failure_reason = None;
        record.transition(CircuitState::Closed, now);

        info!(
            subject = subject.kind(),
            id = %subject.id(),
            previous = previous.as_str(),
            "Health manually recovered"
        );
        record.snapshot(subject.id(), subject.kind(), now)
    }

    /// Ids of keys whose breaker is open (including elapsed cool-downs
    /// that have not yet been trialled)
    pub fn open_keys(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .keys
            .iter()
            .filter(|entry| entry.value().lock().state == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Snapshot of one subject, if it has ever recorded an outcome
    pub fn snapshot(&self, subject: Subject<'_>, now: Instant) -> Option<HealthSnapshot> {
        self.existing(subject)
            .map(|r| r.lock().snapshot(subject.id(), subject.kind(), now))
    }

    /// Snapshot of one subject, reporting a fresh healthy record if unknown
    pub fn snapshot_or_default(&self, subject: Subject<'_>, now: Instant) -> HealthSnapshot {
        self.snapshot(subject, now).unwrap_or_else(|| {
            HealthRecord::new(now).snapshot(subject.id(), subject.kind(), now)
        })
    }

    /// Aggregate state counts
    pub fn summary(&self, now: Instant) -> HealthSummary {
        HealthSummary {
            keys: count_states(&self.keys, now),
            endpoints: count_states(&self.endpoints, now),
        }
    }

    fn log_transition(&self, subject: Subject<'_>, to: CircuitState, record: &HealthRecord) {
        metrics::counter!(
            "fleetgate_circuit_transitions_total",
            "subject" => subject.kind(),
            "to" => to.as_str()
        )
        .increment(1);

        match to {
            CircuitState::Open => warn!(
                subject = subject.kind(),
                id = %subject.id(),
                score = record.score,
                consecutive_failures = record.consecutive_failures,
                cooldown_secs = record.cooldown.as_secs(),
                "Circuit opened"
            ),
            CircuitState::HalfOpen => debug!(
                subject = subject.kind(),
                id = %subject.id(),
                "Cool-down elapsed, circuit half-open"
            ),
            CircuitState::Closed => info!(
                subject = subject.kind(),
                id = %subject.id(),
                score = record.score,
                "Circuit closed after successful trial"
            ),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn count_states(map: &RecordMap, now: Instant) -> StateCounts {
    let mut counts = StateCounts::default();
    let mut score_total = 0.0;
    for entry in map.iter() {
        let record = entry.value().lock();
        counts.tracked += 1;
        score_total += record.score;
        match record.effective_state(now) {
            CircuitState::Closed => counts.closed += 1,
            CircuitState::Open => counts.open += 1,
            CircuitState::HalfOpen => counts.half_open += 1,
        }
    }
    if counts.tracked > 0 {
        counts.average_score = score_total / counts.tracked as f64;
    }
    counts
}
