//! Per-key admission control with fixed or learned concurrency ceilings
//!
//! Admission is a single compare-and-increment on the key's in-flight
//! counter; it never queues. Release is a single decrement followed by a
//! learning update serialized by the key's own lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use utoipa::ToSchema;

use super::aimd::AimdRule;
use crate::catalog::Key;

/// Configuration for the concurrency controller
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Starting ceiling for adaptive keys, and the fixed ceiling when a key
    /// has none configured (default: 4)
    pub default_limit: u32,
    /// Admission-time utilization a success needs to grow the ceiling (default: 0.5)
    pub increase_utilization: f64,
    /// Smoothing factor for the latency average (default: 0.2)
    pub latency_alpha: f64,
    /// Ceiling adjustment rule
    pub aimd: AimdRule,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            default_limit: 4,
            increase_utilization: 0.5,
            latency_alpha: 0.2,
            aimd: AimdRule::default(),
        }
    }
}

/// How a key's ceiling is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Admin-set ceiling
    Fixed,
    /// Ceiling learned from outcomes
    Adaptive,
}

impl ConcurrencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcurrencyMode::Fixed => "fixed",
            ConcurrencyMode::Adaptive => "adaptive",
        }
    }
}

/// Outcome fed back when a permit is released
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseOutcome {
    Success { latency: Duration },
    /// Attempt exceeded its deadline (an overload signal)
    Timeout,
    /// Provider rate limit or overload status
    Overloaded,
    /// Any other failure; counted but does not move the ceiling
    Error,
    /// Slot was never used for an upstream call
    Neutral,
}

/// Admission rejected: the key is at its ceiling
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("key {key_id} at concurrency limit ({in_flight}/{limit})")]
pub struct ConcurrencyExceeded {
    pub key_id: String,
    pub in_flight: u32,
    pub limit: u32,
}

/// Errors from administrative operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("key {0} is not registered with the concurrency controller")]
    UnknownKey(String),

    #[error("concurrency limit must be at least 1")]
    InvalidLimit,
}

#[derive(Debug)]
struct Learning {
    mode: ConcurrencyMode,
    successes: u64,
    errors: u64,
    timeouts: u64,
    overloads: u64,
    latency_ema_ms: Option<f64>,
    previous_mode: Option<ConcurrencyMode>,
    mode_changed_at: Option<DateTime<Utc>>,
}

impl Learning {
    fn new(mode: ConcurrencyMode) -> Self {
        Self {
            mode,
            successes: 0,
            errors: 0,
            timeouts: 0,
            overloads: 0,
            latency_ema_ms: None,
            previous_mode: None,
            mode_changed_at: None,
        }
    }

    fn clear_counters(&mut self) {
        self.successes = 0;
        self.errors = 0;
        self.timeouts = 0;
        self.overloads = 0;
        self.latency_ema_ms = None;
    }

    fn switch_mode(&mut self, mode: ConcurrencyMode) -> ConcurrencyMode {
        let previous = self.mode;
        if previous != mode {
            self.mode = mode;
            self.previous_mode = Some(previous);
            self.mode_changed_at = Some(Utc::now());
        }
        previous
    }
}

/// Per-key admission state
#[derive(Debug)]
struct KeySlot {
    in_flight: AtomicU32,
    limit: AtomicU32,
    learning: Mutex<Learning>,
}

impl KeySlot {
    fn new(mode: ConcurrencyMode, limit: u32) -> Self {
        Self {
            in_flight: AtomicU32::new(0),
            limit: AtomicU32::new(limit.max(1)),
            learning: Mutex::new(Learning::new(mode)),
        }
    }

    fn decrement(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
    }
}

/// Admission slot held for the duration of one upstream attempt
///
/// Call [`ConcurrencyPermit::release`] with the attempt's outcome. A permit
/// dropped without release (e.g. the request future was cancelled) frees
/// the slot without feeding the learning rule.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    slot: Option<Arc<KeySlot>>,
    controller: ControllerParams,
    key_id: String,
    utilization: f64,
}

#[derive(Debug, Clone)]
struct ControllerParams {
    increase_utilization: f64,
    latency_alpha: f64,
    aimd: AimdRule,
}

impl ConcurrencyPermit {
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Free the slot and learn from the outcome. Consumes the permit, so a
    /// slot can only be released once.
    pub fn release(mut self, outcome: ReleaseOutcome) {
        let Some(slot) = self.slot.take() else {
            return;
        };
        slot.decrement();

        let mut learning = slot.learning.lock();
        let current = slot.limit.load(Ordering::Acquire);
        let mut next = current;

        match outcome {
            ReleaseOutcome::Success { latency } => {
                learning.successes += 1;
                let ms = latency.as_secs_f64() * 1000.0;
                learning.latency_ema_ms = Some(match learning.latency_ema_ms {
                    Some(prev) => prev + self.controller.latency_alpha * (ms - prev),
                    None => ms,
                });
                if learning.mode == ConcurrencyMode::Adaptive
                    && self.utilization >= self.controller.increase_utilization
                {
                    next = self.controller.aimd.reward(current);
                }
            }
            ReleaseOutcome::Timeout => {
                learning.timeouts += 1;
                if learning.mode == ConcurrencyMode::Adaptive {
                    next = self.controller.aimd.penalize(current);
                }
            }
            ReleaseOutcome::Overloaded => {
                learning.overloads += 1;
                learning.errors += 1;
                if learning.mode == ConcurrencyMode::Adaptive {
                    next = self.controller.aimd.penalize(current);
                }
            }
            ReleaseOutcome::Error => learning.errors += 1,
            ReleaseOutcome::Neutral => {}
        }

        if next != current {
            slot.limit.store(next, Ordering::Release);
            metrics::counter!(
                "fleetgate_concurrency_adjustments_total",
                "direction" => if next > current { "increase" } else { "decrease" }
            )
            .increment(1);
            debug!(
                key_id = %self.key_id,
                from = current,
                to = next,
                "Adaptive concurrency ceiling adjusted"
            );
        }
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.decrement();
        }
    }
}

/// Result of a mode toggle
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ModeChange {
    pub key_id: String,
    pub previous_mode: ConcurrencyMode,
    pub mode: ConcurrencyMode,
    pub effective_limit: u32,
}

/// Exposed per-key statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConcurrencyStats {
    pub key_id: String,
    pub mode: ConcurrencyMode,
    pub limit: u32,
    pub in_flight: u32,
    pub successes: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub overloads: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    /// Mode before the most recent switch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_mode: Option<ConcurrencyMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_changed_at: Option<String>,
}

/// Per-key fixed or adaptive concurrency limiter
pub struct AdaptiveConcurrencyController {
    slots: DashMap<String, Arc<KeySlot>>,
    config: ConcurrencyConfig,
    params: ControllerParams,
}

impl AdaptiveConcurrencyController {
    pub fn new() -> Self {
        Self::with_config(ConcurrencyConfig::default())
    }

    pub fn with_config(config: ConcurrencyConfig) -> Self {
        let params = ControllerParams {
            increase_utilization: config.increase_utilization,
            latency_alpha: config.latency_alpha,
            aimd: config.aimd.clone(),
        };
        Self {
            slots: DashMap::new(),
            config,
            params,
        }
    }

    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    fn slot(&self, key_id: &str) -> Option<Arc<KeySlot>> {
        self.slots.get(key_id).map(|s| s.value().clone())
    }

    fn default_limit(&self) -> u32 {
        self.config.default_limit.max(1)
    }

    /// Register a catalog key if not yet known. Existing state (including
    /// admin overrides) is kept.
    pub fn ensure_registered(&self, key: &Key) {
        if self.slots.contains_key(&key.id) {
            return;
        }
        let (mode, limit) = if key.adaptive_mode {
            (ConcurrencyMode::Adaptive, self.default_limit())
        } else {
            (
                ConcurrencyMode::Fixed,
                key.concurrency_limit.unwrap_or(self.default_limit()).max(1),
            )
        };
        self.slots
            .entry(key.id.clone())
            .or_insert_with(|| Arc::new(KeySlot::new(mode, limit)));
    }

    /// Try to take a slot on `key_id` without waiting
    ///
    /// Unregistered keys get a fixed slot at the default ceiling.
    pub fn try_acquire(&self, key_id: &str) -> Result<ConcurrencyPermit, ConcurrencyExceeded> {
        let slot = match self.slot(key_id) {
            Some(slot) => slot,
            None => self
                .slots
                .entry(key_id.to_string())
                .or_insert_with(|| {
                    Arc::new(KeySlot::new(ConcurrencyMode::Fixed, self.default_limit()))
                })
                .value()
                .clone(),
        };

        loop {
            let current = slot.in_flight.load(Ordering::Acquire);
            let limit = slot.limit.load(Ordering::Acquire);
            if current >= limit {
                return Err(ConcurrencyExceeded {
                    key_id: key_id.to_string(),
                    in_flight: current,
                    limit,
                });
            }
            if slot
                .in_flight
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(ConcurrencyPermit {
                    slot: Some(slot.clone()),
                    controller: self.params.clone(),
                    key_id: key_id.to_string(),
                    utilization: (current + 1) as f64 / limit as f64,
                });
            }
        }
    }

    /// Toggle adaptive mode
    ///
    /// Enabling starts learning from the default ceiling. Disabling pins the
    /// ceiling to `fixed_limit`, or to the current ceiling when omitted.
    pub fn set_mode(
        &self,
        key_id: &str,
        enabled: bool,
        fixed_limit: Option<u32>,
    ) -> Result<ModeChange, ConcurrencyError> {
        if fixed_limit == Some(0) {
            return Err(ConcurrencyError::InvalidLimit);
        }
        let slot = self
            .slot(key_id)
            .ok_or_else(|| ConcurrencyError::UnknownKey(key_id.to_string()))?;
        let mut learning = slot.learning.lock();

        let target = if enabled {
            ConcurrencyMode::Adaptive
        } else {
            ConcurrencyMode::Fixed
        };
        let previous = learning.switch_mode(target);

        let limit = match (target, previous) {
            (ConcurrencyMode::Adaptive, ConcurrencyMode::Fixed) => self.default_limit(),
            (ConcurrencyMode::Adaptive, ConcurrencyMode::Adaptive) => {
                slot.limit.load(Ordering::Acquire)
            }
            (ConcurrencyMode::Fixed, _) => {
                fixed_limit.unwrap_or_else(|| slot.limit.load(Ordering::Acquire))
            }
        };
        slot.limit.store(limit, Ordering::Release);

        info!(
            key_id = %key_id,
            previous = previous.as_str(),
            mode = target.as_str(),
            limit,
            "Concurrency mode updated"
        );

        Ok(ModeChange {
            key_id: key_id.to_string(),
            previous_mode: previous,
            mode: target,
            effective_limit: limit,
        })
    }

    /// Pin a fixed ceiling, switching to fixed mode. Returns the previous mode.
    pub fn set_fixed_limit(
        &self,
        key_id: &str,
        limit: u32,
    ) -> Result<ConcurrencyMode, ConcurrencyError> {
        if limit == 0 {
            return Err(ConcurrencyError::InvalidLimit);
        }
        let slot = self
            .slot(key_id)
            .ok_or_else(|| ConcurrencyError::UnknownKey(key_id.to_string()))?;
        let mut learning = slot.learning.lock();
        let previous = learning.switch_mode(ConcurrencyMode::Fixed);
        slot.limit.store(limit, Ordering::Release);

        info!(key_id = %key_id, limit, previous = previous.as_str(), "Fixed concurrency limit set");
        Ok(previous)
    }

    /// Clear learned statistics and return to the default ceiling. Mode is kept.
    pub fn reset_learning(&self, key_id: &str) -> Result<ConcurrencyStats, ConcurrencyError> {
        let slot = self
            .slot(key_id)
            .ok_or_else(|| ConcurrencyError::UnknownKey(key_id.to_string()))?;
        {
            let mut learning = slot.learning.lock();
            learning.clear_counters();
            slot.limit.store(self.default_limit(), Ordering::Release);
        }
        info!(key_id = %key_id, "Concurrency learning reset");
        Ok(stats_of(key_id, &slot))
    }

    pub fn stats(&self, key_id: &str) -> Result<ConcurrencyStats, ConcurrencyError> {
        self.slot(key_id)
            .map(|slot| stats_of(key_id, &slot))
            .ok_or_else(|| ConcurrencyError::UnknownKey(key_id.to_string()))
    }

    pub fn in_flight(&self, key_id: &str) -> u32 {
        self.slot(key_id)
            .map(|s| s.in_flight.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn limit(&self, key_id: &str) -> Option<u32> {
        self.slot(key_id).map(|s| s.limit.load(Ordering::Acquire))
    }
}

impl Default for AdaptiveConcurrencyController {
    fn default() -> Self {
        Self::new()
    }
}

fn stats_of(key_id: &str, slot: &KeySlot) -> ConcurrencyStats {
    let learning = slot.learning.lock();
    ConcurrencyStats {
        key_id: key_id.to_string(),
        mode: learning.mode,
        limit: slot.limit.load(Ordering::Acquire),
        in_flight: slot.in_flight.load(Ordering::Acquire),
        successes: learning.successes,
        errors: learning.errors,
        timeouts: learning.timeouts,
        overloads: learning.overloads,
        avg_latency_ms: learning.latency_ema_ms,
        previous_mode: learning.previous_mode,
        mode_changed_at: learning.mode_changed_at.map(|t| t.to_rfc3339()),
    }
}
