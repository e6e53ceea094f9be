//! Candidate ordering
//!
//! Sorts resolved candidates by admin-assigned priority and spreads load
//! across equally-ranked keys by rotating each tied group by a per-request
//! hash. Open-breaker candidates are split off before ordering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use sha2::{Digest, Sha256};

use super::{
    health::{CircuitState, HealthTracker, Subject},
    resolver::RequestCandidate,
    settings::SchedulingMode,
};
use crate::error::{CandidateFailure, FailureReason};

/// Seed for rotating tied groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieBreak(u64);

impl TieBreak {
    /// Derive from a request id: first eight bytes of its SHA-256
    pub fn from_request_id(request_id: &str) -> Self {
        let digest = Sha256::digest(request_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        TieBreak(u64::from_be_bytes(bytes))
    }

    pub fn from_counter(value: u64) -> Self {
        TieBreak(value)
    }

    fn offset(&self, group_size: usize) -> usize {
        (self.0 % group_size as u64) as usize
    }
}

/// A candidate in its final attempt position
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCandidate {
    pub candidate: RequestCandidate,
    /// Key or endpoint is half-open; a failure reopens it immediately
    pub probation: bool,
}

/// Ordered attempt list plus the candidates excluded by health
#[derive(Debug, Clone, Default)]
pub struct AttemptPlan {
    pub attempts: Vec<ScheduledCandidate>,
    pub filtered: Vec<CandidateFailure>,
}

/// Orders candidates under the configured scheduling mode
#[derive(Debug, Default)]
pub struct SchedulingPolicy {
    round_robin: AtomicU64,
}

impl SchedulingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tie-break for a request: hashed id when present, round-robin otherwise
    pub fn tie_break(&self, request_id: Option<&str>) -> TieBreak {
        match request_id {
            Some(id) => TieBreak::from_request_id(id),
            None => TieBreak::from_counter(self.round_robin.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Filter by health, then order. Reads health only; never mutates it.
    pub fn plan(
        &self,
        candidates: Vec<RequestCandidate>,
        mode: SchedulingMode,
        tie_break: TieBreak,
        health: &HealthTracker,
        now: Instant,
    ) -> AttemptPlan {
        let mut plan = AttemptPlan::default();
        let mut viable = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let key_state = health.state(Subject::Key(&candidate.key_id), now);
            let endpoint_state = health.state(Subject::Endpoint(&candidate.endpoint_id), now);

            let open_subject = if key_state == CircuitState::Open {
                Some("key")
            } else if endpoint_state == CircuitState::Open {
                Some("endpoint")
            } else {
                None
            };

            match open_subject {
                Some(subject) => plan.filtered.push(CandidateFailure {
                    key_id: candidate.key_id,
                    endpoint_id: candidate.endpoint_id,
                    provider_id: candidate.provider_id,
                    reason: FailureReason::CircuitOpen {
                        subject: subject.to_string(),
                    },
                }),
                None => {
                    let probation = key_state == CircuitState::HalfOpen
                        || endpoint_state == CircuitState::HalfOpen;
                    viable.push(ScheduledCandidate {
                        candidate,
                        probation,
                    });
                }
            }
        }

        plan.attempts = order(viable, mode, tie_break);
        plan
    }
}

/// Pure ordering: sort by rank, then rotate each tied group
pub fn order(
    mut candidates: Vec<ScheduledCandidate>,
    mode: SchedulingMode,
    tie_break: TieBreak,
) -> Vec<ScheduledCandidate> {
    let rank = |c: &ScheduledCandidate| match mode {
        SchedulingMode::ProviderPriority => (c.candidate.provider_priority, c.candidate.key_priority),
        SchedulingMode::GlobalKeyPriority => (0, c.candidate.key_priority),
    };

    // Key id makes the within-group base order independent of catalog order
    candidates.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.candidate.key_id.cmp(&b.candidate.key_id))
    });

    let mut ordered = Vec::with_capacity(candidates.len());
    let mut start = 0;
    while start < candidates.len() {
        let group_rank = rank(&candidates[start]);
        let end = candidates[start..]
            .iter()
            .position(|c| rank(c) != group_rank)
            .map(|p| start + p)
            .unwrap_or(candidates.len());

        let group = &mut candidates[start..end];
        let offset = tie_break.offset(group.len());
        group.rotate_left(offset);
        ordered.extend_from_slice(group);

        start = end;
    }
    ordered
}
