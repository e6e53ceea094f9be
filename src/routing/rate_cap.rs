//! Per-key requests-per-minute caps
//!
//! Enforced at admission alongside the concurrency ceiling: an exhausted
//! key is skipped immediately, never waited on.

use std::num::NonZeroU32;
use std::sync::Arc;

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;

use crate::catalog::Key;

/// Admission rejected: the key used up its per-minute budget
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("key {key_id} exceeded {per_minute} requests per minute")]
pub struct RateCapped {
    pub key_id: String,
    pub per_minute: u32,
}

struct CapLimiter {
    per_minute: u32,
    limiter: Arc<DefaultDirectRateLimiter>,
}

/// Token-bucket limiters keyed by key id
///
/// Limiters are created on first use and rebuilt if the key's cap changes
/// in the catalog.
#[derive(Default)]
pub struct KeyRateCaps {
    limiters: DashMap<String, CapLimiter>,
}

impl KeyRateCaps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one request from the key's budget
    pub fn check(&self, key: &Key) -> Result<(), RateCapped> {
        let Some(per_minute) = key.rate_limit_per_minute.and_then(NonZeroU32::new) else {
            return Ok(());
        };

        let limiter = {
            let mut entry = self
                .limiters
                .entry(key.id.clone())
                .or_insert_with(|| new_limiter(per_minute));
            if entry.per_minute != per_minute.get() {
                *entry = new_limiter(per_minute);
            }
            entry.limiter.clone()
        };

        limiter.check().map_err(|_| RateCapped {
            key_id: key.id.clone(),
            per_minute: per_minute.get(),
        })
    }
}

fn new_limiter(per_minute: NonZeroU32) -> CapLimiter {
    CapLimiter {
        per_minute: per_minute.get(),
        limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
    }
}
