//! AIMD (Additive Increase, Multiplicative Decrease) ceiling rule
//!
//! Borrowed from TCP congestion control: grow the concurrency ceiling by a
//! small step while the key keeps up, cut it multiplicatively on overload.

/// AIMD controller for a per-key concurrency ceiling
#[derive(Debug, Clone)]
pub struct AimdRule {
    /// Slots added per qualifying success
    pub increase_step: u32,
    /// Multiplier applied on overload (e.g. 0.5 = halve)
    pub decrease_factor: f64,
    /// Floor, at least 1
    pub min_limit: u32,
    /// Cap for learned ceilings
    pub max_limit: u32,
}

impl Default for AimdRule {
    fn default() -> Self {
        Self {
            increase_step: 1,
            decrease_factor: 0.5,
            min_limit: 1,
            max_limit: 64,
        }
    }
}

impl AimdRule {
    /// Reward: never decreases, capped at `max_limit`
    pub fn reward(&self, current: u32) -> u32 {
        if current >= self.max_limit {
            return current;
        }
        current.saturating_add(self.increase_step).min(self.max_limit)
    }

    /// Penalize: strictly lower unless already at the floor
    pub fn penalize(&self, current: u32) -> u32 {
        let floor = self.min_limit.max(1);
        let mut next = (current as f64 * self.decrease_factor).floor() as u32;
        if next >= current {
            next = current.saturating_sub(1);
        }
        next.max(floor)
    }
}
