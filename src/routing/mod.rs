//! Routing and admission control
//!
//! Candidate resolution, scheduling, per-key and per-endpoint health, adaptive
//! concurrency, and the dispatcher composing them.

pub mod aimd;
pub mod concurrency;
pub mod dispatcher;
pub mod health;
pub mod rate_cap;
pub mod resolver;
pub mod scheduler;
pub mod settings;

pub use aimd::AimdRule;
pub use concurrency::{
    AdaptiveConcurrencyController, ConcurrencyConfig, ConcurrencyError, ConcurrencyExceeded,
    ConcurrencyMode, ConcurrencyPermit, ConcurrencyStats, ModeChange, ReleaseOutcome,
};
pub use dispatcher::{DispatchRequest, DispatchSuccess, Dispatcher, DispatcherComponents};
pub use health::{
    CircuitState, HealthConfig, HealthSnapshot, HealthSummary, HealthTracker, StateCounts,
    Subject, TrialClaim,
};
pub use rate_cap::{KeyRateCaps, RateCapped};
pub use resolver::{CandidateResolver, CapabilityRequirements, RequestCandidate};
pub use scheduler::{AttemptPlan, ScheduledCandidate, SchedulingPolicy, TieBreak};
pub use settings::{RoutingSettings, SchedulingMode, SchedulingModeSource};
