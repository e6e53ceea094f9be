//! Process-wide routing settings
//!
//! The scheduling mode is read on every dispatch through the
//! [`SchedulingModeSource`] seam instead of a global, so tests and alternative
//! stores can inject their own.

use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

/// Candidate ordering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Provider priority first, then key priority within the provider
    #[default]
    ProviderPriority,
    /// Key priority only, across providers
    GlobalKeyPriority,
}

impl SchedulingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulingMode::ProviderPriority => "provider_priority",
            SchedulingMode::GlobalKeyPriority => "global_key_priority",
        }
    }
}

impl FromStr for SchedulingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "provider_priority" => Ok(SchedulingMode::ProviderPriority),
            "global_key_priority" => Ok(SchedulingMode::GlobalKeyPriority),
            other => Err(format!("unknown scheduling mode: {}", other)),
        }
    }
}

/// Supplies the scheduling mode at dispatch time
pub trait SchedulingModeSource: Send + Sync {
    fn scheduling_mode(&self) -> SchedulingMode;
}

/// In-memory, admin-changeable routing settings
pub struct RoutingSettings {
    mode: RwLock<SchedulingMode>,
}

impl RoutingSettings {
    pub fn new(mode: SchedulingMode) -> Self {
        Self {
            mode: RwLock::new(mode),
        }
    }

    /// Change the mode, returning the previous one
    pub fn set_scheduling_mode(&self, mode: SchedulingMode) -> SchedulingMode {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!(
                previous = previous.as_str(),
                mode = mode.as_str(),
                "Scheduling mode changed"
            );
        }
        previous
    }
}

impl SchedulingModeSource for RoutingSettings {
    fn scheduling_mode(&self) -> SchedulingMode {
        *self.mode.read()
    }
}

impl SchedulingModeSource for SchedulingMode {
    fn scheduling_mode(&self) -> SchedulingMode {
        *self
    }
}
