use chrono::{DateTime, Utc};
use serde::Serialize;

/// Liveness verdict of the background monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State written only by the monitor's probe loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub status: HealthStatus,
}

/// Published by the monitor on every state change worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HealthEvent {
    ProbeFailed {
        consecutive_failures: u32,
        error: String,
    },
    Recovered {
        after_failures: u32,
    },
    ResetSucceeded {
        generation: u64,
    },
    ResetFailed {
        error: String,
    },
}
