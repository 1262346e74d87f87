//! Snapshot data structures.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::DeploymentContext;
use crate::health::HealthState;
use crate::storage::PoolOccupancy;

/// Outcome of a fresh liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Unhealthy,
}

impl ProbeStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeStatus::Healthy)
    }
}

/// Point-in-time view for health-check endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: ProbeStatus,
    /// Round trip of the probe, successful or not.
    pub latency_ms: f64,
    pub occupancy: PoolOccupancy,
    /// `railway` or `development`.
    pub environment: &'static str,
    pub connection_type: DeploymentContext,
    /// Background monitor's view, as of its last probe.
    pub monitor: HealthState,
    /// Number of pool resets since startup.
    pub pool_generation: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub schema: String,
    pub name: String,
    pub rows: i64,
}

/// Server facts and the largest tables, or the error that prevented reading them.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseDetails {
    pub status: ProbeStatus,
    pub timestamp: DateTime<Utc>,
    pub environment: &'static str,
    pub connection_type: DeploymentContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// First word of `version()`, e.g. `PostgreSQL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_mb: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl DatabaseDetails {
    pub(crate) fn unhealthy(
        context: DeploymentContext,
        error: String,
        code: Option<String>,
    ) -> Self {
        DatabaseDetails {
            status: ProbeStatus::Unhealthy,
            timestamp: Utc::now(),
            environment: context.environment(),
            connection_type: context,
            database: None,
            user: None,
            version: None,
            size_mb: None,
            tables: Vec::new(),
            error: Some(error),
            code,
        }
    }
}
