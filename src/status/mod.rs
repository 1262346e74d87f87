//! Read-only health reporting.
//!
//! Nothing here writes [`crate::health::HealthState`]; the reporter only reads
//! the monitor's latest view next to its own fresh probe.

mod types;

pub use types::{DatabaseDetails, HealthSnapshot, ProbeStatus, TableStats};

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::warn;

use crate::config::LIVENESS_QUERY;
use crate::error_handling::DbError;
use crate::executor::QueryExecutor;
use crate::health::HealthMonitor;
use crate::storage::{QueryResult, SqlValue};

const SERVER_FACTS_QUERY: &str = "SELECT now() AS now, version() AS version, \
     current_database()::text AS current_database, current_user::text AS current_user, \
     pg_database_size(current_database()) AS db_size";

const LARGEST_TABLES_QUERY: &str = "SELECT schemaname::text AS schemaname, relname::text AS relname, \
     n_live_tup FROM pg_stat_user_tables ORDER BY n_live_tup DESC LIMIT 5";

/// Builds [`HealthSnapshot`]s and [`DatabaseDetails`].
#[derive(Clone)]
pub struct StatusReporter {
    executor: QueryExecutor,
    monitor: Arc<HealthMonitor>,
}

impl StatusReporter {
    pub fn new(executor: QueryExecutor, monitor: Arc<HealthMonitor>) -> Self {
        StatusReporter { executor, monitor }
    }

    /// Probes the current pool once, without retries, and reports the result
    /// together with occupancy and the monitor's state.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let coordinator = self.executor.coordinator();
        let context = coordinator.config().context;
        let handle = coordinator.current().await;

        let started = Instant::now();
        let outcome = handle.query(LIVENESS_QUERY, &[]).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, error) = match outcome {
            Ok(_) => (ProbeStatus::Healthy, None),
            Err(e) => {
                warn!("Health snapshot probe failed: {}", e);
                (ProbeStatus::Unhealthy, Some(e.to_string()))
            }
        };

        HealthSnapshot {
            status,
            latency_ms,
            occupancy: handle.occupancy(),
            environment: context.environment(),
            connection_type: context,
            monitor: self.monitor.state().await,
            pool_generation: coordinator.generation(),
            timestamp: Utc::now(),
            error,
        }
    }

    /// Reads server facts and the five largest tables through the retrying
    /// executor. Failures are reported in the returned value.
    pub async fn database_details(&self) -> DatabaseDetails {
        let context = self.executor.coordinator().config().context;
        match self.read_details().await {
            Ok(details) => details,
            Err(e) => {
                warn!("Database details unavailable: {}", e);
                DatabaseDetails::unhealthy(context, e.to_string(), e.code().map(str::to_string))
            }
        }
    }

    async fn read_details(&self) -> Result<DatabaseDetails, DbError> {
        let context = self.executor.coordinator().config().context;
        let facts = self.executor.execute(SERVER_FACTS_QUERY, &[]).await?;
        let tables = self.executor.execute(LARGEST_TABLES_QUERY, &[]).await?;

        let row = facts
            .first()
            .ok_or_else(|| DbError::schema("server facts query returned no rows"))?;
        let text = |column: &str| row.get(column).and_then(SqlValue::as_str).map(str::to_string);

        Ok(DatabaseDetails {
            status: ProbeStatus::Healthy,
            timestamp: match row.get("now") {
                Some(SqlValue::Timestamp(ts)) => *ts,
                _ => Utc::now(),
            },
            environment: context.environment(),
            connection_type: context,
            database: text("current_database"),
            user: text("current_user"),
            version: text("version").and_then(|v| v.split(' ').next().map(str::to_string)),
            size_mb: row
                .get("db_size")
                .and_then(SqlValue::as_i64)
                .map(bytes_to_mb),
            tables: table_stats(&tables),
            error: None,
            code: None,
        })
    }
}

fn bytes_to_mb(bytes: i64) -> i64 {
    (bytes as f64 / 1024.0 / 1024.0).round() as i64
}

fn table_stats(result: &QueryResult) -> Vec<TableStats> {
    result
        .rows
        .iter()
        .map(|row| TableStats {
            schema: row
                .get("schemaname")
                .and_then(SqlValue::as_str)
                .unwrap_or_default()
                .to_string(),
            name: row
                .get("relname")
                .and_then(SqlValue::as_str)
                .unwrap_or_default()
                .to_string(),
            rows: row.get("n_live_tup").and_then(SqlValue::as_i64).unwrap_or(0),
        })
        .collect()
}
