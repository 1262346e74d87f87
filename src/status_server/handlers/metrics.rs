//! Prometheus metrics handler.

use std::fmt::Write;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use strum::IntoEnumIterator;

use super::super::types::StatusState;
use crate::error_handling::ErrorKind;
use crate::health::HealthStatus;

/// Prometheus-compatible metrics endpoint
pub async fn metrics_handler(State(state): State<StatusState>) -> Response {
    let stats = state.db.stats();
    let occupancy = state.db.pool_status().await;
    let health = state.db.health_state().await;

    let mut metrics = format!(
        r#"# HELP pg_resilience_executions_total Number of execute calls
# TYPE pg_resilience_executions_total counter
pg_resilience_executions_total {}

# HELP pg_resilience_successes_total Number of execute calls that returned rows
# TYPE pg_resilience_successes_total counter
pg_resilience_successes_total {}

# HELP pg_resilience_retries_total Number of retried attempts
# TYPE pg_resilience_retries_total counter
pg_resilience_retries_total {}

# HELP pg_resilience_slow_queries_total Executions slower than the slow-query threshold
# TYPE pg_resilience_slow_queries_total counter
pg_resilience_slow_queries_total {}

# HELP pg_resilience_average_latency_ms Mean latency of successful executions
# TYPE pg_resilience_average_latency_ms gauge
pg_resilience_average_latency_ms {}

# HELP pg_resilience_probe_failures_total Failed background liveness probes
# TYPE pg_resilience_probe_failures_total counter
pg_resilience_probe_failures_total {}

# HELP pg_resilience_pool_resets_total Pool reset attempts by outcome
# TYPE pg_resilience_pool_resets_total counter
pg_resilience_pool_resets_total{{outcome="succeeded"}} {}
pg_resilience_pool_resets_total{{outcome="failed"}} {}

# HELP pg_resilience_consecutive_probe_failures Current run of failed probes
# TYPE pg_resilience_consecutive_probe_failures gauge
pg_resilience_consecutive_probe_failures {}

# HELP pg_resilience_healthy 1 when the last background probe succeeded
# TYPE pg_resilience_healthy gauge
pg_resilience_healthy {}

# HELP pg_resilience_pool_connections Pool connections by state
# TYPE pg_resilience_pool_connections gauge
pg_resilience_pool_connections{{state="idle"}} {}
pg_resilience_pool_connections{{state="active"}} {}
pg_resilience_pool_connections{{state="waiting"}} {}
pg_resilience_pool_connections{{state="max"}} {}

# HELP pg_resilience_failures_total Failed attempts by error kind
# TYPE pg_resilience_failures_total counter
"#,
        stats.executions(),
        stats.successes(),
        stats.retries(),
        stats.slow_queries(),
        stats.average_latency_ms(),
        stats.probes_failed(),
        stats.resets_succeeded(),
        stats.resets_failed(),
        health.consecutive_failures,
        u8::from(health.status == HealthStatus::Healthy),
        occupancy.idle,
        occupancy.active,
        occupancy.waiting,
        occupancy.max,
    );

    for kind in ErrorKind::iter() {
        let _ = writeln!(
            metrics,
            "pg_resilience_failures_total{{kind=\"{}\"}} {}",
            kind.label(),
            stats.failure_count(kind)
        );
    }

    (StatusCode::OK, metrics).into_response()
}
