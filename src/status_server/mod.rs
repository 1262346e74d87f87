//! HTTP status server for health checks.
//!
//! Provides three endpoints:
//! - `/health` - fresh liveness snapshot (503 when the probe fails)
//! - `/health/details` - server facts and the largest tables
//! - `/metrics` - Prometheus-compatible metrics
//!
//! The server runs in the background and never touches query traffic.

mod handlers;
mod types;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::error_handling::InitializationError;
use handlers::{details_handler, health_handler, metrics_handler};
pub use types::StatusState;

/// Routes of the status server.
pub fn router(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/details", get(details_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serves the status routes on `addr` until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns `InitializationError::StatusServerError` when the address cannot be
/// bound or the server fails.
pub async fn start_status_server(
    addr: SocketAddr,
    state: StatusState,
    shutdown: CancellationToken,
) -> Result<(), InitializationError> {
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        InitializationError::StatusServerError(format!(
            "Failed to bind status server to {}: {}",
            addr, e
        ))
    })?;

    log::info!("Status server listening on http://{}/", addr);
    log::info!("  - Health: http://{}/health", addr);
    log::info!("  - Metrics: http://{}/metrics", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| InitializationError::StatusServerError(e.to_string()))?;

    log::info!("Status server stopped");
    Ok(())
}
