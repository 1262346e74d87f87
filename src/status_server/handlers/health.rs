//! JSON health handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::super::types::StatusState;

/// Fresh snapshot; 503 when the probe fails so load balancers stop routing.
pub async fn health_handler(State(state): State<StatusState>) -> Response {
    let snapshot = state.db.snapshot().await;
    let code = if snapshot.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(snapshot)).into_response()
}

/// Server facts and the largest tables.
pub async fn details_handler(State(state): State<StatusState>) -> Response {
    let details = state.db.database_details().await;
    let code = if details.status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(details)).into_response()
}
