//! Health probe
//!
//! Runs the database ping through the registered fallback: when the store is
//! unreachable (or the breaker is open) the endpoint degrades instead of
//! failing, so load balancers can tell "degraded" from "down".

use axum::{Json, extract::State, http::StatusCode};

use crate::gateway::state::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.fallback.execute("db-health").await {
        Ok(value) => {
            let degraded = value.get("status").and_then(|s| s.as_str()) == Some("degraded");
            let status = if degraded {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::OK
            };
            (status, Json(value))
        }
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "down", "error": err.to_string() })),
        ),
    }
}
