//! HTTP gateway
//!
//! Thin adapter over the core: routing, JSON extraction, API-key auth, and
//! the error-category-to-status mapping. No business rules live here.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod handlers;
pub mod state;
pub mod types;

pub use state::AppState;

use crate::errors::LedgerError;
use crate::resilience::{FallbackConfig, FallbackStrategy};

pub fn router(state: AppState) -> Router {
    register_fallbacks(&state);

    Router::new()
        // Users / auth
        .route("/api/users", post(handlers::users::register)
            .get(handlers::users::me)
            .put(handlers::users::update)
            .delete(handlers::users::delete))
        .route("/api/login", post(handlers::users::login))
        .route("/api/users/api-key", post(handlers::users::regenerate_api_key))
        // Balances
        .route("/api/balances/initialize", post(handlers::balances::initialize))
        .route("/api/balances", get(handlers::balances::get))
        .route("/api/balances/history", get(handlers::balances::history))
        .route("/api/balances/replay", post(handlers::balances::replay))
        .route("/api/balances/rebuild", post(handlers::balances::rebuild))
        // Transactions
        .route("/api/transactions/deposit", post(handlers::transactions::deposit))
        .route("/api/transactions/withdraw", post(handlers::transactions::withdraw))
        .route("/api/transactions/transfer", post(handlers::transactions::transfer))
        .route("/api/transactions/batch", post(handlers::transactions::batch))
        .route("/api/transactions", get(handlers::transactions::list))
        .route("/api/user-transactions", get(handlers::transactions::user_transactions))
        .route("/api/transactions/stats", get(handlers::transactions::stats))
        .route("/api/transactions/rollback", post(handlers::transactions::rollback))
        // Audit
        .route("/api/audit-logs", get(handlers::audit::list))
        .route("/api/entity-logs", get(handlers::audit::by_entity))
        // Health
        .route("/health", get(handlers::health::health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Recovery paths the gateway relies on.
fn register_fallbacks(state: &AppState) {
    let db = state.db.clone();
    let mut config = FallbackConfig::new(
        "db-health",
        FallbackStrategy::Degraded,
        Arc::new(move || {
            let db = db.clone();
            Box::pin(async move {
                db.execute_with_breaker(|| async {
                    sqlx::query("SELECT 1")
                        .execute(db.write_pool())
                        .await
                        .map_err(LedgerError::from)?;
                    Ok(serde_json::json!({ "status": "ok" }))
                })
                .await
            })
        }),
    );
    config.degraded = Some(Arc::new(|| {
        Box::pin(async { Ok(serde_json::json!({ "status": "degraded" })) })
    }));
    state.fallback.register(config);
}
