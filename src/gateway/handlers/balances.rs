//! Balance handlers

use axum::{
    Extension,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::gateway::auth::AuthenticatedUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiResult, ok};
use crate::models::{Balance, BalanceHistory};

/// POST /api/balances/initialize
pub async fn initialize(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Balance> {
    state.kernel.initialize_balance(auth.user_id).await?;
    let balance = state.kernel.get_balance(auth.user_id).await?;
    ok(balance)
}

/// GET /api/balances
pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Balance> {
    let balance = state.kernel.get_balance(auth.user_id).await?;
    ok(balance)
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/balances/history
pub async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<BalanceHistory>> {
    let history = state
        .kernel
        .get_balance_history(auth.user_id, query.limit, query.offset)
        .await?;
    ok(history)
}

/// POST /api/balances/replay
pub async fn replay(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<usize> {
    let applied = state.replay.replay_balance_events(auth.user_id).await?;
    ok(applied)
}

/// POST /api/balances/rebuild
pub async fn rebuild(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Option<Balance>> {
    let balance = state.replay.rebuild_balance_state(auth.user_id).await?;
    ok(balance)
}
