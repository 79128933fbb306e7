//! Transaction handlers

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core_types::{TransactionId, UserId};
use crate::gateway::auth::AuthenticatedUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, accepted, ok};
use crate::models::{Transaction, TransactionStats, TransactionType};
use crate::persistence::NewTransaction;

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Decimal,
    pub description: Option<String>,
}

/// POST /api/transactions/deposit
///
/// Returns 202: the transaction is pending and settles asynchronously.
pub async fn deposit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    let tx = state
        .engine
        .deposit_funds(auth.user_id, req.amount, req.description)
        .await?;
    accepted(tx)
}

/// POST /api/transactions/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Transaction> {
    let tx = state
        .engine
        .withdraw_funds(auth.user_id, req.amount, req.description)
        .await?;
    accepted(tx)
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub to_user_id: UserId,
    pub amount: Decimal,
    pub description: Option<String>,
}

/// POST /api/transactions/transfer
pub async fn transfer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<TransferRequest>,
) -> ApiResult<Transaction> {
    let tx = state
        .engine
        .transfer_funds(auth.user_id, req.to_user_id, req.amount, req.description)
        .await?;
    accepted(tx)
}

#[derive(Debug, Deserialize)]
pub struct BatchItem {
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub from_user_id: Option<UserId>,
    pub to_user_id: Option<UserId>,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub transactions: Vec<BatchItem>,
}

#[derive(Debug, serde::Serialize)]
pub struct BatchResponse {
    pub processed: usize,
    pub failed: usize,
}

/// POST /api/transactions/batch
///
/// Non-admin callers may only move funds out of their own account.
pub async fn batch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<BatchResponse> {
    let is_admin = auth.require_admin().is_ok();
    let mut items = Vec::with_capacity(req.transactions.len());
    for item in req.transactions {
        if !is_admin
            && item.from_user_id.is_some()
            && item.from_user_id != Some(auth.user_id)
        {
            return Err(ApiError::forbidden(
                "batch items may only debit the calling account",
            ));
        }
        items.push(NewTransaction {
            from_user_id: item.from_user_id,
            to_user_id: item.to_user_id,
            amount: item.amount,
            tx_type: item.tx_type,
            description: item.description,
        });
    }

    let (processed, failed) = state.engine.process_batch(items).await;
    ok(BatchResponse { processed, failed })
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/transactions (admin)
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<Transaction>> {
    auth.require_admin()?;
    let transactions = state.engine.list_transactions(query.limit, query.offset).await?;
    ok(transactions)
}

/// GET /api/user-transactions
pub async fn user_transactions(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<Vec<Transaction>> {
    let transactions = state.engine.get_user_transactions(auth.user_id).await?;
    ok(transactions)
}

/// GET /api/transactions/stats (admin)
pub async fn stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<TransactionStats> {
    auth.require_admin()?;
    ok(state.engine.worker_pool_stats())
}

#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    pub id: TransactionId,
}

/// POST /api/transactions/rollback?id= (admin)
pub async fn rollback(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<RollbackQuery>,
) -> ApiResult<Transaction> {
    auth.require_admin()?;
    state.engine.rollback_transaction(query.id).await?;
    let tx = state.engine.get_transaction(query.id).await?;
    ok(tx)
}
