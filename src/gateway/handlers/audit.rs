//! Audit log handlers (admin)

use axum::{
    Extension,
    extract::{Query, State},
};
use serde::Deserialize;

use crate::gateway::auth::AuthenticatedUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, ok};
use crate::models::{AuditLog, EntityType};

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

/// GET /api/audit-logs
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<AuditLog>> {
    auth.require_admin()?;
    let logs = state.audit.list(query.limit, query.offset).await?;
    ok(logs)
}

#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    pub entity_type: String,
    pub entity_id: i64,
}

/// GET /api/entity-logs
pub async fn by_entity(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Query(query): Query<EntityQuery>,
) -> ApiResult<Vec<AuditLog>> {
    auth.require_admin()?;

    let entity_type = EntityType::from_str(&query.entity_type)
        .ok_or_else(|| ApiError::bad_request("entity_type must be user, balance or transaction"))?;

    let logs = state
        .audit
        .list_by_entity(entity_type, query.entity_id)
        .await?;
    ok(logs)
}
