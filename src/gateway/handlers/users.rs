//! User account handlers

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::core_types::UserId;
use crate::gateway::auth::AuthenticatedUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, ok};
use crate::models::Role;
use crate::users::UserUpdate;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub api_key: Option<String>,
}

/// POST /api/users
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<AuthResponse> {
    if req.username.is_empty() || req.email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("username, email and password are required"));
    }

    let user = state
        .users
        .create_user(&req.username, &req.email, &req.password, Role::User)
        .await?;

    ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        api_key: user.api_key,
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<AuthResponse> {
    let user = state
        .users
        .authenticate(&req.username, &req.password)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid username or password"))?;

    ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        api_key: user.api_key,
    })
}

#[derive(Debug, Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
}

/// POST /api/users/api-key
pub async fn regenerate_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<ApiKeyResponse> {
    let api_key = state.users.regenerate_api_key(auth.user_id).await?;
    ok(ApiKeyResponse { api_key })
}

/// GET /api/users
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<AuthResponse> {
    let user = state.users.get_user(auth.user_id).await?;
    ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        api_key: user.api_key,
    })
}

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

/// PUT /api/users
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<AuthResponse> {
    let user = state
        .users
        .update_user(
            auth.user_id,
            UserUpdate {
                username: req.username,
                email: req.email,
            },
        )
        .await?;

    ok(AuthResponse {
        user_id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
        api_key: user.api_key,
    })
}

/// DELETE /api/users
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthenticatedUser>,
) -> ApiResult<()> {
    state.users.delete_user(auth.user_id).await?;
    ok(())
}
