//! API-key authentication middleware
//!
//! Resolves the caller from the `X-API-Key` header and attaches an
//! [`AuthenticatedUser`] extension. Registration, login, and the health
//! probe are the only unauthenticated routes.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::state::AppState;
use super::types::ApiError;
use crate::core_types::UserId;
use crate::models::Role;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role != Role::Admin {
            return Err(ApiError::forbidden("admin role required"));
        }
        Ok(())
    }
}

fn is_public(method: &Method, path: &str) -> bool {
    (*method == Method::POST && (path == "/api/users" || path == "/api/login"))
        || (*method == Method::GET && path == "/health")
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if is_public(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let Some(api_key) = api_key else {
        return ApiError::unauthorized("missing API key").into_response();
    };

    match state.users.get_by_api_key(&api_key).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(AuthenticatedUser {
                user_id: user.id,
                role: user.role,
            });
            next.run(request).await
        }
        Ok(None) => ApiError::unauthorized("invalid API key").into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}
