//! API response types and error mapping
//!
//! All responses share one wrapper. `ApiError` translates the core error
//! taxonomy to transport statuses in one place; handlers never format
//! transport errors themselves.

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::errors::LedgerError;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error
/// - msg: short message
/// - data: payload (success only)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }
}

/// Handler return type.
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

#[inline]
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

#[inline]
pub fn accepted<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(data))))
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub category: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, category: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            category,
            message: message.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", msg)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::InvalidAmount | LedgerError::InvalidTransaction(_) => {
                StatusCode::BAD_REQUEST
            }
            LedgerError::BalanceNotFound(_)
            | LedgerError::TransactionNotFound(_)
            | LedgerError::UserNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::ConcurrentModification { .. } | LedgerError::NotEligibleForRollback(_) => {
                StatusCode::CONFLICT
            }
            // Backpressure and resilience rejections are retryable.
            LedgerError::Overloaded
            | LedgerError::CircuitBreakerOpen
            | LedgerError::TooManyRequests => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::CompensationFailed(_)
            | LedgerError::Storage(_)
            | LedgerError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            status,
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16() as i32,
            msg: format!("{}: {}", self.category, self.message),
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            ApiError::from(LedgerError::InvalidAmount).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(LedgerError::InsufficientFunds).status,
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(LedgerError::Overloaded).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LedgerError::NotEligibleForRollback(1)).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(LedgerError::BalanceNotFound(1)).status,
            StatusCode::NOT_FOUND
        );
    }
}
