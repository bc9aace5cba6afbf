//! Centralized API error handling for AgriConnect
//!
//! This module provides a unified error type for API responses with proper
//! HTTP status code mapping and JSON error responses.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, CryptoError, OtpError, SessionError};
use crate::authz::AuthzError;
use crate::escrow::SettlementError;
use crate::gateway::GatewayError;
use crate::kyc::KycError;
use crate::store::StoreError;

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::UnprocessableEntity(_) => "UNPROCESSABLE_ENTITY",
            ApiError::TooManyRequests => "TOO_MANY_REQUESTS",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        match &self {
            ApiError::InternalError(_)
            | ApiError::DatabaseError(_)
            | ApiError::ServiceUnavailable(_) => {
                tracing::error!(error = %message, code = %error_code, "Server error occurred");
            }
            _ => {
                tracing::debug!(error = %message, code = %error_code, "Client error occurred");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

// Convenience conversions from common error types

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::DatabaseError(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) => ApiError::UnprocessableEntity(message),
            _ => ApiError::BadRequest(message),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

// Domain error conversions

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            StoreError::Conflict(constraint) => {
                ApiError::Conflict(format!("Duplicate value ({})", constraint))
            }
            StoreError::VersionConflict => {
                ApiError::Conflict("Resource was modified concurrently".to_string())
            }
            StoreError::DuplicateEvent => {
                ApiError::Conflict("Event already recorded".to_string())
            }
            StoreError::Backend(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::ExternalServiceError(err.to_string())
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::RateLimited => ApiError::TooManyRequests,
            OtpError::NotificationFailed(e) => ApiError::ExternalServiceError(e),
            OtpError::OtpExpired | OtpError::OtpInvalid => ApiError::BadRequest(err.to_string()),
            OtpError::Store(e) => e.into(),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidToken(_) | SessionError::TokenExpired | SessionError::Revoked => {
                ApiError::Unauthorized(err.to_string())
            }
            SessionError::Forbidden(msg) => ApiError::Forbidden(msg),
            SessionError::Signing(e) => ApiError::InternalError(e),
            SessionError::Store(e) => e.into(),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AlreadyRegistered(_) => ApiError::Conflict(err.to_string()),
            AuthError::IdentityNotFound => ApiError::NotFound(err.to_string()),
            AuthError::AccountDisabled(_) => ApiError::Forbidden(err.to_string()),
            AuthError::Forbidden(msg) => ApiError::Forbidden(msg),
            AuthError::Otp(e) => e.into(),
            AuthError::Session(e) => e.into(),
            AuthError::Crypto(e) => e.into(),
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<KycError> for ApiError {
    fn from(err: KycError) -> Self {
        match err {
            KycError::DocumentNotFound | KycError::IdentityNotFound => {
                ApiError::NotFound(err.to_string())
            }
            KycError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            KycError::NotReviewer => ApiError::Forbidden(err.to_string()),
            KycError::InvalidDocument(msg) => ApiError::ValidationError(msg),
            KycError::Storage(e) => e.into(),
            KycError::Crypto(e) => e.into(),
            KycError::Store(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthenticated(msg) => ApiError::Unauthorized(msg),
            AuthzError::Revoked => ApiError::Unauthorized(err.to_string()),
            AuthzError::Forbidden(msg) => ApiError::Forbidden(msg),
            AuthzError::CannotTransact => ApiError::Forbidden(err.to_string()),
            AuthzError::Store(e) => e.into(),
        }
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        match err {
            SettlementError::OrderNotFound | SettlementError::IdentityNotFound => {
                ApiError::NotFound(err.to_string())
            }
            SettlementError::CannotTransact(_) => ApiError::Forbidden(err.to_string()),
            SettlementError::Forbidden(msg) => ApiError::Forbidden(msg),
            SettlementError::Conflict(msg) => ApiError::Conflict(msg),
            SettlementError::CollectionAlreadyInFlight | SettlementError::StaleCallback { .. } => {
                ApiError::Conflict(err.to_string())
            }
            SettlementError::Invalid(msg) => ApiError::ValidationError(msg),
            SettlementError::Gateway(e) => e.into(),
            SettlementError::Authorization(e) => e.into(),
            SettlementError::Store(e) => e.into(),
        }
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).error_code(),
            "BAD_REQUEST"
        );
        assert_eq!(
            ApiError::Unauthorized("test".to_string()).error_code(),
            "UNAUTHORIZED"
        );
        assert_eq!(ApiError::TooManyRequests.error_code(), "TOO_MANY_REQUESTS");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TooManyRequests.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_error_mapping() {
        assert_eq!(
            ApiError::from(OtpError::RateLimited).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::from(SessionError::Revoked).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthzError::CannotTransact).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(SettlementError::CollectionAlreadyInFlight).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(KycError::InvalidTransition {
                from: "verified",
                action: "reject"
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(SettlementError::Gateway(GatewayError::Timeout)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(AuthError::Store(StoreError::Backend("down".to_string())))
                .status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(AuthError::AlreadyRegistered("Phone")).status_code(),
            StatusCode::CONFLICT
        );
    }
}
