//! Authentication middleware
//!
//! Extractors that resolve the bearer access token to a [`Principal`].

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use std::sync::Arc;

use crate::authz::{AuthorizationFacade, AuthzError, Principal};

/// Authenticated caller extracted from the access token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Principal);

/// Error response for authentication failures
#[derive(Debug, Serialize)]
struct AuthError {
    #[serde(skip)]
    status: StatusCode,
    error: AuthErrorDetails,
}

#[derive(Debug, Serialize)]
struct AuthErrorDetails {
    code: String,
    message: String,
}

impl AuthError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            error: AuthErrorDetails {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<AuthzError> for AuthError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Revoked => {
                AuthError::new(StatusCode::UNAUTHORIZED, "SESSION_REVOKED", "Session has been revoked")
            }
            AuthzError::Unauthenticated(msg) if msg.contains("expired") => {
                AuthError::new(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "Token has expired")
            }
            AuthzError::Unauthenticated(_) => {
                AuthError::new(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid token")
            }
            AuthzError::Forbidden(msg) => AuthError::new(StatusCode::FORBIDDEN, "FORBIDDEN", &msg),
            AuthzError::CannotTransact => AuthError::new(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Identity is not cleared to transact",
            ),
            AuthzError::Store(e) => {
                tracing::error!(error = %e, "Store failure during authentication");
                AuthError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Authentication unavailable",
                )
            }
        }
    }
}

/// Extractor for authenticated users
///
/// Verifies the access token from the Authorization header, checks the
/// blacklist and loads the caller's current role.
///
/// # Example
///
/// ```rust,ignore
/// async fn protected_handler(AuthenticatedUser(principal): AuthenticatedUser) -> impl IntoResponse {
///     format!("Hello, {}", principal.identity_id)
/// }
/// ```
#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<AuthorizationFacade>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AuthError::new(
                        StatusCode::UNAUTHORIZED,
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                    .into_response()
                })?;

        let facade = Arc::<AuthorizationFacade>::from_ref(state);
        let principal = facade
            .authenticate(bearer.token())
            .await
            .map_err(|e| AuthError::from(e).into_response())?;

        Ok(AuthenticatedUser(principal))
    }
}
