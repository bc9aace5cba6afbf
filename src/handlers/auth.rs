//! Authentication HTTP handlers
//!
//! Endpoints for phone + OTP registration and login, token refresh and
//! logout.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use super::{ApiJson, AuthenticatedUser};
use crate::error::ApiError;
use crate::models::{
    AuthTokensResponse, LoginVerifyRequest, LogoutRequest, MeResponse, NationalIdAuditResponse,
    OtpIssuedResponse, PhoneRequest, RefreshTokenRequest, RefreshTokenResponse,
    RegisterCompleteRequest,
};
use crate::state::AppState;

/// POST /api/auth/register/init - Send a registration OTP
pub async fn register_init(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PhoneRequest>,
) -> Result<Json<OtpIssuedResponse>, ApiError> {
    req.validate()?;
    let issued = state.auth_service.register_init(&req.phone).await?;
    Ok(Json(issued))
}

/// POST /api/auth/register/complete - Create the identity and sign in
pub async fn register_complete(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterCompleteRequest>,
) -> Result<(StatusCode, Json<AuthTokensResponse>), ApiError> {
    req.validate()?;
    let tokens = state.auth_service.register_complete(req).await?;
    Ok((StatusCode::CREATED, Json(tokens)))
}

/// POST /api/auth/login/init - Send a login OTP
pub async fn login_init(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PhoneRequest>,
) -> Result<Json<OtpIssuedResponse>, ApiError> {
    req.validate()?;
    let issued = state.auth_service.login_init(&req.phone).await?;
    Ok(Json(issued))
}

/// POST /api/auth/login/verify - Exchange a login OTP for tokens
pub async fn login_verify(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginVerifyRequest>,
) -> Result<Json<AuthTokensResponse>, ApiError> {
    req.validate()?;
    let tokens = state.auth_service.login_verify(&req.phone, &req.otp).await?;
    Ok(Json(tokens))
}

/// POST /api/auth/refresh - Rotate a refresh token
pub async fn refresh_token(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, ApiError> {
    let tokens = state.auth_service.refresh(&req.refresh_token).await?;
    Ok(Json(tokens))
}

/// POST /api/auth/logout - Revoke the access token and, if given, the
/// refresh token
pub async fn logout(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    body: Option<Json<LogoutRequest>>,
) -> Result<StatusCode, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    state
        .auth_service
        .logout(&principal.access_token, req.refresh_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me - Current identity, profile and transact gate
pub async fn get_current_user(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<MeResponse>, ApiError> {
    let me = state.auth_service.me(principal.identity_id).await?;
    Ok(Json(me))
}

/// GET /api/admin/identities/:id/national-id - Decrypt a national ID for audit
pub async fn national_id_audit(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(identity_id): Path<Uuid>,
) -> Result<Json<NationalIdAuditResponse>, ApiError> {
    let national_id = state
        .auth_service
        .national_id_for_audit(principal.identity_id, identity_id)
        .await?;
    Ok(Json(NationalIdAuditResponse {
        identity_id,
        national_id,
    }))
}
