//! KYC document HTTP handlers
//!
//! Owner endpoints upload and read their document. Reviewer endpoints are
//! admin only and go through the authorization facade.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::Engine;
use uuid::Uuid;

use super::{ApiJson, AuthenticatedUser};
use crate::authz::{Action, Principal};
use crate::error::ApiError;
use crate::kyc::{
    DocumentImageResponse, ImageSide, KycDocument, PendingCountResponse, RejectDocumentRequest,
    SubmitDocumentRequest, VerificationChecks, VerifyDocumentRequest,
};
use crate::state::AppState;

async fn reviewer(state: &AppState, principal: Principal) -> Result<Principal, ApiError> {
    state.authz.authorize(&principal, Action::ReviewKyc).await?;
    Ok(principal)
}

/// POST /api/kyc/documents - Upload or resubmit the caller's document
pub async fn submit_document(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    ApiJson(req): ApiJson<SubmitDocumentRequest>,
) -> Result<(StatusCode, Json<KycDocument>), ApiError> {
    let document = state
        .verification_service
        .submit(principal.identity_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// GET /api/kyc/documents/me - The caller's latest document
pub async fn my_document(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<KycDocument>, ApiError> {
    let document = state
        .verification_service
        .my_document(principal.identity_id)
        .await?;
    Ok(Json(document))
}

/// GET /api/admin/kyc/pending-count
pub async fn pending_count(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
) -> Result<Json<PendingCountResponse>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let pending = state
        .verification_service
        .pending_count(admin.identity_id)
        .await?;
    Ok(Json(PendingCountResponse { pending }))
}

/// GET /api/admin/kyc/:id
pub async fn get_document(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<KycDocument>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let document = state
        .verification_service
        .get_for_review(admin.identity_id, document_id)
        .await?;
    Ok(Json(document))
}

/// GET /api/admin/kyc/:id/images/:side - Decrypted image, base64 encoded
pub async fn get_document_image(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path((document_id, side)): Path<(Uuid, ImageSide)>,
) -> Result<Json<DocumentImageResponse>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let bytes = state
        .verification_service
        .document_image(admin.identity_id, document_id, side)
        .await?;
    Ok(Json(DocumentImageResponse {
        document_id,
        content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
    }))
}

/// POST /api/admin/kyc/:id/review - Claim a pending document
pub async fn start_review(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> Result<Json<KycDocument>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let document = state
        .verification_service
        .start_review(admin.identity_id, document_id)
        .await?;
    Ok(Json(document))
}

/// POST /api/admin/kyc/:id/checks - Record the reviewer checklist
pub async fn record_checks(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    ApiJson(checks): ApiJson<VerificationChecks>,
) -> Result<Json<KycDocument>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let document = state
        .verification_service
        .record_checks(admin.identity_id, document_id, checks)
        .await?;
    Ok(Json(document))
}

/// POST /api/admin/kyc/:id/verify
pub async fn verify_document(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    body: Option<Json<VerifyDocumentRequest>>,
) -> Result<Json<KycDocument>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let document = state
        .verification_service
        .verify(admin.identity_id, document_id, req.notes)
        .await?;
    Ok(Json(document))
}

/// POST /api/admin/kyc/:id/reject
pub async fn reject_document(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    ApiJson(req): ApiJson<RejectDocumentRequest>,
) -> Result<Json<KycDocument>, ApiError> {
    let admin = reviewer(&state, principal).await?;
    let document = state
        .verification_service
        .reject(admin.identity_id, document_id, req.reason, req.notes)
        .await?;
    Ok(Json(document))
}
