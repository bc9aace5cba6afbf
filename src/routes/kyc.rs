//! KYC routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::kyc;
use crate::state::AppState;

pub fn kyc_routes() -> Router<AppState> {
    Router::new()
        .route("/api/kyc/documents", post(kyc::submit_document))
        .route("/api/kyc/documents/me", get(kyc::my_document))
        .route("/api/admin/kyc/pending-count", get(kyc::pending_count))
        .route("/api/admin/kyc/:id", get(kyc::get_document))
        .route("/api/admin/kyc/:id/images/:side", get(kyc::get_document_image))
        .route("/api/admin/kyc/:id/review", post(kyc::start_review))
        .route("/api/admin/kyc/:id/checks", post(kyc::record_checks))
        .route("/api/admin/kyc/:id/verify", post(kyc::verify_document))
        .route("/api/admin/kyc/:id/reject", post(kyc::reject_document))
}
