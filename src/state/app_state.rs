//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::auth::AuthService;
use crate::authz::AuthorizationFacade;
use crate::escrow::SettlementEngine;
use crate::kyc::VerificationService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub verification_service: Arc<VerificationService>,
    pub settlement_engine: Arc<SettlementEngine>,
    pub authz: Arc<AuthorizationFacade>,
    /// Present when running on Postgres
    pub db: Option<PgPool>,
    pub environment: &'static str,
}

impl AppState {
    pub fn new(
        auth_service: Arc<AuthService>,
        verification_service: Arc<VerificationService>,
        settlement_engine: Arc<SettlementEngine>,
        authz: Arc<AuthorizationFacade>,
        db: Option<PgPool>,
        environment: &'static str,
    ) -> Self {
        Self {
            auth_service,
            verification_service,
            settlement_engine,
            authz,
            db,
            environment,
        }
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.auth_service.clone()
    }
}

impl FromRef<AppState> for Arc<VerificationService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.verification_service.clone()
    }
}

impl FromRef<AppState> for Arc<SettlementEngine> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.settlement_engine.clone()
    }
}

impl FromRef<AppState> for Arc<AuthorizationFacade> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.authz.clone()
    }
}
