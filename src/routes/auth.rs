//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::auth;
use crate::state::AppState;

/// Create authentication routes
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/register/init", post(auth::register_init))
        .route("/api/auth/register/complete", post(auth::register_complete))
        .route("/api/auth/login/init", post(auth::login_init))
        .route("/api/auth/login/verify", post(auth::login_verify))
        .route("/api/auth/refresh", post(auth::refresh_token))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::get_current_user))
        .route(
            "/api/admin/identities/:id/national-id",
            get(auth::national_id_audit),
        )
}
