//! Payment webhook routes

use std::sync::Arc;

use axum::{routing::post, Router};

use crate::handlers::payments;
use crate::middleware::require_webhook_secret;
use crate::state::AppState;

/// Gateway callbacks, guarded by the shared secret when one is configured
pub fn payment_routes(webhook_secret: Option<Arc<str>>) -> Router<AppState> {
    Router::new()
        .route(
            "/api/payments/callback/collection",
            post(payments::collection_callback),
        )
        .route("/api/payments/callback/payout", post(payments::payout_callback))
        .route_layer(axum::middleware::from_fn_with_state(
            webhook_secret,
            require_webhook_secret,
        ))
}
