//! Shared-secret check for gateway callbacks

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::auth::constant_time_eq;

/// Header carrying the webhook secret
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Reject callbacks whose secret header does not match. With no secret
/// configured every callback is accepted.
pub async fn require_webhook_secret(
    State(secret): State<Option<Arc<str>>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = secret.as_deref() {
        let presented = request
            .headers()
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();

        if !constant_time_eq(presented, expected) {
            tracing::warn!(path = %request.uri().path(), "Webhook rejected: bad secret");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({
                    "error": { "code": "UNAUTHORIZED", "message": "Invalid webhook secret" }
                })),
            )
                .into_response();
        }
    }

    next.run(request).await
}
