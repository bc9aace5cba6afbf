//! Request tracing middleware

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

use super::rate_limiter::client_ip;

/// Log every request with its outcome and latency. Each request runs inside
/// a span carrying a request id, which is echoed in `x-request-id`.
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(request.headers());
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = std::time::Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    span.in_scope(|| {
        if response.status().is_server_error() {
            tracing::error!(status, duration_ms, client = %client, "Request failed");
        } else if response.status().is_client_error() {
            tracing::warn!(status, duration_ms, client = %client, "Request rejected");
        } else {
            tracing::info!(status, duration_ms, client = %client, "Request completed");
        }
    });

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
