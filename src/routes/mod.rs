//! Route definitions for the AgriConnect API

mod auth;
mod kyc;
mod orders;
mod payments;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::health::health_check;
use crate::middleware::{rate_limit, request_tracing, security_headers, RateLimiter};
use crate::state::AppState;

pub use auth::auth_routes;
pub use kyc::kyc_routes;
pub use orders::order_routes;
pub use payments::payment_routes;

/// HTTP-layer settings for [`app_router`]
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    pub webhook_secret: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub hsts: bool,
}

/// Assemble every route with the middleware stack
pub fn app_router(state: AppState, rate_limiter: RateLimiter, options: &HttpOptions) -> Router {
    let webhook_secret = options.webhook_secret.as_deref().map(Arc::<str>::from);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(auth_routes())
        .merge(kyc_routes())
        .merge(order_routes())
        .merge(payment_routes(webhook_secret))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(configure_cors(options.cors_allowed_origins.as_deref()))
                .layer(axum::middleware::from_fn(request_tracing))
                .layer(axum::middleware::from_fn_with_state(rate_limiter, rate_limit))
                .layer(axum::middleware::from_fn_with_state(options.hsts, security_headers)),
        )
}

async fn root() -> &'static str {
    "AgriConnect API Server"
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.trim().is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}
