//! Middleware for the AgriConnect API
//!
//! This module provides middleware for request tracing, rate limiting,
//! security headers, webhook verification and authentication.

pub mod auth;
mod rate_limiter;
mod security;
mod tracing;
mod webhook;

pub use auth::AuthenticatedUser;
pub use rate_limiter::{client_ip, rate_limit, RateLimiter};
pub use security::security_headers;
pub use tracing::request_tracing;
pub use webhook::{require_webhook_secret, WEBHOOK_SECRET_HEADER};
