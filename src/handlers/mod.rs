//! API handlers for the AgriConnect backend

pub mod auth;
pub mod health;
mod json;
pub mod kyc;
pub mod orders;
pub mod payments;

pub use json::ApiJson;

// Re-export AuthenticatedUser from middleware for handler use
pub use crate::middleware::auth::AuthenticatedUser;
