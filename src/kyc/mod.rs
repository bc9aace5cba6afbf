//! KYC verification domain module
//!
//! Document models and the review workflow that drives `can_transact`.

mod model;
mod service;

pub use model::*;
pub use service::{KycError, VerificationService, MAX_IMAGE_BYTES};
