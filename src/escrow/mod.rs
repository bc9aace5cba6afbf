//! Escrow and settlement domain module
//!
//! Contains the fee split, order and escrow models, the settlement engine
//! and its background jobs.

mod financials;
mod jobs;
mod locks;
mod model;
mod service;

pub use financials::{compute_financials, FinancialsError, COMMISSION_BPS, FIXED_FEE, VAT_BPS};
pub use jobs::{escrow_release_job, kv_sweeper};
pub use locks::OrderLocks;
pub use model::*;
pub use service::{OrderView, SettlementEngine, SettlementError, SettlementPolicy};
