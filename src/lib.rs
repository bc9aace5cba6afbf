//! AgriConnect Backend Library
//!
//! This library exports the transaction-authorization core of the
//! AgriConnect marketplace: OTP sign-in, session tokens, KYC verification
//! and escrow settlement.

pub mod app;
pub mod auth;
pub mod authz;
pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod gateway;
pub mod handlers;
pub mod kyc;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
