//! Data models for the AgriConnect backend

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::{hash_national_id, CryptoError, FieldCipher};

pub mod auth;
pub mod money;
pub use auth::*;
pub use money::Money;

/// Maximum number of refresh-token hashes retained per identity
pub const MAX_REFRESH_TOKENS: usize = 5;

/// Identity (credential record)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub phone: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub national_id_hash: String,
    #[serde(skip_serializing)]
    pub national_id_encrypted: String,
    pub role: UserRole,
    pub status: AccountStatus,
    pub kyc_status: KycStatus,
    pub kyc_rejection_reason: Option<String>,
    pub is_phone_verified: bool,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    /// SHA-256 hashes of live refresh tokens, newest last
    #[serde(skip_serializing)]
    pub refresh_tokens: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    /// Build a freshly registered identity.
    ///
    /// The national ID is hashed for the uniqueness index and sealed for
    /// audit before the record ever reaches a store; a sealing failure fails
    /// registration.
    pub fn register(
        phone: &str,
        email: &str,
        national_id: &str,
        role: UserRole,
        cipher: &FieldCipher,
    ) -> Result<Self, CryptoError> {
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            phone: phone.to_string(),
            email: email.trim().to_lowercase(),
            national_id_hash: hash_national_id(national_id),
            national_id_encrypted: cipher.encrypt(national_id.trim())?,
            role,
            status: AccountStatus::PendingVerification,
            kyc_status: KycStatus::Pending,
            kyc_rejection_reason: None,
            is_phone_verified: true,
            is_email_verified: false,
            last_login: None,
            refresh_tokens: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this identity may take part in money-moving operations
    pub fn can_transact(&self) -> bool {
        self.kyc_status == KycStatus::KycVerified
            && self.status == AccountStatus::Active
            && self.is_phone_verified
    }

    /// Append a refresh-token hash, evicting the oldest beyond the cap
    pub fn push_refresh_hash(&mut self, hash: String, cap: usize) {
        self.refresh_tokens.push(hash);
        if self.refresh_tokens.len() > cap {
            let excess = self.refresh_tokens.len() - cap;
            self.refresh_tokens.drain(..excess);
        }
    }
}

/// User roles
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Farmer,
    Buyer,
    Driver,
    Admin,
    CooperativeManager,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Farmer => "farmer",
            UserRole::Buyer => "buyer",
            UserRole::Driver => "driver",
            UserRole::Admin => "admin",
            UserRole::CooperativeManager => "cooperative_manager",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "farmer" => Ok(UserRole::Farmer),
            "buyer" => Ok(UserRole::Buyer),
            "driver" => Ok(UserRole::Driver),
            "admin" => Ok(UserRole::Admin),
            "cooperative_manager" => Ok(UserRole::CooperativeManager),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Account status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingVerification,
    Active,
    Suspended,
    Banned,
}

/// Identity-level KYC status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "kyc_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    Pending,
    Submitted,
    KycVerified,
    Rejected,
}

/// Profile owned by exactly one identity
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub identity_id: Uuid,
    pub full_names: String,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub address: Option<String>,
    pub farm_name: Option<String>,
    pub business_name: Option<String>,
    pub vehicle_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial verification update applied to an identity by the KYC workflow
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationUpdate {
    pub kyc_status: KycStatus,
    pub status: AccountStatus,
    pub kyc_rejection_reason: Option<String>,
}
