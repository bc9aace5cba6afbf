//! Persistence seams
//!
//! Services talk to storage only through these traits. `memory` backs tests
//! and local development; `postgres` is the durable implementation. The
//! key-value store carries short-lived state (OTP codes, attempt counters,
//! the access-token blacklist) and is always in-process.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use chrono::{DateTime, Utc};

use crate::escrow::{EscrowEntry, EscrowState, EventKind, LedgerEntry, Order};
use crate::kyc::{KycDocument, VerificationStatus};
use crate::models::{Identity, Profile, VerificationUpdate};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryKvStore, MemoryStore};
pub use postgres::PgStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Record was modified concurrently")]
    VersionConflict,

    #[error("Event already recorded")]
    DuplicateEvent,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref db) if db.code().as_deref() == Some("23505") => {
                StoreError::Conflict(db.constraint().unwrap_or("unique").to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Identities, their profiles and their refresh-token hashes
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert identity and profile as one unit. `Conflict` names the
    /// violated uniqueness constraint (phone, email or national ID).
    async fn create_with_profile(
        &self,
        identity: &Identity,
        profile: &Profile,
    ) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError>;

    async fn find_by_national_id_hash(&self, hash: &str)
        -> Result<Option<Identity>, StoreError>;

    async fn find_profile(&self, identity_id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Apply a KYC-driven status change and return the updated identity
    async fn update_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<Identity, StoreError>;

    async fn record_login(&self, id: Uuid) -> Result<(), StoreError>;

    /// Append a refresh-token hash, evicting the oldest beyond `cap`
    async fn push_refresh_hash(&self, id: Uuid, hash: &str, cap: usize)
        -> Result<(), StoreError>;

    /// Atomically remove `hash`; returns whether it was present
    async fn take_refresh_hash(&self, id: Uuid, hash: &str) -> Result<bool, StoreError>;
}

/// TTL key-value store with atomic primitives
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Set a value, replacing any existing one
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically read and remove a live value
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Increment a counter unless it has reached `cap`. The window starts
    /// with the first increment and is never extended. Returns the new
    /// count, or `None` when the counter is at the cap.
    async fn incr_within(
        &self,
        key: &str,
        cap: u32,
        window: Duration,
    ) -> Result<Option<u32>, StoreError>;

    /// Drop expired entries; returns how many were removed
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// KYC documents
#[async_trait]
pub trait KycStore: Send + Sync {
    /// Insert a document and apply `owner` to its identity as one unit
    async fn insert(
        &self,
        document: &KycDocument,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError>;

    /// Overwrite a document whose stored status is still `expected`, and
    /// apply `owner` to its identity in the same write. `VersionConflict`
    /// when the status moved; nothing is written then.
    async fn update(
        &self,
        document: &KycDocument,
        expected: VerificationStatus,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError>;

    async fn find(&self, id: Uuid) -> Result<Option<KycDocument>, StoreError>;

    async fn find_latest_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<KycDocument>, StoreError>;

    /// Documents waiting in the review queue (pending or under review)
    async fn count_pending(&self) -> Result<i64, StoreError>;
}

/// Orders, escrow entries and the payment-event ledger
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    /// Write `order` if the stored version equals `expected_version`; the
    /// stored version becomes `order.version`.
    async fn update_order(&self, order: &Order, expected_version: i64)
        -> Result<(), StoreError>;

    async fn find_ledger_entry(
        &self,
        kind: EventKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Record a collection event and the order change it caused as one
    /// unit. `DuplicateEvent` when the ledger already has the event,
    /// `VersionConflict` when the order moved; neither write happens then.
    async fn commit_collection(
        &self,
        order: &Order,
        expected_version: i64,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError>;

    async fn find_escrow(&self, order_id: Uuid) -> Result<Option<EscrowEntry>, StoreError>;

    /// Create the entry unless the order already has one; returns whether
    /// it was created
    async fn insert_escrow(&self, entry: &EscrowEntry) -> Result<bool, StoreError>;

    /// Write `entry` only if the stored entry is still in `expected_state`
    /// after `expected_attempts` payout attempts. Returns whether the write
    /// happened; a payout is requested only after winning this swap.
    async fn swap_escrow(
        &self,
        entry: &EscrowEntry,
        expected_state: EscrowState,
        expected_attempts: i32,
    ) -> Result<bool, StoreError>;

    /// Record a payout event and the escrow change it caused as one unit.
    /// `VersionConflict` when the stored entry is no longer release-pending
    /// for the same attempt; neither write happens then.
    async fn commit_payout(
        &self,
        escrow: &EscrowEntry,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError>;

    /// Completed, paid orders whose escrow is held, failed, missing, or
    /// claimed before `stale_claim_before` without a payout request
    async fn list_releasable_orders(
        &self,
        limit: i64,
        stale_claim_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;
}
