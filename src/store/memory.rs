//! In-process store implementations
//!
//! Every multi-record operation runs under a single lock so that the
//! atomicity the traits promise holds within one process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::escrow::{EscrowEntry, EscrowState, EventKind, LedgerEntry, Order, OrderStatus, PaymentStatus};
use crate::kyc::{KycDocument, VerificationStatus};
use crate::models::{Identity, Profile, VerificationUpdate};

use super::{IdentityStore, KvStore, KycStore, SettlementStore, StoreError};

#[derive(Default)]
struct IdentityTables {
    identities: HashMap<Uuid, Identity>,
    profiles: HashMap<Uuid, Profile>,
}

impl IdentityTables {
    fn get_mut(&mut self, id: Uuid) -> Result<&mut Identity, StoreError> {
        self.identities.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn find<P: Fn(&Identity) -> bool>(&self, predicate: P) -> Option<Identity> {
        self.identities.values().find(|i| predicate(i)).cloned()
    }

    fn apply_verification(
        &mut self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<Identity, StoreError> {
        let identity = self.get_mut(id)?;
        identity.kyc_status = update.kyc_status;
        identity.status = update.status;
        identity.kyc_rejection_reason = update.kyc_rejection_reason.clone();
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }
}

#[derive(Default)]
struct SettlementTables {
    orders: HashMap<Uuid, Order>,
    escrow: HashMap<Uuid, EscrowEntry>,
    ledger: HashMap<(EventKind, String), LedgerEntry>,
}

impl SettlementTables {
    fn check_version(&self, order_id: Uuid, expected_version: i64) -> Result<(), StoreError> {
        match self.orders.get(&order_id) {
            None => Err(StoreError::NotFound),
            Some(current) if current.version != expected_version => {
                Err(StoreError::VersionConflict)
            }
            Some(_) => Ok(()),
        }
    }
}

/// Identity, KYC and settlement tables held in memory
#[derive(Default)]
pub struct MemoryStore {
    identities: Mutex<IdentityTables>,
    documents: Mutex<HashMap<Uuid, KycDocument>>,
    settlement: Mutex<SettlementTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_with_profile(
        &self,
        identity: &Identity,
        profile: &Profile,
    ) -> Result<(), StoreError> {
        let mut tables = self.identities.lock();
        for existing in tables.identities.values() {
            if existing.phone == identity.phone {
                return Err(StoreError::Conflict("identities_phone_key".to_string()));
            }
            if existing.email == identity.email {
                return Err(StoreError::Conflict("identities_email_key".to_string()));
            }
            if existing.national_id_hash == identity.national_id_hash {
                return Err(StoreError::Conflict(
                    "identities_national_id_hash_key".to_string(),
                ));
            }
        }
        tables.identities.insert(identity.id, identity.clone());
        tables.profiles.insert(identity.id, profile.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>, StoreError> {
        Ok(self.identities.lock().identities.get(&id).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<Identity>, StoreError> {
        Ok(self.identities.lock().find(|i| i.phone == phone))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>, StoreError> {
        let email = email.trim().to_lowercase();
        Ok(self.identities.lock().find(|i| i.email == email))
    }

    async fn find_by_national_id_hash(
        &self,
        hash: &str,
    ) -> Result<Option<Identity>, StoreError> {
        Ok(self.identities.lock().find(|i| i.national_id_hash == hash))
    }

    async fn find_profile(&self, identity_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.identities.lock().profiles.get(&identity_id).cloned())
    }

    async fn update_verification(
        &self,
        id: Uuid,
        update: &VerificationUpdate,
    ) -> Result<Identity, StoreError> {
        self.identities.lock().apply_verification(id, update)
    }

    async fn record_login(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.identities.lock();
        let identity = tables.get_mut(id)?;
        let now = Utc::now();
        identity.last_login = Some(now);
        identity.updated_at = now;
        Ok(())
    }

    async fn push_refresh_hash(
        &self,
        id: Uuid,
        hash: &str,
        cap: usize,
    ) -> Result<(), StoreError> {
        let mut tables = self.identities.lock();
        tables.get_mut(id)?.push_refresh_hash(hash.to_string(), cap);
        Ok(())
    }

    async fn take_refresh_hash(&self, id: Uuid, hash: &str) -> Result<bool, StoreError> {
        let mut tables = self.identities.lock();
        let identity = tables.get_mut(id)?;
        match identity.refresh_tokens.iter().position(|h| h == hash) {
            Some(pos) => {
                identity.refresh_tokens.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl KycStore for MemoryStore {
    async fn insert(
        &self,
        document: &KycDocument,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError> {
        // Identities before documents, everywhere both are held
        let mut identities = self.identities.lock();
        let mut documents = self.documents.lock();
        if documents.contains_key(&document.id) {
            return Err(StoreError::Conflict("kyc_documents_pkey".to_string()));
        }
        if let Some(update) = owner {
            identities.apply_verification(document.identity_id, update)?;
        }
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn update(
        &self,
        document: &KycDocument,
        expected: VerificationStatus,
        owner: Option<&VerificationUpdate>,
    ) -> Result<(), StoreError> {
        let mut identities = self.identities.lock();
        let mut documents = self.documents.lock();
        let slot = documents.get_mut(&document.id).ok_or(StoreError::NotFound)?;
        if slot.status != expected {
            return Err(StoreError::VersionConflict);
        }
        if let Some(update) = owner {
            identities.apply_verification(document.identity_id, update)?;
        }
        *slot = document.clone();
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<KycDocument>, StoreError> {
        Ok(self.documents.lock().get(&id).cloned())
    }

    async fn find_latest_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Option<KycDocument>, StoreError> {
        Ok(self
            .documents
            .lock()
            .values()
            .filter(|d| d.identity_id == identity_id)
            .max_by_key(|d| d.submitted_at)
            .cloned())
    }

    async fn count_pending(&self) -> Result<i64, StoreError> {
        let count = self
            .documents
            .lock()
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    VerificationStatus::Pending | VerificationStatus::UnderReview
                )
            })
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut tables = self.settlement.lock();
        if tables.orders.contains_key(&order.id) {
            return Err(StoreError::Conflict("orders_pkey".to_string()));
        }
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.settlement.lock().orders.get(&id).cloned())
    }

    async fn update_order(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let mut tables = self.settlement.lock();
        tables.check_version(order.id, expected_version)?;
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_ledger_entry(
        &self,
        kind: EventKind,
        gateway_transaction_id: &str,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .settlement
            .lock()
            .ledger
            .get(&(kind, gateway_transaction_id.to_string()))
            .cloned())
    }

    async fn commit_collection(
        &self,
        order: &Order,
        expected_version: i64,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tables = self.settlement.lock();
        let key = (entry.kind, entry.gateway_transaction_id.clone());
        if tables.ledger.contains_key(&key) {
            return Err(StoreError::DuplicateEvent);
        }
        tables.check_version(order.id, expected_version)?;
        tables.ledger.insert(key, entry.clone());
        tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_escrow(&self, order_id: Uuid) -> Result<Option<EscrowEntry>, StoreError> {
        Ok(self.settlement.lock().escrow.get(&order_id).cloned())
    }

    async fn insert_escrow(&self, entry: &EscrowEntry) -> Result<bool, StoreError> {
        let mut tables = self.settlement.lock();
        if tables.escrow.contains_key(&entry.order_id) {
            return Ok(false);
        }
        tables.escrow.insert(entry.order_id, entry.clone());
        Ok(true)
    }

    async fn swap_escrow(
        &self,
        entry: &EscrowEntry,
        expected_state: EscrowState,
        expected_attempts: i32,
    ) -> Result<bool, StoreError> {
        let mut tables = self.settlement.lock();
        match tables.escrow.get_mut(&entry.order_id) {
            None => Err(StoreError::NotFound),
            Some(current)
                if current.state == expected_state
                    && current.payout_attempts == expected_attempts =>
            {
                *current = entry.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    async fn commit_payout(
        &self,
        escrow: &EscrowEntry,
        entry: &LedgerEntry,
    ) -> Result<(), StoreError> {
        let mut tables = self.settlement.lock();
        let key = (entry.kind, entry.gateway_transaction_id.clone());
        if tables.ledger.contains_key(&key) {
            return Err(StoreError::DuplicateEvent);
        }
        match tables.escrow.get(&escrow.order_id) {
            None => return Err(StoreError::NotFound),
            Some(current)
                if current.state == EscrowState::ReleasePending
                    && current.payout_attempts == escrow.payout_attempts => {}
            Some(_) => return Err(StoreError::VersionConflict),
        }
        tables.ledger.insert(key, entry.clone());
        tables.escrow.insert(escrow.order_id, escrow.clone());
        Ok(())
    }

    async fn list_releasable_orders(
        &self,
        limit: i64,
        stale_claim_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let tables = self.settlement.lock();
        let mut ids: Vec<&Order> = tables
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Completed && o.payment_status == PaymentStatus::Paid)
            .filter(|o| match tables.escrow.get(&o.id) {
                None => true,
                Some(e) => match e.state {
                    EscrowState::Held | EscrowState::ReleaseFailed => true,
                    EscrowState::ReleasePending => {
                        e.payout_request_id.is_none() && e.updated_at < stale_claim_before
                    }
                    EscrowState::Released => false,
                },
            })
            .collect();
        ids.sort_by_key(|o| o.updated_at);
        Ok(ids
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|o| o.id)
            .collect())
    }
}

struct KvEntry {
    value: String,
    expires_at: Instant,
}

impl KvEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process TTL key-value store.
///
/// Expiry is measured on the tokio clock so paused-time tests can advance it.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, KvEntry>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, e)| e.is_live(now))
            .map(|(_, e)| e.value))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        Ok(self.entries.get(key).map(|e| e.is_live(now)).unwrap_or(false))
    }

    async fn incr_within(
        &self,
        key: &str,
        cap: u32,
        window: Duration,
    ) -> Result<Option<u32>, StoreError> {
        let now = Instant::now();
        let mut slot = self.entries.entry(key.to_string()).or_insert(KvEntry {
            value: "0".to_string(),
            expires_at: now + window,
        });
        if !slot.is_live(now) {
            *slot = KvEntry {
                value: "0".to_string(),
                expires_at: now + window,
            };
        }
        let count: u32 = slot
            .value
            .parse()
            .map_err(|_| StoreError::Backend(format!("counter '{}' is not numeric", key)))?;
        if count >= cap {
            return Ok(None);
        }
        slot.value = (count + 1).to_string();
        Ok(Some(count + 1))
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        Ok(before.saturating_sub(self.entries.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_kv_expiry_follows_tokio_clock() {
        let kv = MemoryKvStore::new();
        kv.set("k", "v", Duration::from_secs(10)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(!kv.exists("k").await.unwrap());
        assert_eq!(kv.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_within_caps_without_extending_window() {
        let kv = MemoryKvStore::new();
        let window = Duration::from_secs(3600);
        for expected in 1..=5 {
            assert_eq!(kv.incr_within("c", 5, window).await.unwrap(), Some(expected));
        }
        assert_eq!(kv.incr_within("c", 5, window).await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(1800)).await;
        assert_eq!(kv.incr_within("c", 5, window).await.unwrap(), None);

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert_eq!(kv.incr_within("c", 5, window).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let kv = MemoryKvStore::new();
        kv.set("otp", "123456", Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.take("otp").await.unwrap().as_deref(), Some("123456"));
        assert!(kv.take("otp").await.unwrap().is_none());
    }
}
