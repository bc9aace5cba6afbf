//! Settlement engine
//!
//! Orders move money in two gateway round trips: a collection from the
//! buyer into escrow and a payout from escrow to the seller. Both outcomes
//! arrive as callbacks that may be duplicated, delayed or reordered. Every
//! callback is applied at most once through the payment-event ledger, and
//! every order-state operation runs under the order's lock with an
//! optimistic version check on write.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::authz::{Action, AuthorizationFacade, AuthzError, Principal};
use crate::gateway::{notify_best_effort, GatewayError, NotificationSender, PaymentGateway};
use crate::models::{is_valid_phone, Identity, Money};
use crate::store::{IdentityStore, SettlementStore, StoreError};

use super::financials::{compute_financials, FinancialsError};
use super::locks::OrderLocks;
use super::model::{
    CallbackOutcome, CallbackPayload, EscrowEntry, EscrowState, EventKind, Financials,
    LedgerEntry, Order, OrderStatus, PaymentStatus, PendingCollectionHandle, Reconciliation,
    Settlement,
};

/// Settlement errors
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Order not found")]
    OrderNotFound,

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("The {0} is not cleared to transact")]
    CannotTransact(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("A collection request for this order is already in flight")]
    CollectionAlreadyInFlight,

    #[error("Callback {gateway_transaction_id} arrived after order {order_id} was resolved")]
    StaleCallback {
        order_id: Uuid,
        gateway_transaction_id: String,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Authorization(AuthzError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VersionConflict => {
                SettlementError::Conflict("Order was modified concurrently".to_string())
            }
            other => SettlementError::Store(other),
        }
    }
}

impl From<FinancialsError> for SettlementError {
    fn from(e: FinancialsError) -> Self {
        SettlementError::Invalid(e.to_string())
    }
}

impl From<AuthzError> for SettlementError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Store(e) => SettlementError::Store(e),
            other => SettlementError::Authorization(other),
        }
    }
}

/// Timeouts for gateway traffic
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub gateway_timeout: Duration,
    pub collection_in_flight: Duration,
    pub notify_timeout: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(15),
            collection_in_flight: Duration::from_secs(120),
            notify_timeout: Duration::from_secs(10),
        }
    }
}

/// Order plus its escrow settlement, if any
#[derive(Debug, serde::Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub settlement: Option<Settlement>,
}

/// Settlement engine
pub struct SettlementEngine {
    identities: Arc<dyn IdentityStore>,
    store: Arc<dyn SettlementStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSender>,
    authz: Arc<AuthorizationFacade>,
    locks: OrderLocks,
    policy: SettlementPolicy,
}

impl SettlementEngine {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn SettlementStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSender>,
        authz: Arc<AuthorizationFacade>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            identities,
            store,
            gateway,
            notifier,
            authz,
            locks: OrderLocks::new(),
            policy,
        }
    }

    /// Pure fee split for a prospective order
    pub fn compute_financials(
        &self,
        order_total: Money,
        delivery_fee: Money,
    ) -> Result<Financials, SettlementError> {
        Ok(compute_financials(order_total, delivery_fee)?)
    }

    /// Open an order for a buyer cleared to transact
    pub async fn open_order(
        &self,
        buyer: &Principal,
        seller_id: Uuid,
        listing_id: Uuid,
        total_amount: Money,
        delivery_fee: Money,
    ) -> Result<Order, SettlementError> {
        if !total_amount.is_positive() {
            return Err(SettlementError::Invalid(
                "Amount must be greater than 0".to_string(),
            ));
        }
        if seller_id == buyer.identity_id {
            return Err(SettlementError::Invalid(
                "Buyer and seller must be different identities".to_string(),
            ));
        }

        self.authz
            .authorize(buyer, Action::OpenOrder)
            .await
            .map_err(|e| match e {
                AuthzError::CannotTransact => SettlementError::CannotTransact("buyer"),
                other => other.into(),
            })?;
        let seller = self.load_identity(seller_id).await?;

        let financials = compute_financials(total_amount, delivery_fee)?;
        if !financials.net_to_seller.is_positive() {
            return Err(SettlementError::Invalid(
                "Order total does not cover platform fees and delivery".to_string(),
            ));
        }

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            buyer_id: buyer.identity_id,
            seller_id,
            listing_id,
            total_amount,
            delivery_fee,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            gateway_request_id: None,
            collection_started_at: None,
            payment_transaction_id: None,
            payment_failure_reason: None,
            financials: Some(financials),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_order(&order).await?;

        tracing::info!(
            order_id = %order.id,
            buyer_id = %order.buyer_id,
            seller_id = %order.seller_id,
            total = %order.total_amount,
            "Order opened"
        );
        self.notify(
            &seller,
            format!(
                "AgriConnect: New order #{}. Amount: KES {}. Check your app for details.",
                order.id, order.total_amount
            ),
        );
        Ok(order)
    }

    /// Order with its settlement, visible to its parties and admins
    pub async fn get_order(&self, order_id: Uuid, actor: &Principal) -> Result<OrderView, SettlementError> {
        let order = self.load_order(order_id).await?;
        if !actor.is_admin() && actor.identity_id != order.buyer_id && actor.identity_id != order.seller_id {
            return Err(SettlementError::OrderNotFound);
        }
        let settlement = self.store.find_escrow(order_id).await?.map(|e| Settlement::from(&e));
        Ok(OrderView { order, settlement })
    }

    /// Ask the gateway to collect the order total from the buyer.
    ///
    /// Nothing changes locally unless the gateway accepts the request.
    pub async fn initiate_collection(
        &self,
        order_id: Uuid,
        payer: &Principal,
        payer_reference: &str,
    ) -> Result<PendingCollectionHandle, SettlementError> {
        if !is_valid_phone(payer_reference) {
            return Err(SettlementError::Invalid(
                "Payer reference must be a valid phone number".to_string(),
            ));
        }

        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;

        if order.buyer_id != payer.identity_id {
            return Err(SettlementError::Forbidden(
                "Only the buyer can pay for this order".to_string(),
            ));
        }
        self.authz
            .authorize(payer, Action::InitiateCollection)
            .await
            .map_err(|e| match e {
                AuthzError::CannotTransact => SettlementError::CannotTransact("buyer"),
                other => other.into(),
            })?;

        if order.payment_status == PaymentStatus::Paid {
            return Err(SettlementError::Conflict("Order is already paid".to_string()));
        }
        if order.status != OrderStatus::Pending {
            return Err(SettlementError::Conflict(format!(
                "Order is {}",
                order_status_name(order.status)
            )));
        }
        if self.collection_in_flight(&order) {
            return Err(SettlementError::CollectionAlreadyInFlight);
        }

        let request = tokio::time::timeout(
            self.policy.gateway_timeout,
            self.gateway.initiate_collection(
                payer_reference,
                order.total_amount,
                &order.id.to_string(),
            ),
        )
        .await
        .map_err(|_| GatewayError::Timeout)
        .and_then(|r| r)
        .map_err(|e| {
            tracing::error!(order_id = %order_id, error = %e, "Collection request failed");
            e
        })?;

        let now = Utc::now();
        let expected_version = order.version;
        order.payment_status = PaymentStatus::Pending;
        order.gateway_request_id = Some(request.gateway_request_id.clone());
        order.collection_started_at = Some(now);
        order.payment_failure_reason = None;
        order.version += 1;
        order.updated_at = now;
        self.store.update_order(&order, expected_version).await?;

        tracing::info!(
            order_id = %order_id,
            gateway_request_id = %request.gateway_request_id,
            amount = %order.total_amount,
            "Collection initiated"
        );
        Ok(PendingCollectionHandle {
            order_id,
            gateway_request_id: request.gateway_request_id,
            amount: order.total_amount,
            in_flight_until: now
                + chrono::Duration::from_std(self.policy.collection_in_flight)
                    .unwrap_or_else(|_| chrono::Duration::seconds(120)),
        })
    }

    /// Apply a collection callback at most once
    pub async fn reconcile_collection(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Reconciliation, SettlementError> {
        let order_id = payload.validate().map_err(SettlementError::Invalid)?;
        let txn = payload.gateway_transaction_id.trim().to_string();

        let _guard = self.locks.lock(order_id).await;

        if let Some(recorded) = self.store.find_ledger_entry(EventKind::Collection, &txn).await? {
            tracing::info!(order_id = %order_id, gateway_transaction_id = %txn, "Collection callback replayed");
            return Ok(Reconciliation::from_ledger(&recorded, true));
        }

        let mut order = self.load_order(order_id).await?;
        // A callback only answers a collection this engine requested
        let unrequested = order.gateway_request_id.is_none();
        let superseded = matches!(
            (&payload.gateway_request_id, &order.gateway_request_id),
            (Some(reported), Some(current)) if reported != current
        );
        if order.payment_status != PaymentStatus::Pending || unrequested || superseded {
            tracing::warn!(
                order_id = %order_id,
                gateway_transaction_id = %txn,
                resolved_by = ?order.payment_transaction_id,
                payment_status = ?order.payment_status,
                "Stale collection callback"
            );
            return Err(SettlementError::StaleCallback {
                order_id,
                gateway_transaction_id: txn,
            });
        }

        let now = Utc::now();
        let entry = LedgerEntry {
            kind: EventKind::Collection,
            gateway_transaction_id: txn.clone(),
            order_id,
            outcome: payload.outcome,
            reason_code: payload.reason_code.clone(),
            recorded_at: now,
        };

        let expected_version = order.version;
        order.payment_status = match payload.outcome {
            CallbackOutcome::Success => PaymentStatus::Paid,
            CallbackOutcome::Failure => PaymentStatus::Failed,
        };
        order.payment_transaction_id = Some(txn.clone());
        order.payment_failure_reason = match payload.outcome {
            CallbackOutcome::Success => None,
            CallbackOutcome::Failure => Some(
                payload
                    .reason_code
                    .clone()
                    .unwrap_or_else(|| "unspecified".to_string()),
            ),
        };
        order.version += 1;
        order.updated_at = now;

        match self.store.commit_collection(&order, expected_version, &entry).await {
            Ok(()) => {}
            Err(StoreError::DuplicateEvent) => {
                // Another process recorded the same event first
                let recorded = self
                    .store
                    .find_ledger_entry(EventKind::Collection, &txn)
                    .await?
                    .ok_or(SettlementError::Store(StoreError::NotFound))?;
                return Ok(Reconciliation::from_ledger(&recorded, true));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            order_id = %order_id,
            gateway_transaction_id = %txn,
            outcome = payload.outcome.as_str(),
            "Collection reconciled"
        );

        if payload.outcome == CallbackOutcome::Success {
            self.hold_in_escrow(&order).await?;
            if let Some(buyer) = self.identities.find_by_id(order.buyer_id).await? {
                self.notify(
                    &buyer,
                    format!(
                        "AgriConnect: Payment of KES {} received for order #{}. Thank you!",
                        order.total_amount, order.id
                    ),
                );
            }
        }

        Ok(Reconciliation::from_ledger(&entry, false))
    }

    /// Confirm delivery. Only the buyer or an admin may do this, and only
    /// once the order is paid.
    pub async fn mark_completed(&self, order_id: Uuid, actor: &Principal) -> Result<Order, SettlementError> {
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;

        if !actor.is_admin() && actor.identity_id != order.buyer_id {
            return Err(SettlementError::Forbidden(
                "Only the buyer can confirm delivery".to_string(),
            ));
        }
        if order.status != OrderStatus::Pending {
            return Err(SettlementError::Conflict(format!(
                "Order is {}",
                order_status_name(order.status)
            )));
        }
        if order.payment_status != PaymentStatus::Paid {
            return Err(SettlementError::Conflict("Order is not paid".to_string()));
        }

        let expected_version = order.version;
        order.status = OrderStatus::Completed;
        order.version += 1;
        order.updated_at = Utc::now();
        self.store.update_order(&order, expected_version).await?;

        tracing::info!(order_id = %order_id, actor_id = %actor.identity_id, "Order completed");
        Ok(order)
    }

    /// Cancel an unpaid order with no live collection
    pub async fn cancel_order(&self, order_id: Uuid, actor: &Principal) -> Result<Order, SettlementError> {
        let _guard = self.locks.lock(order_id).await;
        let mut order = self.load_order(order_id).await?;

        if !actor.is_admin() && actor.identity_id != order.buyer_id && actor.identity_id != order.seller_id {
            return Err(SettlementError::OrderNotFound);
        }
        if order.status != OrderStatus::Pending {
            return Err(SettlementError::Conflict(format!(
                "Order is {}",
                order_status_name(order.status)
            )));
        }
        if order.payment_status == PaymentStatus::Paid {
            return Err(SettlementError::Conflict(
                "A paid order cannot be canceled".to_string(),
            ));
        }
        if self.collection_in_flight(&order) {
            return Err(SettlementError::CollectionAlreadyInFlight);
        }

        let expected_version = order.version;
        order.status = OrderStatus::Canceled;
        order.version += 1;
        order.updated_at = Utc::now();
        self.store.update_order(&order, expected_version).await?;

        tracing::info!(order_id = %order_id, actor_id = %actor.identity_id, "Order canceled");
        Ok(order)
    }

    /// Pay the seller's share out of escrow.
    ///
    /// Idempotent: a released or release-pending entry is returned as is and
    /// no second payout is requested. The entry is claimed in the store
    /// before the gateway is called, so concurrent releases from other
    /// processes back off instead of paying twice.
    pub async fn release_escrow(&self, order_id: Uuid) -> Result<Settlement, SettlementError> {
        let _guard = self.locks.lock(order_id).await;
        let order = self.load_order(order_id).await?;

        if order.status != OrderStatus::Completed || order.payment_status != PaymentStatus::Paid {
            return Err(SettlementError::Conflict(
                "Escrow is released only for completed, paid orders".to_string(),
            ));
        }

        let escrow = match self.store.find_escrow(order_id).await? {
            Some(entry) => entry,
            None => {
                self.store.insert_escrow(&self.new_escrow_entry(&order)?).await?;
                self.current_escrow(order_id).await?
            }
        };
        if !self.release_claimable(&escrow) {
            tracing::debug!(order_id = %order_id, state = ?escrow.state, "Escrow already released");
            return Ok(Settlement::from(&escrow));
        }

        let seller = self.load_identity(order.seller_id).await?;
        if !self.authz.can_transact(seller.id).await? {
            return Err(SettlementError::CannotTransact("seller"));
        }

        let mut claimed = escrow.clone();
        claimed.state = EscrowState::ReleasePending;
        claimed.payout_request_id = None;
        claimed.failure_reason = None;
        claimed.payout_attempts += 1;
        claimed.updated_at = Utc::now();
        if !self
            .store
            .swap_escrow(&claimed, escrow.state, escrow.payout_attempts)
            .await?
        {
            tracing::info!(order_id = %order_id, "Escrow release claimed by another worker");
            return Ok(Settlement::from(&self.current_escrow(order_id).await?));
        }

        let amount = claimed.financials.net_to_seller;
        let requested = tokio::time::timeout(
            self.policy.gateway_timeout,
            self.gateway.initiate_payout(
                &seller.phone,
                amount,
                &format!("AgriConnect payout for order {}", order_id),
            ),
        )
        .await
        .map_err(|_| GatewayError::Timeout)
        .and_then(|r| r);

        let request = match requested {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(order_id = %order_id, error = %e, "Payout request failed");
                // Hand the entry back untouched so a later attempt can claim it
                let released = self
                    .store
                    .swap_escrow(&escrow, EscrowState::ReleasePending, claimed.payout_attempts)
                    .await?;
                if !released {
                    tracing::warn!(order_id = %order_id, "Escrow moved while its payout request failed");
                }
                return Err(e.into());
            }
        };

        claimed.payout_request_id = Some(request.gateway_request_id.clone());
        claimed.updated_at = Utc::now();
        if !self
            .store
            .swap_escrow(&claimed, EscrowState::ReleasePending, claimed.payout_attempts)
            .await?
        {
            tracing::warn!(
                order_id = %order_id,
                gateway_request_id = %request.gateway_request_id,
                "Payout resolved before its request id was recorded"
            );
            return Ok(Settlement::from(&self.current_escrow(order_id).await?));
        }

        tracing::info!(
            order_id = %order_id,
            seller_id = %seller.id,
            amount = %amount,
            gateway_request_id = %request.gateway_request_id,
            attempt = claimed.payout_attempts,
            "Escrow release requested"
        );
        Ok(Settlement::from(&claimed))
    }

    /// Apply a payout callback at most once
    pub async fn reconcile_payout(
        &self,
        payload: &CallbackPayload,
    ) -> Result<Reconciliation, SettlementError> {
        let order_id = payload.validate().map_err(SettlementError::Invalid)?;
        let txn = payload.gateway_transaction_id.trim().to_string();

        let _guard = self.locks.lock(order_id).await;

        if let Some(recorded) = self.store.find_ledger_entry(EventKind::Payout, &txn).await? {
            tracing::info!(order_id = %order_id, gateway_transaction_id = %txn, "Payout callback replayed");
            return Ok(Reconciliation::from_ledger(&recorded, true));
        }

        let mut escrow = self
            .store
            .find_escrow(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound)?;
        let superseded = matches!(
            (&payload.gateway_request_id, &escrow.payout_request_id),
            (Some(reported), Some(current)) if reported != current
        );
        if escrow.state != EscrowState::ReleasePending || superseded {
            tracing::warn!(
                order_id = %order_id,
                gateway_transaction_id = %txn,
                state = ?escrow.state,
                "Stale payout callback"
            );
            return Err(SettlementError::StaleCallback {
                order_id,
                gateway_transaction_id: txn,
            });
        }

        let now = Utc::now();
        let entry = LedgerEntry {
            kind: EventKind::Payout,
            gateway_transaction_id: txn.clone(),
            order_id,
            outcome: payload.outcome,
            reason_code: payload.reason_code.clone(),
            recorded_at: now,
        };
        match payload.outcome {
            CallbackOutcome::Success => {
                escrow.state = EscrowState::Released;
                escrow.payout_transaction_id = Some(txn.clone());
                escrow.released_at = Some(now);
                escrow.failure_reason = None;
            }
            CallbackOutcome::Failure => {
                escrow.state = EscrowState::ReleaseFailed;
                escrow.failure_reason = Some(
                    payload
                        .reason_code
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                );
            }
        }
        escrow.updated_at = now;

        match self.store.commit_payout(&escrow, &entry).await {
            Ok(()) => {}
            Err(StoreError::DuplicateEvent) => {
                let recorded = self
                    .store
                    .find_ledger_entry(EventKind::Payout, &txn)
                    .await?
                    .ok_or(SettlementError::Store(StoreError::NotFound))?;
                return Ok(Reconciliation::from_ledger(&recorded, true));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            order_id = %order_id,
            gateway_transaction_id = %txn,
            outcome = payload.outcome.as_str(),
            "Payout reconciled"
        );

        if escrow.state == EscrowState::Released {
            if let Some(seller) = self.identities.find_by_id(escrow.seller_id).await? {
                self.notify(
                    &seller,
                    format!(
                        "AgriConnect: KES {} for order #{} has been sent to your M-Pesa.",
                        escrow.financials.net_to_seller, order_id
                    ),
                );
            }
        }

        Ok(Reconciliation::from_ledger(&entry, false))
    }

    /// Release every completed, paid order whose escrow is still held or
    /// failed. Returns how many payouts were requested.
    pub async fn release_due(&self, batch: i64) -> Result<usize, SettlementError> {
        let due = self
            .store
            .list_releasable_orders(batch, self.stale_claim_cutoff())
            .await?;
        let mut requested = 0;
        for order_id in due {
            match self.release_escrow(order_id).await {
                Ok(settlement) if settlement.state == EscrowState::ReleasePending => requested += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(order_id = %order_id, error = %e, "Automatic escrow release skipped")
                }
            }
        }
        self.locks.prune();
        Ok(requested)
    }

    fn collection_in_flight(&self, order: &Order) -> bool {
        if order.payment_status != PaymentStatus::Pending || order.gateway_request_id.is_none() {
            return false;
        }
        match (
            order.collection_started_at,
            chrono::Duration::from_std(self.policy.collection_in_flight),
        ) {
            (Some(started), Ok(window)) => started + window > Utc::now(),
            _ => false,
        }
    }

    /// A held or failed entry can be claimed for a payout. So can a claim
    /// whose owner died before recording a payout request.
    fn release_claimable(&self, escrow: &EscrowEntry) -> bool {
        match escrow.state {
            EscrowState::Held | EscrowState::ReleaseFailed => true,
            EscrowState::ReleasePending => {
                escrow.payout_request_id.is_none() && escrow.updated_at < self.stale_claim_cutoff()
            }
            EscrowState::Released => false,
        }
    }

    /// Claims older than this outlived any gateway call their owner made
    fn stale_claim_cutoff(&self) -> DateTime<Utc> {
        let window = chrono::Duration::from_std(self.policy.gateway_timeout * 4)
            .unwrap_or_else(|_| chrono::Duration::minutes(1));
        Utc::now() - window
    }

    async fn current_escrow(&self, order_id: Uuid) -> Result<EscrowEntry, SettlementError> {
        self.store
            .find_escrow(order_id)
            .await?
            .ok_or(SettlementError::Store(StoreError::NotFound))
    }

    async fn hold_in_escrow(&self, order: &Order) -> Result<(), SettlementError> {
        let entry = self.new_escrow_entry(order)?;
        if self.store.insert_escrow(&entry).await? {
            tracing::info!(order_id = %order.id, net_to_seller = %entry.financials.net_to_seller, "Funds held in escrow");
        }
        Ok(())
    }

    fn new_escrow_entry(&self, order: &Order) -> Result<EscrowEntry, SettlementError> {
        let financials = match order.financials {
            Some(f) => f,
            None => compute_financials(order.total_amount, order.delivery_fee)?,
        };
        let now = Utc::now();
        Ok(EscrowEntry {
            order_id: order.id,
            seller_id: order.seller_id,
            financials,
            state: EscrowState::Held,
            payout_request_id: None,
            payout_transaction_id: None,
            failure_reason: None,
            payout_attempts: 0,
            released_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order, SettlementError> {
        self.store
            .find_order(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound)
    }

    async fn load_identity(&self, identity_id: Uuid) -> Result<Identity, SettlementError> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .ok_or(SettlementError::IdentityNotFound)
    }

    fn notify(&self, identity: &Identity, message: String) {
        notify_best_effort(
            self.notifier.clone(),
            identity.phone.clone(),
            message,
            self.policy.notify_timeout,
        );
    }
}

fn order_status_name(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Pending => "pending",
        OrderStatus::Completed => "completed",
        OrderStatus::Canceled => "canceled",
        OrderStatus::Refunded => "refunded",
    }
}
