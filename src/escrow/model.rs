//! Order, escrow and payment-event models

use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Money;

/// Order lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Canceled,
    Refunded,
}

/// Payment status of an order
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// Fee split for an order. All amounts in minor units.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Financials {
    pub order_total: Money,
    pub platform_commission: Money,
    pub fixed_fee: Money,
    pub gross_platform_revenue: Money,
    pub vat_on_fees: Money,
    pub net_platform_revenue: Money,
    pub net_to_seller: Money,
    pub delivery_fee: Money,
}

/// Order as seen by the settlement engine
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub listing_id: Uuid,
    pub total_amount: Money,
    pub delivery_fee: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Gateway request id of the live (or last) collection attempt
    pub gateway_request_id: Option<String>,
    pub collection_started_at: Option<DateTime<Utc>>,
    /// Transaction id of the callback that resolved payment
    pub payment_transaction_id: Option<String>,
    pub payment_failure_reason: Option<String>,
    pub financials: Option<Financials>,
    /// Optimistic concurrency version, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Escrow ledger state for an order
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "escrow_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Held,
    ReleasePending,
    ReleaseFailed,
    Released,
}

/// One escrow entry per order
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowEntry {
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub financials: Financials,
    pub state: EscrowState,
    pub payout_request_id: Option<String>,
    pub payout_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
    pub payout_attempts: i32,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Settlement record returned by escrow release
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub order_id: Uuid,
    pub state: EscrowState,
    pub net_to_seller: Money,
    pub financials: Financials,
    pub payout_request_id: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
}

impl From<&EscrowEntry> for Settlement {
    fn from(entry: &EscrowEntry) -> Self {
        Self {
            order_id: entry.order_id,
            state: entry.state,
            net_to_seller: entry.financials.net_to_seller,
            financials: entry.financials,
            payout_request_id: entry.payout_request_id.clone(),
            released_at: entry.released_at,
        }
    }
}

/// Handle returned when a collection has been requested from the gateway
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingCollectionHandle {
    pub order_id: Uuid,
    pub gateway_request_id: String,
    pub amount: Money,
    pub in_flight_until: DateTime<Utc>,
}

/// Which gateway flow a callback belongs to
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "payment_event_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Collection,
    Payout,
}

/// Outcome reported by the gateway
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallbackOutcome {
    Success,
    Failure,
}

impl CallbackOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Success => "success",
            CallbackOutcome::Failure => "failure",
        }
    }
}

impl std::str::FromStr for CallbackOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CallbackOutcome::Success),
            "failure" => Ok(CallbackOutcome::Failure),
            other => Err(format!("unknown callback outcome '{}'", other)),
        }
    }
}

/// Raw callback body delivered by the gateway
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub gateway_transaction_id: String,
    #[serde(default)]
    pub gateway_request_id: Option<String>,
    pub outcome: CallbackOutcome,
    #[serde(default)]
    pub reason_code: Option<String>,
    /// Account reference passed when the request was initiated (the order id)
    pub account_ref: String,
}

impl CallbackPayload {
    pub fn validate(&self) -> Result<Uuid, String> {
        if self.gateway_transaction_id.trim().is_empty() {
            return Err("gatewayTransactionId must not be empty".to_string());
        }
        Uuid::parse_str(self.account_ref.trim())
            .map_err(|_| format!("accountRef '{}' is not an order reference", self.account_ref))
    }
}

/// Idempotency-ledger record of an applied gateway event
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub kind: EventKind,
    pub gateway_transaction_id: String,
    pub order_id: Uuid,
    pub outcome: CallbackOutcome,
    pub reason_code: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of reconciling a callback
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub order_id: Uuid,
    pub kind: EventKind,
    pub gateway_transaction_id: String,
    pub outcome: CallbackOutcome,
    /// False the first time an event is applied, true for replays
    pub replayed: bool,
}

impl Reconciliation {
    pub fn from_ledger(entry: &LedgerEntry, replayed: bool) -> Self {
        Self {
            order_id: entry.order_id,
            kind: entry.kind,
            gateway_transaction_id: entry.gateway_transaction_id.clone(),
            outcome: entry.outcome,
            replayed,
        }
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Request DTO for opening an order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub seller_id: Uuid,
    pub listing_id: Uuid,
    pub total_amount: Money,
    #[serde(default)]
    pub delivery_fee: Money,
}

impl CreateOrderRequest {
    /// Validate request
    pub fn validate(&self) -> Result<(), String> {
        if !self.total_amount.is_positive() {
            return Err("Amount must be greater than 0".to_string());
        }
        if self.delivery_fee.is_negative() {
            return Err("Delivery fee must not be negative".to_string());
        }
        Ok(())
    }
}

/// Request DTO for initiating a collection
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    pub payer_reference: String,
}

/// Query parameters for the financials preview
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialsQuery {
    pub total: Money,
    #[serde(default)]
    pub delivery_fee: Money,
}

/// Response to a gateway webhook
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAck {
    pub received: bool,
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
