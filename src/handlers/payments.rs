//! Payment gateway webhooks
//!
//! Callbacks are acknowledged with 200 whenever the body was understood,
//! including replays and stale events, so the gateway stops redelivering.

use axum::{extract::State, http::StatusCode, Json};

use super::ApiJson;
use crate::error::ApiError;
use crate::escrow::{CallbackAck, CallbackPayload, Reconciliation, SettlementError};
use crate::state::AppState;

fn acknowledge(
    result: Result<Reconciliation, SettlementError>,
) -> Result<(StatusCode, Json<CallbackAck>), ApiError> {
    match result {
        Ok(reconciliation) => Ok((
            StatusCode::OK,
            Json(CallbackAck {
                received: true,
                applied: !reconciliation.replayed,
                detail: reconciliation.replayed.then(|| "duplicate event".to_string()),
            }),
        )),
        Err(SettlementError::StaleCallback { .. }) => Ok((
            StatusCode::OK,
            Json(CallbackAck {
                received: true,
                applied: false,
                detail: Some("stale event".to_string()),
            }),
        )),
        Err(e) => Err(e.into()),
    }
}

/// POST /api/payments/callback/collection
pub async fn collection_callback(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CallbackPayload>,
) -> Result<(StatusCode, Json<CallbackAck>), ApiError> {
    tracing::info!(
        gateway_transaction_id = %payload.gateway_transaction_id,
        account_ref = %payload.account_ref,
        outcome = payload.outcome.as_str(),
        "Collection callback received"
    );
    acknowledge(state.settlement_engine.reconcile_collection(&payload).await)
}

/// POST /api/payments/callback/payout
pub async fn payout_callback(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CallbackPayload>,
) -> Result<(StatusCode, Json<CallbackAck>), ApiError> {
    tracing::info!(
        gateway_transaction_id = %payload.gateway_transaction_id,
        account_ref = %payload.account_ref,
        outcome = payload.outcome.as_str(),
        "Payout callback received"
    );
    acknowledge(state.settlement_engine.reconcile_payout(&payload).await)
}
