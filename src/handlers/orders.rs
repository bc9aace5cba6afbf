//! Order and settlement HTTP handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use super::{ApiJson, AuthenticatedUser};
use crate::authz::Action;
use crate::error::ApiError;
use crate::escrow::{
    CollectRequest, CreateOrderRequest, Financials, FinancialsQuery, Order, OrderView,
    PendingCollectionHandle, Settlement,
};
use crate::state::AppState;

/// POST /api/orders - Open an order
pub async fn create_order(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    req.validate().map_err(ApiError::ValidationError)?;

    let order = state
        .settlement_engine
        .open_order(
            &principal,
            req.seller_id,
            req.listing_id,
            req.total_amount,
            req.delivery_fee,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/orders/:id - Order with its settlement
pub async fn get_order(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let view = state.settlement_engine.get_order(order_id, &principal).await?;
    Ok(Json(view))
}

/// POST /api/orders/:id/collect - Ask the buyer's wallet for payment
pub async fn initiate_collection(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    ApiJson(req): ApiJson<CollectRequest>,
) -> Result<(StatusCode, Json<PendingCollectionHandle>), ApiError> {
    let handle = state
        .settlement_engine
        .initiate_collection(order_id, &principal, &req.payer_reference)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

/// POST /api/orders/:id/complete - Confirm delivery
pub async fn complete_order(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .settlement_engine
        .mark_completed(order_id, &principal)
        .await?;
    Ok(Json(order))
}

/// POST /api/orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let order = state
        .settlement_engine
        .cancel_order(order_id, &principal)
        .await?;
    Ok(Json(order))
}

/// POST /api/orders/:id/release - Pay the seller out of escrow (admin)
pub async fn release_escrow(
    State(state): State<AppState>,
    AuthenticatedUser(principal): AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<Settlement>, ApiError> {
    state.authz.authorize(&principal, Action::ReleaseEscrow).await?;
    let settlement = state.settlement_engine.release_escrow(order_id).await?;
    Ok(Json(settlement))
}

/// GET /api/financials?total=&deliveryFee= - Fee split preview
pub async fn preview_financials(
    State(state): State<AppState>,
    Query(query): Query<FinancialsQuery>,
) -> Result<Json<Financials>, ApiError> {
    let financials = state
        .settlement_engine
        .compute_financials(query.total, query.delivery_fee)?;
    Ok(Json(financials))
}
