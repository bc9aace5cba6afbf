//! Order route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::orders;
use crate::state::AppState;

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/api/orders", post(orders::create_order))
        .route("/api/orders/:id", get(orders::get_order))
        .route("/api/orders/:id/collect", post(orders::initiate_collection))
        .route("/api/orders/:id/complete", post(orders::complete_order))
        .route("/api/orders/:id/cancel", post(orders::cancel_order))
        .route("/api/orders/:id/release", post(orders::release_escrow))
        .route("/api/financials", get(orders::preview_financials))
}
