//! Health check handler

use axum::{extract::State, Json};

use crate::db::check_health;
use crate::state::AppState;

/// Health check response
#[derive(serde::Serialize)]
pub struct HealthResponse {
    status: String,
    database: String,
    environment: String,
    version: String,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.db {
        Some(pool) => match check_health(pool).await {
            Ok(()) => "connected".to_string(),
            Err(e) => format!("error: {}", e),
        },
        None => "in-memory".to_string(),
    };

    let status = if database.starts_with("error") {
        "unhealthy"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status: status.to_string(),
        database,
        environment: state.environment.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
