use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::broadcast::Hub;
use crate::tracking::VehicleStateStore;

#[derive(Clone)]
pub struct HealthState {
    pub pool: SqlitePool,
    pub states: Arc<VehicleStateStore>,
    pub hub: Arc<Hub>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Whether the durable store answers queries
    pub store_reachable: bool,
    /// Vehicles with live state since startup
    pub tracked_vehicles: usize,
    /// Open WebSocket sessions
    pub open_sessions: usize,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let store_reachable = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();

    Json(HealthResponse {
        healthy: true,
        store_reachable,
        tracked_vehicles: state.states.tracked_count().await,
        open_sessions: state.hub.session_count().await,
    })
}

pub fn router(pool: SqlitePool, states: Arc<VehicleStateStore>, hub: Arc<Hub>) -> Router {
    let state = HealthState { pool, states, hub };
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}
