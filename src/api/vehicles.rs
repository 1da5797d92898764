use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::{IntoParams, ToSchema};

use crate::api::{internal_error, not_found, ErrorResponse};
use crate::models::{GpsLogEntry, Vehicle};
use crate::tracking::{LiveState, VehicleStateStore};

#[derive(Clone)]
pub struct VehiclesState {
    pub pool: SqlitePool,
    pub states: Arc<VehicleStateStore>,
}

/// A vehicle with its live-tracking status
#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleSummary {
    pub id: i64,
    pub registration: String,
    pub route_name: String,
    pub capacity: i64,
    /// Whether the vehicle has reported a position since startup
    pub tracked: bool,
    /// Timestamp of the last applied sample
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleListResponse {
    pub vehicles: Vec<VehicleSummary>,
    pub total_count: usize,
}

/// List the fleet with live-tracking flags
#[utoipa::path(
    get,
    path = "/api/vehicles",
    responses(
        (status = 200, description = "All vehicles", body = VehicleListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_vehicles(
    State(state): State<VehiclesState>,
) -> Result<Json<VehicleListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let vehicles: Vec<Vehicle> =
        sqlx::query_as("SELECT id, registration, route_name, capacity FROM vehicles ORDER BY id")
            .fetch_all(&state.pool)
            .await
            .map_err(internal_error)?;

    let mut summaries = Vec::with_capacity(vehicles.len());
    for v in vehicles {
        let live = state.states.get(v.id).await;
        summaries.push(VehicleSummary {
            id: v.id,
            registration: v.registration,
            route_name: v.route_name,
            capacity: v.capacity,
            tracked: live.is_some(),
            last_seen: live.map(|s| s.timestamp),
        });
    }

    Ok(Json(VehicleListResponse {
        total_count: summaries.len(),
        vehicles: summaries,
    }))
}

/// Live state snapshot for one vehicle
#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleStateResponse {
    pub vehicle_id: i64,
    pub state: LiveState,
}

/// Pull the current live state of a vehicle
///
/// Sessions that join a vehicle channel after events were published use
/// this to resynchronize; broadcast delivery is best-effort and nothing is
/// replayed.
#[utoipa::path(
    get,
    path = "/api/vehicles/{id}/state",
    params(("id" = i64, Path, description = "Vehicle id")),
    responses(
        (status = 200, description = "Current live state", body = VehicleStateResponse),
        (status = 404, description = "Vehicle has no live state since startup", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_vehicle_state(
    State(state): State<VehiclesState>,
    Path(id): Path<i64>,
) -> Result<Json<VehicleStateResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.states.get(id).await {
        Some(live) => Ok(Json(VehicleStateResponse {
            vehicle_id: id,
            state: live,
        })),
        None => Err(not_found("Live state for vehicle")),
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LogQuery {
    /// Maximum entries to return, newest first (default 100, max 1000)
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VehicleLogResponse {
    pub vehicle_id: i64,
    /// Newest-first persisted samples
    pub entries: Vec<GpsLogEntry>,
}

/// Recent persisted position samples for one vehicle
#[utoipa::path(
    get,
    path = "/api/vehicles/{id}/log",
    params(("id" = i64, Path, description = "Vehicle id"), LogQuery),
    responses(
        (status = 200, description = "Recent GPS log entries", body = VehicleLogResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_vehicle_log(
    State(state): State<VehiclesState>,
    Path(id): Path<i64>,
    Query(query): Query<LogQuery>,
) -> Result<Json<VehicleLogResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let entries: Vec<GpsLogEntry> = sqlx::query_as(
        "SELECT id, vehicle_id, lat, lon, speed_kmh, heading, recorded_at
         FROM gps_log WHERE vehicle_id = ?
         ORDER BY recorded_at DESC LIMIT ?",
    )
    .bind(id)
    .bind(limit)
    .fetch_all(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok(Json(VehicleLogResponse {
        vehicle_id: id,
        entries,
    }))
}

pub fn router(pool: SqlitePool, states: Arc<VehicleStateStore>) -> Router {
    let state = VehiclesState { pool, states };
    Router::new()
        .route("/", get(list_vehicles))
        .route("/{id}/state", get(get_vehicle_state))
        .route("/{id}/log", get(get_vehicle_log))
        .with_state(state)
}
