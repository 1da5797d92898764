use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::{IntoParams, ToSchema};

use crate::api::{internal_error, ErrorResponse};
use crate::models::{Zone, ZoneGeometry, ZoneRow};

#[derive(Clone)]
pub struct ZonesState {
    pub pool: SqlitePool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ZoneListQuery {
    /// Only zones attached to this route
    pub route: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ZoneListResponse {
    pub zones: Vec<Zone>,
    pub total_count: usize,
}

/// List geofence zones
#[utoipa::path(
    get,
    path = "/api/zones",
    params(ZoneListQuery),
    responses(
        (status = 200, description = "Zones, optionally filtered by route", body = ZoneListResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "zones"
)]
pub async fn list_zones(
    State(state): State<ZonesState>,
    Query(query): Query<ZoneListQuery>,
) -> Result<Json<ZoneListResponse>, (StatusCode, Json<ErrorResponse>)> {
    let rows: Vec<ZoneRow> = match &query.route {
        Some(route) => sqlx::query_as(
            "SELECT id, name, route_name, kind, center_lat, center_lon, radius_m, vertices
             FROM zones WHERE route_name = ? ORDER BY id",
        )
        .bind(route)
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?,
        None => sqlx::query_as(
            "SELECT id, name, route_name, kind, center_lat, center_lon, radius_m, vertices
             FROM zones ORDER BY id",
        )
        .fetch_all(&state.pool)
        .await
        .map_err(internal_error)?,
    };

    let zones: Vec<Zone> = rows.into_iter().filter_map(ZoneRow::into_zone).collect();
    Ok(Json(ZoneListResponse {
        total_count: zones.len(),
        zones,
    }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateZoneRequest {
    pub name: String,
    pub route_name: String,
    pub geometry: ZoneGeometry,
}

/// Create a geofence zone
///
/// Geometry is validated at this boundary; a zone that fails validation is
/// rejected outright and never stored.
#[utoipa::path(
    post,
    path = "/api/zones",
    request_body = CreateZoneRequest,
    responses(
        (status = 201, description = "Zone created", body = Zone),
        (status = 400, description = "Geometry fails validation", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "zones"
)]
pub async fn create_zone(
    State(state): State<ZonesState>,
    Json(request): Json<CreateZoneRequest>,
) -> Result<(StatusCode, Json<Zone>), (StatusCode, Json<ErrorResponse>)> {
    request.geometry.validate().map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })?;

    let result = match &request.geometry {
        ZoneGeometry::Circle { center, radius_m } => sqlx::query(
            "INSERT INTO zones (name, route_name, kind, center_lat, center_lon, radius_m)
             VALUES (?, ?, 'circle', ?, ?, ?)",
        )
        .bind(&request.name)
        .bind(&request.route_name)
        .bind(center.lat)
        .bind(center.lon)
        .bind(radius_m)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?,
        ZoneGeometry::Polygon { vertices } => {
            let encoded = serde_json::to_string(vertices).map_err(|e| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse {
                        error: format!("Failed to encode vertices: {}", e),
                    }),
                )
            })?;
            sqlx::query(
                "INSERT INTO zones (name, route_name, kind, vertices)
                 VALUES (?, ?, 'polygon', ?)",
            )
            .bind(&request.name)
            .bind(&request.route_name)
            .bind(encoded)
            .execute(&state.pool)
            .await
            .map_err(internal_error)?
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(Zone {
            id: result.last_insert_rowid(),
            name: request.name,
            route_name: request.route_name,
            geometry: request.geometry,
        }),
    ))
}

pub fn router(pool: SqlitePool) -> Router {
    Router::new()
        .route("/", get(list_zones).post(create_zone))
        .with_state(ZonesState { pool })
}
