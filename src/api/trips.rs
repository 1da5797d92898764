use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

use crate::api::{internal_error, not_found, ErrorResponse};
use crate::attendance::{self, AttendanceError};
use crate::broadcast::{Hub, Topic};
use crate::models::{
    AttendanceEventType, AttendanceRecord, Coordinate, Student, Trip, TripStatus,
};
use crate::tracking::TrackingEvent;

#[derive(Clone)]
pub struct TripsState {
    pub pool: SqlitePool,
    pub hub: Arc<Hub>,
}

#[derive(Debug, sqlx::FromRow)]
struct TripRow {
    id: i64,
    vehicle_id: i64,
    route_name: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TripRow {
    fn into_trip(self) -> Trip {
        Trip {
            id: self.id,
            vehicle_id: self.vehicle_id,
            route_name: self.route_name,
            status: TripStatus::parse(&self.status).unwrap_or(TripStatus::Scheduled),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

async fn fetch_trip(pool: &SqlitePool, id: i64) -> Result<Option<TripRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, vehicle_id, route_name, status, started_at, completed_at
         FROM trips WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Mark a scheduled trip as in progress
#[utoipa::path(
    post,
    path = "/api/trips/{id}/start",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip started", body = Trip),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Trip is not in the scheduled state", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn start_trip(
    State(state): State<TripsState>,
    Path(id): Path<i64>,
) -> Result<Json<Trip>, (StatusCode, Json<ErrorResponse>)> {
    let row = fetch_trip(&state.pool, id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Trip"))?;

    if row.status != "scheduled" {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("Trip is {}, not scheduled", row.status),
            }),
        ));
    }

    let started_at = Utc::now();
    sqlx::query("UPDATE trips SET status = 'in_progress', started_at = ? WHERE id = ?")
        .bind(started_at)
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;

    let mut trip = row.into_trip();
    trip.status = TripStatus::InProgress;
    trip.started_at = Some(started_at);
    Ok(Json(trip))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordAttendanceRequest {
    pub student_id: i64,
    pub event_type: AttendanceEventType,
    /// Position snapshot at the time of the event, if the device has one
    pub coordinate: Option<Coordinate>,
}

/// Append an attendance record for a trip
///
/// Records are immutable once written; corrections are new records.
#[utoipa::path(
    post,
    path = "/api/trips/{id}/attendance",
    params(("id" = i64, Path, description = "Trip id")),
    request_body = RecordAttendanceRequest,
    responses(
        (status = 201, description = "Record appended", body = AttendanceRecord),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn record_attendance(
    State(state): State<TripsState>,
    Path(id): Path<i64>,
    Json(request): Json<RecordAttendanceRequest>,
) -> Result<(StatusCode, Json<AttendanceRecord>), (StatusCode, Json<ErrorResponse>)> {
    if fetch_trip(&state.pool, id)
        .await
        .map_err(internal_error)?
        .is_none()
    {
        return Err(not_found("Trip"));
    }

    let recorded_at = Utc::now();
    let result = sqlx::query(
        "INSERT INTO attendance_records (trip_id, student_id, event_type, recorded_at, lat, lon)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(request.student_id)
    .bind(request.event_type.as_str())
    .bind(recorded_at)
    .bind(request.coordinate.map(|c| c.lat))
    .bind(request.coordinate.map(|c| c.lon))
    .execute(&state.pool)
    .await
    .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(AttendanceRecord {
            id: result.last_insert_rowid(),
            trip_id: id,
            student_id: request.student_id,
            event_type: request.event_type,
            recorded_at,
            coordinate: request.coordinate,
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CompleteTripResponse {
    pub trip: Trip,
    /// Students enrolled on the route with no boarding record
    pub absentees: Vec<Student>,
    /// Absence alerts delivered to guardian user channels
    pub alerts_sent: usize,
}

/// Complete a trip and reconcile attendance
///
/// Marks the trip completed, computes the absentee set (enrolled minus
/// boarded), and pushes an absence alert onto each absentee guardian's
/// user channel.
#[utoipa::path(
    post,
    path = "/api/trips/{id}/complete",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Trip completed; absentees returned", body = CompleteTripResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 409, description = "Trip is already completed", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn complete_trip(
    State(state): State<TripsState>,
    Path(id): Path<i64>,
) -> Result<Json<CompleteTripResponse>, (StatusCode, Json<ErrorResponse>)> {
    let row = fetch_trip(&state.pool, id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Trip"))?;

    if row.status == "completed" {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Trip is already completed".to_string(),
            }),
        ));
    }

    let completed_at = Utc::now();
    sqlx::query("UPDATE trips SET status = 'completed', completed_at = ? WHERE id = ?")
        .bind(completed_at)
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(internal_error)?;

    let absentees = attendance::compute_absentees(&state.pool, id)
        .await
        .map_err(|e| match e {
            AttendanceError::TripNotFound(_) => not_found("Trip"),
            AttendanceError::Dependency(e) => internal_error(e),
        })?;

    let route_name = row.route_name.clone();
    let mut alerts_sent = 0;
    for student in &absentees {
        let Some(guardian) = student.guardian_user_id else {
            continue;
        };
        let alert = TrackingEvent::AbsenceAlert {
            trip_id: id,
            student_id: student.id,
            student_name: student.name.clone(),
            route_name: route_name.clone(),
            timestamp: completed_at,
        };
        alerts_sent += state.hub.publish(&Topic::User(guardian), &alert).await;
    }

    let mut trip = row.into_trip();
    trip.status = TripStatus::Completed;
    trip.completed_at = Some(completed_at);
    Ok(Json(CompleteTripResponse {
        trip,
        absentees,
        alerts_sent,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AbsenteeListResponse {
    pub trip_id: i64,
    /// Absent students in enrollment order
    pub absentees: Vec<Student>,
    pub absent_count: usize,
}

/// Absentees for a trip (enrolled minus boarded)
#[utoipa::path(
    get,
    path = "/api/trips/{id}/absentees",
    params(("id" = i64, Path, description = "Trip id")),
    responses(
        (status = 200, description = "Absentee list", body = AbsenteeListResponse),
        (status = 404, description = "Trip not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "trips"
)]
pub async fn get_absentees(
    State(state): State<TripsState>,
    Path(id): Path<i64>,
) -> Result<Json<AbsenteeListResponse>, (StatusCode, Json<ErrorResponse>)> {
    match attendance::compute_absentees(&state.pool, id).await {
        Ok(absentees) => Ok(Json(AbsenteeListResponse {
            trip_id: id,
            absent_count: absentees.len(),
            absentees,
        })),
        Err(AttendanceError::TripNotFound(_)) => Err(not_found("Trip")),
        Err(AttendanceError::Dependency(e)) => Err(internal_error(e)),
    }
}

pub fn router(pool: SqlitePool, hub: Arc<Hub>) -> Router {
    let state = TripsState { pool, hub };
    Router::new()
        .route("/{id}/start", post(start_trip))
        .route("/{id}/attendance", post(record_attendance))
        .route("/{id}/complete", post(complete_trip))
        .route("/{id}/absentees", get(get_absentees))
        .with_state(state)
}
