//! Attendance reconciliation: diff a route's enrolled roster against the
//! boarding records of a trip.
//!
//! Read-only; the engine never writes roster or attendance data, so
//! repeated calls with no interleaved attendance writes return identical
//! results.

use std::collections::HashSet;

use sqlx::SqlitePool;

use crate::models::Student;

#[derive(Debug, thiserror::Error)]
pub enum AttendanceError {
    #[error("trip {0} not found")]
    TripNotFound(i64),
    #[error("store unavailable: {0}")]
    Dependency(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct TripRoute {
    route_name: String,
}

/// Active students enrolled on a route, in enrollment order.
pub async fn roster_for_route(
    pool: &SqlitePool,
    route_name: &str,
) -> Result<Vec<Student>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, name, route_name, guardian_user_id, active, enrolled_at
         FROM students
         WHERE route_name = ? AND active = 1
         ORDER BY enrolled_at, id",
    )
    .bind(route_name)
    .fetch_all(pool)
    .await
}

/// Order-preserving set difference: enrolled minus boarded.
pub fn diff_roster(roster: Vec<Student>, boarded: &HashSet<i64>) -> Vec<Student> {
    roster
        .into_iter()
        .filter(|s| !boarded.contains(&s.id))
        .collect()
}

/// Compute the absentee list for a trip: active students enrolled on the
/// trip's route with no boarding record for it.
pub async fn compute_absentees(
    pool: &SqlitePool,
    trip_id: i64,
) -> Result<Vec<Student>, AttendanceError> {
    let trip: Option<TripRoute> = sqlx::query_as("SELECT route_name FROM trips WHERE id = ?")
        .bind(trip_id)
        .fetch_optional(pool)
        .await?;
    let trip = trip.ok_or(AttendanceError::TripNotFound(trip_id))?;

    let roster = roster_for_route(pool, &trip.route_name).await?;

    let boarded: Vec<(i64,)> = sqlx::query_as(
        "SELECT DISTINCT student_id FROM attendance_records
         WHERE trip_id = ? AND event_type = 'board'",
    )
    .bind(trip_id)
    .fetch_all(pool)
    .await?;
    let boarded: HashSet<i64> = boarded.into_iter().map(|(id,)| id).collect();

    Ok(diff_roster(roster, &boarded))
}
