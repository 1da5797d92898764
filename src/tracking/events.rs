use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::state::ZoneStatus;
use crate::models::Coordinate;

/// Severity tier of a speed violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

/// Domain event emitted by the tracking pipeline.
///
/// The serialized shape doubles as the WebSocket wire format.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum TrackingEvent {
    /// First evaluation of a zone for a vehicle; carries the observed
    /// status instead of a transition
    ZoneStatusInitialized {
        vehicle_id: i64,
        zone_id: i64,
        zone_name: String,
        status: ZoneStatus,
        coordinate: Coordinate,
        timestamp: DateTime<Utc>,
    },
    /// The vehicle crossed from outside to inside a zone
    ZoneEntered {
        vehicle_id: i64,
        zone_id: i64,
        zone_name: String,
        coordinate: Coordinate,
        timestamp: DateTime<Utc>,
    },
    /// The vehicle crossed from inside to outside a zone
    ZoneExited {
        vehicle_id: i64,
        zone_id: i64,
        zone_name: String,
        coordinate: Coordinate,
        timestamp: DateTime<Utc>,
    },
    /// The sample's speed reading is at or above the configured limit
    SpeedViolation {
        vehicle_id: i64,
        speed_kmh: f64,
        limit_kmh: f64,
        severity: Severity,
        coordinate: Coordinate,
        timestamp: DateTime<Utc>,
    },
    /// Raw position update, published alongside any emitted events
    PositionUpdate {
        vehicle_id: i64,
        coordinate: Coordinate,
        speed_kmh: f64,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    /// A student missed a completed trip; delivered on the guardian's
    /// user channel
    AbsenceAlert {
        trip_id: i64,
        student_id: i64,
        student_name: String,
        route_name: String,
        timestamp: DateTime<Utc>,
    },
}
