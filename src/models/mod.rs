pub mod zone;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub use zone::{ValidationError, Zone, ZoneGeometry, ZoneRow};

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    /// Latitude in degrees, positive north
    pub lat: f64,
    /// Longitude in degrees, positive east
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether the coordinate lies within valid WGS84 bounds.
    pub fn is_in_range(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && self.lat.abs() <= 90.0
            && self.lon.abs() <= 180.0
    }
}

/// A bus in the fleet
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Vehicle {
    pub id: i64,
    /// Registration plate
    pub registration: String,
    /// Route this vehicle is assigned to
    pub route_name: String,
    /// Seating capacity
    pub capacity: i64,
}

/// An enrolled student
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Student {
    pub id: i64,
    pub name: String,
    /// Route the student is enrolled on; determines the expected roster for a trip
    pub route_name: String,
    /// User to notify about this student's alerts, if any
    pub guardian_user_id: Option<i64>,
    /// Inactive students are excluded from rosters
    pub active: bool,
    /// Enrollment timestamp; rosters are returned in enrollment order
    pub enrolled_at: DateTime<Utc>,
}

/// Lifecycle state of a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Scheduled,
    InProgress,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Scheduled => "scheduled",
            TripStatus::InProgress => "in_progress",
            TripStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(TripStatus::Scheduled),
            "in_progress" => Some(TripStatus::InProgress),
            "completed" => Some(TripStatus::Completed),
            _ => None,
        }
    }
}

/// One run of a vehicle on its route
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Trip {
    pub id: i64,
    pub vehicle_id: i64,
    pub route_name: String,
    pub status: TripStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind of attendance event recorded for a student on a trip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceEventType {
    Board,
    Alight,
    Late,
}

impl AttendanceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceEventType::Board => "board",
            AttendanceEventType::Alight => "alight",
            AttendanceEventType::Late => "late",
        }
    }
}

/// An attendance event; immutable once written
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttendanceRecord {
    pub id: i64,
    pub trip_id: i64,
    pub student_id: i64,
    pub event_type: AttendanceEventType,
    pub recorded_at: DateTime<Utc>,
    /// Position snapshot at the time of the event, if the device reported one
    pub coordinate: Option<Coordinate>,
}

/// A persisted position sample; one row per accepted sample, append-only
#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct GpsLogEntry {
    pub id: i64,
    pub vehicle_id: i64,
    pub lat: f64,
    pub lon: f64,
    pub speed_kmh: f64,
    pub heading: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A raw position sample as reported by a device gateway
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PositionSample {
    pub vehicle_id: i64,
    pub lat: f64,
    pub lon: f64,
    /// Speed over ground in km/h
    pub speed_kmh: f64,
    /// Heading in degrees clockwise from north, if the device reports one
    pub heading: Option<f64>,
    /// Device timestamp of the fix
    pub recorded_at: DateTime<Utc>,
}

impl PositionSample {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}
