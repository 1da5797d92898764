use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::broadcast::{Hub, Topic};
use crate::config::TrackingConfig;
use crate::geo;
use crate::models::{Coordinate, PositionSample, Zone, ZoneGeometry};

use super::events::{Severity, TrackingEvent};
use super::state::{LiveState, VehicleStateStore, ZoneStatus};

/// A sample the pipeline refuses to process. Dropped, not retried; the
/// producer must not resend the identical sample.
#[derive(Debug, thiserror::Error)]
pub enum InvalidSampleError {
    #[error("coordinate out of range: lat {lat}, lon {lon}")]
    CoordinateOutOfRange { lat: f64, lon: f64 },
    #[error("sample for vehicle {vehicle_id} is older than the last applied sample ({last})")]
    StaleTimestamp {
        vehicle_id: i64,
        last: DateTime<Utc>,
    },
    #[error("unknown vehicle {0}")]
    UnknownVehicle(i64),
}

/// Ingestion failure. Invalid samples are dropped without touching any
/// state; dependency failures leave no partial in-memory commit and the
/// whole sample can be retried.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    InvalidSample(#[from] InvalidSampleError),
    #[error("store unavailable: {0}")]
    Dependency(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct VehicleRoute {
    route_name: String,
}

/// The membership transition pipeline.
///
/// Turns raw position samples into domain events: zone enter/exit
/// transitions, speed violations, and position updates, all published to
/// the broadcast hub on the vehicle's channel.
pub struct Tracker {
    pool: SqlitePool,
    states: Arc<VehicleStateStore>,
    hub: Arc<Hub>,
    config: TrackingConfig,
}

impl Tracker {
    pub fn new(
        pool: SqlitePool,
        states: Arc<VehicleStateStore>,
        hub: Arc<Hub>,
        config: TrackingConfig,
    ) -> Self {
        Self {
            pool,
            states,
            hub,
            config,
        }
    }

    /// Process one raw position sample.
    ///
    /// The durable append, zone evaluation, and live-state commit all run
    /// under the vehicle's lock, so samples for one vehicle are applied
    /// strictly in order while other vehicles proceed in parallel. Returns
    /// the domain events the sample emitted.
    pub async fn ingest_position(
        &self,
        sample: PositionSample,
    ) -> Result<Vec<TrackingEvent>, IngestError> {
        let coordinate = sample.coordinate();
        if !coordinate.is_in_range() {
            return Err(InvalidSampleError::CoordinateOutOfRange {
                lat: sample.lat,
                lon: sample.lon,
            }
            .into());
        }

        let vehicle: Option<VehicleRoute> =
            sqlx::query_as("SELECT route_name FROM vehicles WHERE id = ?")
                .bind(sample.vehicle_id)
                .fetch_optional(&self.pool)
                .await?;
        let vehicle = vehicle.ok_or(InvalidSampleError::UnknownVehicle(sample.vehicle_id))?;

        let slot = self.states.slot(sample.vehicle_id).await;
        let mut state = slot.lock().await;

        // Out-of-order samples are dropped, not reordered; equal timestamps
        // re-apply last-write-wins.
        if let Some(prior) = state.as_ref() {
            if sample.recorded_at < prior.timestamp {
                return Err(InvalidSampleError::StaleTimestamp {
                    vehicle_id: sample.vehicle_id,
                    last: prior.timestamp,
                }
                .into());
            }
        }

        // Durable append before the in-memory commit. A failure from here on
        // leaves LiveState untouched and the caller retries the whole sample.
        sqlx::query(
            "INSERT INTO gps_log (vehicle_id, lat, lon, speed_kmh, heading, recorded_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(sample.vehicle_id)
        .bind(sample.lat)
        .bind(sample.lon)
        .bind(sample.speed_kmh)
        .bind(sample.heading)
        .bind(sample.recorded_at)
        .execute(&self.pool)
        .await?;

        let zones = Zone::by_route(&self.pool, &vehicle.route_name).await?;

        let prior_status = state
            .as_ref()
            .map(|s| s.zone_status.clone())
            .unwrap_or_default();
        let (zone_status, mut events) = evaluate_zones(
            &prior_status,
            &zones,
            coordinate,
            self.config.hysteresis_m,
            &sample,
        );

        if let Some(severity) = classify_speed(sample.speed_kmh, &self.config) {
            events.push(TrackingEvent::SpeedViolation {
                vehicle_id: sample.vehicle_id,
                speed_kmh: sample.speed_kmh,
                limit_kmh: self.config.speed_limit_kmh,
                severity,
                coordinate,
                timestamp: sample.recorded_at,
            });
        }

        *state = Some(LiveState {
            coordinate,
            speed_kmh: sample.speed_kmh,
            heading: sample.heading,
            timestamp: sample.recorded_at,
            zone_status,
        });

        // Publish while still holding the vehicle lock so deliveries for one
        // vehicle keep sample order.
        let topic = Topic::Vehicle(sample.vehicle_id);
        self.hub
            .publish(
                &topic,
                &TrackingEvent::PositionUpdate {
                    vehicle_id: sample.vehicle_id,
                    coordinate,
                    speed_kmh: sample.speed_kmh,
                    heading: sample.heading,
                    timestamp: sample.recorded_at,
                },
            )
            .await;
        for event in &events {
            self.hub.publish(&topic, event).await;
        }
        drop(state);

        debug!(
            vehicle_id = sample.vehicle_id,
            events = events.len(),
            "sample applied"
        );
        Ok(events)
    }
}

/// Compare the observed containment of each zone against the prior status
/// map and produce transition events. Statuses for zones no longer attached
/// to the route are dropped.
fn evaluate_zones(
    prior: &HashMap<i64, ZoneStatus>,
    zones: &[Zone],
    coordinate: Coordinate,
    hysteresis_m: f64,
    sample: &PositionSample,
) -> (HashMap<i64, ZoneStatus>, Vec<TrackingEvent>) {
    let mut next = HashMap::with_capacity(zones.len());
    let mut events = Vec::new();

    for zone in zones {
        let containment = geo::contains(coordinate, &zone.geometry);
        let mut observed = if containment.inside {
            ZoneStatus::Inside
        } else {
            ZoneStatus::Outside
        };
        let previous = prior.get(&zone.id).copied().unwrap_or(ZoneStatus::Unknown);

        // A vehicle idling on the boundary would flap between samples; keep
        // it inside until it clears the hysteresis band (circles only).
        if previous == ZoneStatus::Inside && observed == ZoneStatus::Outside && hysteresis_m > 0.0 {
            if let (ZoneGeometry::Circle { radius_m, .. }, Some(distance)) =
                (&zone.geometry, containment.distance_m)
            {
                if distance <= radius_m + hysteresis_m {
                    observed = ZoneStatus::Inside;
                }
            }
        }

        match (previous, observed) {
            (ZoneStatus::Unknown, status) => {
                // No prior context to transition from; record the status
                // without an enter/exit event.
                events.push(TrackingEvent::ZoneStatusInitialized {
                    vehicle_id: sample.vehicle_id,
                    zone_id: zone.id,
                    zone_name: zone.name.clone(),
                    status,
                    coordinate,
                    timestamp: sample.recorded_at,
                });
            }
            (ZoneStatus::Outside, ZoneStatus::Inside) => {
                events.push(TrackingEvent::ZoneEntered {
                    vehicle_id: sample.vehicle_id,
                    zone_id: zone.id,
                    zone_name: zone.name.clone(),
                    coordinate,
                    timestamp: sample.recorded_at,
                });
            }
            (ZoneStatus::Inside, ZoneStatus::Outside) => {
                events.push(TrackingEvent::ZoneExited {
                    vehicle_id: sample.vehicle_id,
                    zone_id: zone.id,
                    zone_name: zone.name.clone(),
                    coordinate,
                    timestamp: sample.recorded_at,
                });
            }
            _ => {}
        }

        next.insert(zone.id, observed);
    }

    (next, events)
}

/// Tier a speed reading against the configured limit.
fn classify_speed(speed_kmh: f64, config: &TrackingConfig) -> Option<Severity> {
    if speed_kmh >= config.speed_limit_kmh + config.critical_offset_kmh {
        Some(Severity::Critical)
    } else if speed_kmh >= config.speed_limit_kmh + config.high_offset_kmh {
        Some(Severity::High)
    } else if speed_kmh >= config.speed_limit_kmh {
        Some(Severity::Warning)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sqlx::sqlite::SqlitePoolOptions;

    // --- Pure transition detection ---

    fn gate_zone() -> Zone {
        Zone {
            id: 1,
            name: "School gate".to_string(),
            route_name: "route-a".to_string(),
            geometry: ZoneGeometry::Circle {
                center: Coordinate::new(-1.2864, 36.8172),
                radius_m: 500.0,
            },
        }
    }

    fn sample_at(lat: f64, lon: f64, offset_secs: i64) -> PositionSample {
        PositionSample {
            vehicle_id: 1,
            lat,
            lon,
            speed_kmh: 30.0,
            heading: None,
            recorded_at: Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn first_evaluation_initializes_without_enter_event() {
        let zones = vec![gate_zone()];
        let sample = sample_at(-1.2864, 36.8172, 0);
        let (status, events) =
            evaluate_zones(&HashMap::new(), &zones, sample.coordinate(), 0.0, &sample);

        assert_eq!(status.get(&1), Some(&ZoneStatus::Inside));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TrackingEvent::ZoneStatusInitialized {
                status: ZoneStatus::Inside,
                ..
            }
        ));
    }

    #[test]
    fn inside_outside_inside_emits_one_exit_then_one_enter() {
        let zones = vec![gate_zone()];
        let inside = sample_at(-1.2864, 36.8172, 0);
        let outside = sample_at(-1.2764, 36.8172, 10);
        let back = sample_at(-1.2864, 36.8172, 20);

        let (status, _) =
            evaluate_zones(&HashMap::new(), &zones, inside.coordinate(), 0.0, &inside);

        let (status, events) = evaluate_zones(&status, &zones, outside.coordinate(), 0.0, &outside);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::ZoneExited { zone_id: 1, .. }));

        let (status, events) = evaluate_zones(&status, &zones, back.coordinate(), 0.0, &back);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::ZoneEntered { zone_id: 1, .. }));

        // A repeated sample of the same status stays quiet.
        let again = sample_at(-1.2864, 36.8172, 30);
        let (_, events) = evaluate_zones(&status, &zones, again.coordinate(), 0.0, &again);
        assert!(events.is_empty());
    }

    #[test]
    fn hysteresis_band_suppresses_exit_near_boundary() {
        let zones = vec![gate_zone()];
        let inside = sample_at(-1.2864, 36.8172, 0);
        // Roughly 556 m from the center: outside the 500 m radius but within
        // a 100 m hysteresis band.
        let near_edge = sample_at(-1.2814, 36.8172, 10);
        let far = sample_at(-1.2764, 36.8172, 20);

        let (status, _) =
            evaluate_zones(&HashMap::new(), &zones, inside.coordinate(), 100.0, &inside);

        let (status, events) =
            evaluate_zones(&status, &zones, near_edge.coordinate(), 100.0, &near_edge);
        assert!(events.is_empty());
        assert_eq!(status.get(&1), Some(&ZoneStatus::Inside));

        let (_, events) = evaluate_zones(&status, &zones, far.coordinate(), 100.0, &far);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::ZoneExited { .. }));
    }

    #[test]
    fn speed_classification_tiers() {
        let config = TrackingConfig::default();
        assert_eq!(classify_speed(79.9, &config), None);
        assert_eq!(classify_speed(80.0, &config), Some(Severity::Warning));
        assert_eq!(classify_speed(94.9, &config), Some(Severity::Warning));
        assert_eq!(classify_speed(95.0, &config), Some(Severity::High));
        assert_eq!(classify_speed(104.9, &config), Some(Severity::High));
        assert_eq!(classify_speed(105.0, &config), Some(Severity::Critical));
    }

    // --- Full ingest path against an in-memory store ---

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO vehicles (id, registration, route_name, capacity)
             VALUES (1, 'KDA 123A', 'route-a', 33)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO zones (id, name, route_name, kind, center_lat, center_lon, radius_m)
             VALUES (1, 'School gate', 'route-a', 'circle', -1.2864, 36.8172, 500.0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    fn test_tracker(pool: SqlitePool) -> Tracker {
        Tracker::new(
            pool,
            Arc::new(VehicleStateStore::new()),
            Arc::new(Hub::new(8)),
            TrackingConfig::default(),
        )
    }

    async fn gps_log_count(pool: &SqlitePool) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM gps_log")
            .fetch_one(pool)
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn first_sample_inside_zone_initializes_membership() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        let events = tracker
            .ingest_position(sample_at(-1.2864, 36.8172, 0))
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TrackingEvent::ZoneStatusInitialized {
                status: ZoneStatus::Inside,
                ..
            }
        ));
        assert_eq!(gps_log_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn leaving_and_reentering_emits_exit_then_enter() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        tracker
            .ingest_position(sample_at(-1.2864, 36.8172, 0))
            .await
            .unwrap();

        let events = tracker
            .ingest_position(sample_at(-1.2764, 36.8172, 10))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::ZoneExited { .. }));

        let events = tracker
            .ingest_position(sample_at(-1.2864, 36.8172, 20))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TrackingEvent::ZoneEntered { .. }));
    }

    #[tokio::test]
    async fn stale_sample_is_rejected_and_state_unchanged() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        tracker
            .ingest_position(sample_at(-1.2864, 36.8172, 100))
            .await
            .unwrap();
        let before = tracker.states.get(1).await.unwrap();

        let result = tracker
            .ingest_position(sample_at(-1.2764, 36.8172, 50))
            .await;
        assert!(matches!(
            result,
            Err(IngestError::InvalidSample(
                InvalidSampleError::StaleTimestamp { .. }
            ))
        ));

        let after = tracker.states.get(1).await.unwrap();
        assert_eq!(after.coordinate, before.coordinate);
        assert_eq!(after.timestamp, before.timestamp);
        // The rejected sample is not logged either.
        assert_eq!(gps_log_count(&pool).await, 1);
    }

    #[tokio::test]
    async fn out_of_range_coordinate_is_rejected_without_side_effects() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        let result = tracker.ingest_position(sample_at(95.0, 36.8172, 0)).await;
        assert!(matches!(
            result,
            Err(IngestError::InvalidSample(
                InvalidSampleError::CoordinateOutOfRange { .. }
            ))
        ));
        assert!(tracker.states.get(1).await.is_none());
        assert_eq!(gps_log_count(&pool).await, 0);
    }

    #[tokio::test]
    async fn unknown_vehicle_is_rejected() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        let mut sample = sample_at(-1.2864, 36.8172, 0);
        sample.vehicle_id = 99;
        let result = tracker.ingest_position(sample).await;
        assert!(matches!(
            result,
            Err(IngestError::InvalidSample(
                InvalidSampleError::UnknownVehicle(99)
            ))
        ));
    }

    #[tokio::test]
    async fn speeding_sample_emits_tiered_violation() {
        let pool = test_pool().await;
        let tracker = test_tracker(pool.clone());

        let mut sample = sample_at(-1.2864, 36.8172, 0);
        sample.speed_kmh = 95.0;
        let events = tracker.ingest_position(sample).await.unwrap();

        let violation = events
            .iter()
            .find(|e| matches!(e, TrackingEvent::SpeedViolation { .. }))
            .expect("violation should be emitted");
        assert!(matches!(
            violation,
            TrackingEvent::SpeedViolation {
                severity: Severity::High,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn events_are_published_to_the_vehicle_channel() {
        let pool = test_pool().await;
        let states = Arc::new(VehicleStateStore::new());
        let hub = Arc::new(Hub::new(8));
        let tracker = Tracker::new(pool, states, hub.clone(), TrackingConfig::default());

        let (session, mut rx) = hub.connect().await;
        hub.subscribe(session, Topic::Vehicle(1)).await;

        tracker
            .ingest_position(sample_at(-1.2864, 36.8172, 0))
            .await
            .unwrap();

        // Position update first, then the zone initialization.
        let first = rx.recv().await.unwrap();
        assert!(first.contains("position_update"));
        let second = rx.recv().await.unwrap();
        assert!(second.contains("zone_status_initialized"));
    }
}
