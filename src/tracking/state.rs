use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use utoipa::ToSchema;

use crate::models::Coordinate;

/// Membership of a vehicle in a single zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStatus {
    Inside,
    Outside,
    /// No sample has been evaluated against this zone yet
    Unknown,
}

/// Last-known live state of one vehicle.
///
/// In-memory only and discarded on restart; durable history lives in the
/// GPS log.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LiveState {
    pub coordinate: Coordinate,
    pub speed_kmh: f64,
    pub heading: Option<f64>,
    /// Timestamp of the last applied sample
    pub timestamp: DateTime<Utc>,
    /// Membership per zone id, as of the last applied sample
    pub zone_status: HashMap<i64, ZoneStatus>,
}

/// Per-vehicle slot; None until the first accepted sample
pub type VehicleSlot = Arc<Mutex<Option<LiveState>>>;

/// Concurrency-safe table of live vehicle state.
///
/// The outer lock is held only long enough to look up or insert a slot; the
/// per-vehicle mutex serializes sample processing for one vehicle without
/// blocking any other vehicle.
#[derive(Default)]
pub struct VehicleStateStore {
    slots: RwLock<HashMap<i64, VehicleSlot>>,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the slot for a vehicle.
    pub async fn slot(&self, vehicle_id: i64) -> VehicleSlot {
        if let Some(slot) = self.slots.read().await.get(&vehicle_id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots.entry(vehicle_id).or_default().clone()
    }

    /// Snapshot of a vehicle's live state, if it has reported since startup.
    pub async fn get(&self, vehicle_id: i64) -> Option<LiveState> {
        let slot = self.slots.read().await.get(&vehicle_id)?.clone();
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Number of vehicles with live state.
    pub async fn tracked_count(&self) -> usize {
        let slots = self.slots.read().await;
        let mut count = 0;
        for slot in slots.values() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state_at(lat: f64, lon: f64) -> LiveState {
        LiveState {
            coordinate: Coordinate::new(lat, lon),
            speed_kmh: 30.0,
            heading: None,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap(),
            zone_status: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn get_returns_none_before_first_sample() {
        let store = VehicleStateStore::new();
        assert!(store.get(1).await.is_none());
        assert_eq!(store.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn slot_write_is_visible_through_get() {
        let store = VehicleStateStore::new();
        let slot = store.slot(1).await;
        *slot.lock().await = Some(state_at(-1.28, 36.81));

        let snapshot = store.get(1).await.expect("state was written");
        assert_eq!(snapshot.coordinate.lat, -1.28);
        assert_eq!(store.tracked_count().await, 1);
    }

    #[tokio::test]
    async fn slot_is_stable_across_lookups() {
        let store = VehicleStateStore::new();
        let a = store.slot(1).await;
        let b = store.slot(1).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn holding_one_vehicle_lock_does_not_block_another() {
        let store = VehicleStateStore::new();
        let slot_one = store.slot(1).await;
        let _held = slot_one.lock().await;

        // A different vehicle must remain fully usable while vehicle 1 is
        // being processed.
        let slot_two = store.slot(2).await;
        let mut guard = slot_two.lock().await;
        *guard = Some(state_at(0.0, 0.0));
        drop(guard);
        assert!(store.get(2).await.is_some());
    }
}
