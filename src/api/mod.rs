pub mod error;
pub mod health;
pub mod positions;
pub mod trips;
pub mod vehicles;
pub mod ws;
pub mod zones;

pub use error::{internal_error, not_found, ErrorResponse};

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::broadcast::Hub;
use crate::tracking::{Tracker, VehicleStateStore};

pub fn router(
    pool: SqlitePool,
    tracker: Arc<Tracker>,
    states: Arc<VehicleStateStore>,
    hub: Arc<Hub>,
    allow_anonymous: bool,
) -> Router {
    let ws_state = ws::WsState {
        pool: pool.clone(),
        hub: hub.clone(),
        allow_anonymous,
    };

    Router::new()
        .nest("/positions", positions::router(tracker))
        .nest("/vehicles", vehicles::router(pool.clone(), states.clone()))
        .nest("/zones", zones::router(pool.clone()))
        .nest("/trips", trips::router(pool.clone(), hub.clone()))
        .nest("/health", health::router(pool, states, hub))
        .route("/ws", get(ws::ws_tracking).with_state(ws_state))
}
