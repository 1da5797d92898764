//! Live vehicle tracking: per-vehicle state, membership transition
//! detection, and the events both produce.

pub mod events;
pub mod pipeline;
pub mod state;

pub use events::{Severity, TrackingEvent};
pub use pipeline::{IngestError, InvalidSampleError, Tracker};
pub use state::{LiveState, VehicleStateStore, ZoneStatus};

use sqlx::SqlitePool;

/// Background sweep that prunes GPS log rows past the retention window.
/// Runs every six hours for the lifetime of the process.
pub async fn run_retention_sweep(pool: SqlitePool, retention_days: u32) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(6 * 60 * 60));
    // Skip the immediate first tick; there is nothing to prune at startup.
    interval.tick().await;

    loop {
        interval.tick().await;
        let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days as i64);
        match sqlx::query("DELETE FROM gps_log WHERE recorded_at < ?")
            .bind(cutoff)
            .execute(&pool)
            .await
        {
            Ok(result) if result.rows_affected() > 0 => {
                tracing::info!(pruned = result.rows_affected(), "GPS log retention sweep");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("GPS log retention sweep failed: {}", e),
        }
    }
}
