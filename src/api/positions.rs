use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::ErrorResponse;
use crate::models::PositionSample;
use crate::tracking::{IngestError, Tracker, TrackingEvent};

#[derive(Clone)]
pub struct PositionsState {
    pub tracker: Arc<Tracker>,
}

/// Result of ingesting one position sample
#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    /// Whether the sample was applied
    pub accepted: bool,
    /// Domain events emitted by this sample
    pub events: Vec<TrackingEvent>,
}

/// Ingest a raw position sample from a device gateway
#[utoipa::path(
    post,
    path = "/api/positions",
    request_body = PositionSample,
    responses(
        (status = 200, description = "Sample applied; emitted events returned", body = IngestResponse),
        (status = 422, description = "Invalid sample (out of range, stale, or unknown vehicle); do not resend it", body = ErrorResponse),
        (status = 503, description = "Durable store unavailable; retry the whole sample", body = ErrorResponse)
    ),
    tag = "positions"
)]
pub async fn ingest_position(
    State(state): State<PositionsState>,
    Json(sample): Json<PositionSample>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.tracker.ingest_position(sample).await {
        Ok(events) => Ok(Json(IngestResponse {
            accepted: true,
            events,
        })),
        Err(IngestError::InvalidSample(e)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
        Err(IngestError::Dependency(e)) => {
            tracing::error!("position ingest failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: format!("Store unavailable: {}", e),
                }),
            ))
        }
    }
}

pub fn router(tracker: Arc<Tracker>) -> Router {
    Router::new()
        .route("/", post(ingest_position))
        .with_state(PositionsState { tracker })
}
