pub mod api;
mod attendance;
mod auth;
mod broadcast;
mod config;
mod geo;
mod models;
mod tracking;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use broadcast::Hub;
use config::Config;
use tracking::{Tracker, VehicleStateStore};

#[derive(OpenApi)]
#[openapi(
    info(title = "BusWatch API", version = "0.1.0"),
    paths(
        api::positions::ingest_position,
        api::vehicles::list_vehicles,
        api::vehicles::get_vehicle_state,
        api::vehicles::get_vehicle_log,
        api::zones::list_zones,
        api::zones::create_zone,
        api::trips::start_trip,
        api::trips::record_attendance,
        api::trips::complete_trip,
        api::trips::get_absentees,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::positions::IngestResponse,
        api::vehicles::VehicleListResponse,
        api::vehicles::VehicleSummary,
        api::vehicles::VehicleStateResponse,
        api::vehicles::VehicleLogResponse,
        api::zones::ZoneListResponse,
        api::zones::CreateZoneRequest,
        api::trips::RecordAttendanceRequest,
        api::trips::CompleteTripResponse,
        api::trips::AbsenteeListResponse,
        api::health::HealthResponse,
        models::Coordinate,
        models::PositionSample,
        models::Vehicle,
        models::Student,
        models::Trip,
        models::TripStatus,
        models::AttendanceRecord,
        models::AttendanceEventType,
        models::GpsLogEntry,
        models::Zone,
        models::ZoneGeometry,
        tracking::LiveState,
        tracking::ZoneStatus,
        tracking::TrackingEvent,
        tracking::Severity,
    )),
    tags(
        (name = "positions", description = "Raw position sample ingestion"),
        (name = "vehicles", description = "Fleet and live vehicle state"),
        (name = "zones", description = "Geofence zone management"),
        (name = "trips", description = "Trip lifecycle and attendance reconciliation"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    tracing::info!(
        speed_limit_kmh = config.tracking.speed_limit_kmh,
        hysteresis_m = config.tracking.hysteresis_m,
        "Loaded configuration"
    );

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize SQLite database
    let cwd = std::env::current_dir().expect("Failed to get current directory");
    let db_path = cwd.join("database");
    if let Err(e) = std::fs::create_dir_all(&db_path) {
        tracing::warn!("Could not create database directory: {}", e);
    }
    let db_file = db_path.join("data.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_file.display());
    let pool = SqlitePool::connect(&db_url)
        .await
        .expect("Failed to connect to SQLite database");

    // Run migrations
    let migrator = sqlx::migrate!("./migrations");
    tracing::info!(migrations = migrator.migrations.len(), "Found migrations");
    migrator.run(&pool).await.expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Shared tracking state
    let states = Arc::new(VehicleStateStore::new());
    let hub = Arc::new(Hub::new(config.ws.outbound_queue_capacity));
    let tracker = Arc::new(Tracker::new(
        pool.clone(),
        states.clone(),
        hub.clone(),
        config.tracking.clone(),
    ));

    // Background GPS log retention sweep
    let sweep_pool = pool.clone();
    let retention_days = config.tracking.retention_days;
    tokio::spawn(async move {
        tracking::run_retention_sweep(sweep_pool, retention_days).await;
    });

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest(
            "/api",
            api::router(
                pool.clone(),
                tracker,
                states,
                hub,
                config.allow_anonymous_tracking,
            ),
        )
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind to port 3000");

    tracing::info!("Server running on http://localhost:3000");
    tracing::info!("Swagger UI: http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "BusWatch API"
}
