use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Whether sessions without a token may track vehicles (read-only).
    #[serde(default)]
    pub allow_anonymous_tracking: bool,
    /// Tracking pipeline configuration
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// WebSocket session configuration
    #[serde(default)]
    pub ws: WsConfig,
}

/// Configuration for the membership transition pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Speed limit in km/h; readings at or above it are violations (default: 80)
    #[serde(default = "TrackingConfig::default_speed_limit_kmh")]
    pub speed_limit_kmh: f64,
    /// Offset above the limit for high severity (default: 15)
    #[serde(default = "TrackingConfig::default_high_offset_kmh")]
    pub high_offset_kmh: f64,
    /// Offset above the limit for critical severity (default: 25)
    #[serde(default = "TrackingConfig::default_critical_offset_kmh")]
    pub critical_offset_kmh: f64,
    /// Exit hysteresis band for circular zones in meters (default: 0).
    /// A vehicle inside a circle stays inside until it is more than
    /// radius + hysteresis away from the center, which stops membership
    /// flapping for vehicles idling near the boundary.
    #[serde(default)]
    pub hysteresis_m: f64,
    /// Days of GPS log history kept by the background sweep (default: 30)
    #[serde(default = "TrackingConfig::default_retention_days")]
    pub retention_days: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            speed_limit_kmh: Self::default_speed_limit_kmh(),
            high_offset_kmh: Self::default_high_offset_kmh(),
            critical_offset_kmh: Self::default_critical_offset_kmh(),
            hysteresis_m: 0.0,
            retention_days: Self::default_retention_days(),
        }
    }
}

impl TrackingConfig {
    fn default_speed_limit_kmh() -> f64 {
        80.0
    }
    fn default_high_offset_kmh() -> f64 {
        15.0
    }
    fn default_critical_offset_kmh() -> f64 {
        25.0
    }
    fn default_retention_days() -> u32 {
        30
    }
}

/// Configuration for live WebSocket sessions
#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// Bounded per-session outbound queue capacity (default: 64).
    /// A session whose queue overflows is disconnected rather than
    /// buffered without bound.
    #[serde(default = "WsConfig::default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: Self::default_outbound_queue_capacity(),
        }
    }
}

impl WsConfig {
    fn default_outbound_queue_capacity() -> usize {
        64
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
