use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;

use super::Coordinate;

/// Geometry of a geofence zone
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum ZoneGeometry {
    /// Circular zone; membership is great-circle distance to the center
    Circle {
        center: Coordinate,
        /// Radius in meters; membership is boundary-inclusive
        radius_m: f64,
    },
    /// Polygonal zone; ordered vertices with an implicit closing edge
    Polygon { vertices: Vec<Coordinate> },
}

/// Rejected zone construction. Zones are validated at the boundary and never
/// partially applied.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("circle radius must be positive, got {0}")]
    NonPositiveRadius(f64),
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("coordinate out of range: lat {lat}, lon {lon}")]
    CoordinateOutOfRange { lat: f64, lon: f64 },
}

impl ZoneGeometry {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ZoneGeometry::Circle { center, radius_m } => {
                if !center.is_in_range() {
                    return Err(ValidationError::CoordinateOutOfRange {
                        lat: center.lat,
                        lon: center.lon,
                    });
                }
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(ValidationError::NonPositiveRadius(*radius_m));
                }
                Ok(())
            }
            ZoneGeometry::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(ValidationError::TooFewVertices(vertices.len()));
                }
                for v in vertices {
                    if !v.is_in_range() {
                        return Err(ValidationError::CoordinateOutOfRange {
                            lat: v.lat,
                            lon: v.lon,
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

/// A named geofence tied to a route
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Zone {
    pub id: i64,
    pub name: String,
    /// Route whose vehicles are evaluated against this zone
    pub route_name: String,
    pub geometry: ZoneGeometry,
}

impl Zone {
    /// Zones attached to a route. Rows with corrupt geometry are skipped.
    pub async fn by_route(pool: &SqlitePool, route_name: &str) -> Result<Vec<Zone>, sqlx::Error> {
        let rows: Vec<ZoneRow> = sqlx::query_as(
            "SELECT id, name, route_name, kind, center_lat, center_lon, radius_m, vertices
             FROM zones WHERE route_name = ?",
        )
        .bind(route_name)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().filter_map(ZoneRow::into_zone).collect())
    }
}

/// Database row shape for zones; geometry columns are nullable per kind
#[derive(Debug, sqlx::FromRow)]
pub struct ZoneRow {
    pub id: i64,
    pub name: String,
    pub route_name: String,
    pub kind: String,
    pub center_lat: Option<f64>,
    pub center_lon: Option<f64>,
    pub radius_m: Option<f64>,
    /// JSON array of {lat, lon} objects for polygon zones
    pub vertices: Option<String>,
}

impl ZoneRow {
    /// Convert a stored row into a domain zone. Rows that no longer satisfy
    /// the construction invariants are dropped with a warning.
    pub fn into_zone(self) -> Option<Zone> {
        let geometry = match self.kind.as_str() {
            "circle" => ZoneGeometry::Circle {
                center: Coordinate::new(self.center_lat?, self.center_lon?),
                radius_m: self.radius_m?,
            },
            "polygon" => {
                let raw = self.vertices?;
                let vertices: Vec<Coordinate> = match serde_json::from_str(&raw) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(zone = self.id, "unreadable polygon vertices: {}", e);
                        return None;
                    }
                };
                ZoneGeometry::Polygon { vertices }
            }
            other => {
                tracing::warn!(zone = self.id, "unknown zone kind: {}", other);
                return None;
            }
        };

        if let Err(e) = geometry.validate() {
            tracing::warn!(zone = self.id, "stored zone fails validation: {}", e);
            return None;
        }

        Some(Zone {
            id: self.id,
            name: self.name,
            route_name: self.route_name,
            geometry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_with_positive_radius_is_valid() {
        let geometry = ZoneGeometry::Circle {
            center: Coordinate::new(-1.2864, 36.8172),
            radius_m: 500.0,
        };
        assert!(geometry.validate().is_ok());
    }

    #[test]
    fn circle_with_zero_radius_is_rejected() {
        let geometry = ZoneGeometry::Circle {
            center: Coordinate::new(0.0, 0.0),
            radius_m: 0.0,
        };
        assert!(matches!(
            geometry.validate(),
            Err(ValidationError::NonPositiveRadius(_))
        ));
    }

    #[test]
    fn circle_with_negative_radius_is_rejected() {
        let geometry = ZoneGeometry::Circle {
            center: Coordinate::new(0.0, 0.0),
            radius_m: -10.0,
        };
        assert!(matches!(
            geometry.validate(),
            Err(ValidationError::NonPositiveRadius(_))
        ));
    }

    #[test]
    fn polygon_with_two_vertices_is_rejected() {
        let geometry = ZoneGeometry::Polygon {
            vertices: vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0)],
        };
        assert!(matches!(
            geometry.validate(),
            Err(ValidationError::TooFewVertices(2))
        ));
    }

    #[test]
    fn polygon_with_out_of_range_vertex_is_rejected() {
        let geometry = ZoneGeometry::Polygon {
            vertices: vec![
                Coordinate::new(0.0, 0.0),
                Coordinate::new(95.0, 0.0),
                Coordinate::new(1.0, 1.0),
            ],
        };
        assert!(matches!(
            geometry.validate(),
            Err(ValidationError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn zone_row_round_trips_polygon_vertices() {
        let vertices = vec![
            Coordinate::new(-1.0, -1.0),
            Coordinate::new(-1.0, 1.0),
            Coordinate::new(1.0, 1.0),
            Coordinate::new(1.0, -1.0),
        ];
        let row = ZoneRow {
            id: 7,
            name: "Depot".to_string(),
            route_name: "route-a".to_string(),
            kind: "polygon".to_string(),
            center_lat: None,
            center_lon: None,
            radius_m: None,
            vertices: Some(serde_json::to_string(&vertices).unwrap()),
        };
        let zone = row.into_zone().expect("row should convert");
        match zone.geometry {
            ZoneGeometry::Polygon { vertices: v } => assert_eq!(v.len(), 4),
            _ => panic!("expected polygon geometry"),
        }
    }

    #[test]
    fn zone_row_with_corrupt_geometry_is_dropped() {
        let row = ZoneRow {
            id: 8,
            name: "Broken".to_string(),
            route_name: "route-a".to_string(),
            kind: "circle".to_string(),
            center_lat: Some(0.0),
            center_lon: Some(0.0),
            radius_m: Some(-1.0),
            vertices: None,
        };
        assert!(row.into_zone().is_none());
    }
}
