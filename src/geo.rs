//! Geofence evaluation: pure geometric predicates over zone geometry.
//!
//! Stateless and lock-free; safe to call from any number of tasks.

use crate::models::{Coordinate, ZoneGeometry};

/// Mean Earth radius in meters, as used by the haversine formula.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Result of a containment check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Containment {
    pub inside: bool,
    /// Distance to the zone center in meters; only computed for circles
    pub distance_m: Option<f64>,
}

/// Great-circle distance between two coordinates in meters (haversine).
pub fn haversine_distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Decide whether a point lies inside a zone.
///
/// Circle membership is boundary-inclusive: a point at exactly the radius
/// counts as inside. Polygon membership uses the even-odd ray casting rule
/// over the edge list, including the implicit closing edge.
pub fn contains(point: Coordinate, geometry: &ZoneGeometry) -> Containment {
    match geometry {
        ZoneGeometry::Circle { center, radius_m } => {
            let distance = haversine_distance_m(point, *center);
            Containment {
                inside: distance <= *radius_m,
                distance_m: Some(distance),
            }
        }
        ZoneGeometry::Polygon { vertices } => Containment {
            inside: point_in_polygon(point, vertices),
            distance_m: None,
        },
    }
}

/// Even-odd ray casting: count edge crossings of a ray extending east from
/// the point; an odd count means the point is inside.
fn point_in_polygon(point: Coordinate, vertices: &[Coordinate]) -> bool {
    if vertices.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = vertices.len() - 1;
    for i in 0..vertices.len() {
        let vi = vertices[i];
        let vj = vertices[j];
        if (vi.lat > point.lat) != (vj.lat > point.lat) {
            let lon_at_lat = (vj.lon - vi.lon) * (point.lat - vi.lat) / (vj.lat - vi.lat) + vi.lon;
            if point.lon < lon_at_lat {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_around_origin() -> ZoneGeometry {
        ZoneGeometry::Polygon {
            vertices: vec![
                Coordinate::new(-1.0, -1.0),
                Coordinate::new(-1.0, 1.0),
                Coordinate::new(1.0, 1.0),
                Coordinate::new(1.0, -1.0),
            ],
        }
    }

    #[test]
    fn circle_center_is_inside_with_zero_distance() {
        let center = Coordinate::new(-1.2864, 36.8172);
        let zone = ZoneGeometry::Circle {
            center,
            radius_m: 500.0,
        };
        let result = contains(center, &zone);
        assert!(result.inside);
        let distance = result.distance_m.expect("circle check returns distance");
        assert!(distance < 1e-6, "distance was {}", distance);
    }

    #[test]
    fn circle_membership_is_boundary_inclusive() {
        let center = Coordinate::new(-1.2864, 36.8172);
        let point = Coordinate::new(-1.2814, 36.8172);
        // Use the measured distance as the radius so the point sits exactly
        // on the boundary.
        let radius_m = haversine_distance_m(center, point);
        let zone = ZoneGeometry::Circle { center, radius_m };
        assert!(contains(point, &zone).inside);
    }

    #[test]
    fn circle_point_beyond_radius_is_outside() {
        let zone = ZoneGeometry::Circle {
            center: Coordinate::new(-1.2864, 36.8172),
            radius_m: 500.0,
        };
        // Roughly 1.1 km north of the center.
        let result = contains(Coordinate::new(-1.2764, 36.8172), &zone);
        assert!(!result.inside);
        assert!(result.distance_m.unwrap() > 1000.0);
    }

    #[test]
    fn polygon_contains_interior_point() {
        let result = contains(Coordinate::new(0.5, 0.5), &square_around_origin());
        assert!(result.inside);
        assert_eq!(result.distance_m, None);
    }

    #[test]
    fn polygon_excludes_exterior_point() {
        assert!(!contains(Coordinate::new(2.0, 2.0), &square_around_origin()).inside);
    }

    #[test]
    fn polygon_excludes_point_far_outside_bounding_box() {
        assert!(!contains(Coordinate::new(50.0, -120.0), &square_around_origin()).inside);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = Coordinate::new(48.37, 10.89);
        let b = Coordinate::new(48.38, 10.90);
        let d1 = haversine_distance_m(a, b);
        let d2 = haversine_distance_m(b, a);
        assert!((d1 - d2).abs() < 1e-9);
        assert!(d1 > 1000.0 && d1 < 2000.0, "distance was {}", d1);
    }
}
