//! Great-circle helpers.

use crate::types::Coordinate;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates, in meters.
///
/// ```
/// use rumpel_types::{Coordinate, geo::haversine_distance};
///
/// let a = Coordinate { latitude: 51.5, longitude: -0.1 };
/// let b = Coordinate { latitude: 51.5009, longitude: -0.1 };
/// let d = haversine_distance(&a, &b);
/// assert!((d - 100.07).abs() < 0.1);
/// ```
#[must_use]
pub fn haversine_distance(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp guards against rounding pushing h slightly above 1.
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

/// Point reached by travelling `distance_meters` from `origin` along the
/// initial `bearing_degrees` (clockwise from north).
#[must_use]
pub fn destination(origin: &Coordinate, bearing_degrees: f64, distance_meters: f64) -> Coordinate {
    let delta = distance_meters / EARTH_RADIUS_METERS;
    let theta = bearing_degrees.to_radians();
    let lat1 = origin.latitude.to_radians();
    let lon1 = origin.longitude.to_radians();

    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * theta.cos()).asin();
    let lon2 = lon1
        + (theta.sin() * delta.sin() * lat1.cos()).atan2(delta.cos() - lat1.sin() * lat2.sin());

    Coordinate {
        latitude: lat2.to_degrees(),
        // Normalise to -180..=180
        longitude: (lon2.to_degrees() + 540.0) % 360.0 - 180.0,
    }
}
