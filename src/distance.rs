//! distance.rs
//! Great-circle distance on a 6371 km sphere. Every point-to-point distance in
//! the crate (density radius, alternatives, nearby lists, walking estimates)
//! goes through `haversine_m`.

use crate::models::types::Coord;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Walking pace used for straight-line estimates (5 km/h).
pub const WALKING_MIN_PER_KM: f64 = 12.0;

#[inline]
pub fn haversine_m(a: Coord, b: Coord) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let h = h.clamp(0.0, 1.0);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Rounded walking minutes for a distance.
#[inline]
pub fn walking_minutes(distance_m: f64) -> u32 {
    (distance_m / 1000.0 * WALKING_MIN_PER_KM).round().max(0.0) as u32
}

pub fn polyline_length_m(points: &[Coord]) -> f64 {
    points.windows(2).map(|w| haversine_m(w[0], w[1])).sum()
}
