//! Geodetic (WGS-84) to local NED conversions about the home location.
//!
//! Local tangent-plane approximation using the WGS-84 radii of curvature at
//! the home latitude; accurate to well under a metre over the few-kilometre
//! extent of a waypoint mission.

use nalgebra::Vector2;
use types::{PositionGlobal, PositionLocal};

/// WGS-84 semi-major axis, metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Per-axis metres-per-radian scale of the tangent plane at the given
/// latitude: the meridian radius of curvature for north, the prime-vertical
/// radius shrunk by cos(latitude) for east.
fn tangent_plane_scale(latitude_rad: f64) -> Vector2<f64> {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let sin2 = latitude_rad.sin() * latitude_rad.sin();
    let denom = 1.0 - e2 * sin2;
    let meridian = WGS84_A * (1.0 - e2) / (denom * denom.sqrt());
    let prime_vertical = WGS84_A / denom.sqrt();
    Vector2::new(meridian, prime_vertical * latitude_rad.cos())
}

/// Convert a geodetic position to NED relative to `home`.
pub fn global_to_local(global: &PositionGlobal, home: &PositionGlobal) -> PositionLocal {
    let scale = tangent_plane_scale(home.latitude.to_radians());
    let angular = Vector2::new(
        (global.latitude - home.latitude).to_radians(),
        (global.longitude - home.longitude).to_radians(),
    );
    let horizontal = angular.component_mul(&scale);

    PositionLocal {
        north: horizontal.x,
        east: horizontal.y,
        down: home.altitude - global.altitude,
    }
}

/// Convert an NED position relative to `home` back to geodetic.
pub fn local_to_global(local: &PositionLocal, home: &PositionGlobal) -> PositionGlobal {
    let scale = tangent_plane_scale(home.latitude.to_radians());
    let angular = Vector2::new(local.north, local.east).component_div(&scale);

    PositionGlobal {
        latitude: home.latitude + angular.x.to_degrees(),
        longitude: home.longitude + angular.y.to_degrees(),
        altitude: home.altitude - local.down,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn home() -> PositionGlobal {
        PositionGlobal {
            latitude: 43.4728,
            longitude: -80.5400,
            altitude: 334.0,
        }
    }

    #[test]
    fn test_home_maps_to_origin() {
        let local = global_to_local(&home(), &home());
        assert_relative_eq!(local.north, 0.0, epsilon = 1e-9);
        assert_relative_eq!(local.east, 0.0, epsilon = 1e-9);
        assert_relative_eq!(local.down, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_north_displacement_sign() {
        let mut position = home();
        position.latitude += 0.001;
        let local = global_to_local(&position, &home());
        assert!(local.north > 0.0);
        assert_relative_eq!(local.east, 0.0, epsilon = 1e-6);
        // 0.001 degrees of latitude is roughly 111 m.
        assert!((local.north - 111.0).abs() < 1.0);
    }

    #[test]
    fn test_east_displacement_sign() {
        let mut position = home();
        position.longitude += 0.001;
        let local = global_to_local(&position, &home());
        assert!(local.east > 0.0);
        assert_relative_eq!(local.north, 0.0, epsilon = 1e-6);
        // Longitude spacing shrinks with cos(latitude): ~81 m here.
        assert!((local.east - 111.0 * home().latitude.to_radians().cos()).abs() < 1.0);
    }

    #[test]
    fn test_altitude_maps_to_down() {
        let mut position = home();
        position.altitude += 30.0;
        let local = global_to_local(&position, &home());
        assert_relative_eq!(local.down, -30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_roundtrip_within_mission_extent() {
        let home = home();
        for &(north, east, down) in &[
            (0.0, 0.0, 0.0),
            (100.0, -250.0, -40.0),
            (-1200.0, 800.0, 15.0),
            (5000.0, 5000.0, -120.0),
        ] {
            let local = PositionLocal::new(north, east, down);
            let global = local_to_global(&local, &home);
            let back = global_to_local(&global, &home);
            assert_relative_eq!(back.north, north, epsilon = 1e-6);
            assert_relative_eq!(back.east, east, epsilon = 1e-6);
            assert_relative_eq!(back.down, down, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_tangent_plane_scale_bounds() {
        let scale = tangent_plane_scale(45.0_f64.to_radians());
        // The north scale is the meridian radius of curvature, a little
        // under the semi-major axis at mid latitudes.
        assert!(scale.x > 6.3e6 && scale.x < 6.4e6);
        // The east scale carries the cos(latitude) compression.
        assert!(scale.y < scale.x);
        assert!((scale.y - scale.x * 45.0_f64.to_radians().cos()).abs() / scale.y < 0.01);
    }
}
