//! Valley selection: polar obstacle density to steering command.

use tracing::debug;
use types::{FlightMode, OdometryAndWaypoint, PolarObstacleDensity, SteeringCommand};

/// Valley-selection parameters.
#[derive(Debug, Clone, Copy)]
pub struct SteeringConfig {
    /// Sectors below this density count as open.
    pub density_threshold: f64,
    /// Minimum consecutive open sectors for a usable valley.
    pub min_consec_sectors: usize,
    /// Angular span, degrees, a valley must cover around 0° for the
    /// straight-line path to count as clear.
    pub wide_valley_threshold: f64,
}

/// A maximal run of open sectors.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Valley {
    angle_start: f64,
    angle_end: f64,
}

impl Valley {
    fn centre(&self) -> f64 {
        (self.angle_start + self.angle_end) / 2.0
    }
}

/// Computes steering commands from polar obstacle densities.
#[derive(Debug)]
pub struct SteeringPlanner {
    config: SteeringConfig,
}

impl SteeringPlanner {
    pub fn new(config: SteeringConfig) -> Self {
        Self { config }
    }

    /// Select a heading around the obstacle field.
    ///
    /// Returns [`SteeringCommand::NoChange`] when the autopilot's own
    /// straight-line path is clear (AUTO mode, wide valley spanning 0°),
    /// [`SteeringCommand::Reverse`] on total blockage, and the centre angle
    /// of the valley closest to the waypoint bearing otherwise.
    pub fn run(
        &self,
        density: &PolarObstacleDensity,
        odometry: &OdometryAndWaypoint,
    ) -> SteeringCommand {
        let target_angle = self.target_angle(odometry);
        let valleys = self.candidate_valleys(density);

        if odometry.flight_mode == FlightMode::Auto {
            let half = self.config.wide_valley_threshold / 2.0;
            if valleys
                .iter()
                .any(|v| v.angle_start <= -half && v.angle_end >= half)
            {
                return SteeringCommand::NoChange;
            }
        }

        let best = valleys.iter().min_by(|a, b| {
            let da = (a.centre() - target_angle).abs();
            let db = (b.centre() - target_angle).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

        match best {
            Some(valley) => {
                debug!(
                    start = valley.angle_start,
                    end = valley.angle_end,
                    centre = valley.centre(),
                    target = target_angle,
                    "selected valley"
                );
                SteeringCommand::Angle(valley.centre())
            }
            None => SteeringCommand::Reverse,
        }
    }

    /// Bearing from the drone's local position to the next waypoint, degrees.
    fn target_angle(&self, odometry: &OdometryAndWaypoint) -> f64 {
        let delta_north = odometry.next_waypoint.north - odometry.local_position.north;
        let delta_east = odometry.next_waypoint.east - odometry.local_position.east;
        delta_east.atan2(delta_north).to_degrees()
    }

    /// Maximal runs of open sectors, at least `min_consec_sectors` long.
    fn candidate_valleys(&self, density: &PolarObstacleDensity) -> Vec<Valley> {
        let mut valleys = Vec::new();
        let mut run: Option<(f64, f64, usize)> = None;

        for sector in &density.sectors {
            if sector.density < self.config.density_threshold {
                run = match run {
                    Some((start, _, len)) => Some((start, sector.angle_end, len + 1)),
                    None => Some((sector.angle_start, sector.angle_end, 1)),
                };
            } else if let Some((start, end, len)) = run.take() {
                if len >= self.config.min_consec_sectors {
                    debug!(start, end, "identified valley");
                    valleys.push(Valley {
                        angle_start: start,
                        angle_end: end,
                    });
                }
            }
        }

        if let Some((start, end, len)) = run {
            if len >= self.config.min_consec_sectors {
                debug!(start, end, "identified valley");
                valleys.push(Valley {
                    angle_start: start,
                    angle_end: end,
                });
            }
        }

        valleys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{Orientation, PositionLocal, SectorObstacleDensity};

    fn planner() -> SteeringPlanner {
        SteeringPlanner::new(SteeringConfig {
            density_threshold: 0.5,
            min_consec_sectors: 3,
            wide_valley_threshold: 10.0,
        })
    }

    /// 36 sectors of 5 degrees covering [-90, 90].
    fn density_from(densities: &[f64]) -> PolarObstacleDensity {
        assert_eq!(densities.len(), 36);
        PolarObstacleDensity {
            sectors: densities
                .iter()
                .enumerate()
                .map(|(i, &density)| {
                    let angle_start = -90.0 + i as f64 * 5.0;
                    SectorObstacleDensity {
                        angle_start,
                        angle_end: angle_start + 5.0,
                        density,
                    }
                })
                .collect(),
        }
    }

    fn odometry_with(mode: FlightMode, waypoint_north: f64, waypoint_east: f64) -> OdometryAndWaypoint {
        OdometryAndWaypoint::new(
            PositionLocal::default(),
            Orientation::default(),
            mode,
            PositionLocal::new(waypoint_north, waypoint_east, 0.0),
        )
    }

    #[test]
    fn test_open_space_in_auto_is_no_change() {
        let density = density_from(&[0.0; 36]);
        let odometry = odometry_with(FlightMode::Auto, 10.0, 0.0);
        assert_eq!(planner().run(&density, &odometry), SteeringCommand::NoChange);
    }

    #[test]
    fn test_total_blockage_is_reverse() {
        let density = density_from(&[0.8; 36]);
        let odometry = odometry_with(FlightMode::Auto, 10.0, 0.0);
        assert_eq!(planner().run(&density, &odometry), SteeringCommand::Reverse);
    }

    #[test]
    fn test_obstructed_front_steers_to_nearest_valley() {
        // Only the sector containing 0° is blocked; target straight ahead.
        let mut densities = [0.0; 36];
        densities[18] = 0.8; // [0, 5)
        let density = density_from(&densities);
        let odometry = odometry_with(FlightMode::Auto, 10.0, 0.0);

        // Valleys are [-90, 0] and [5, 90]; centres -45 and 47.5. The
        // below-zero side is closer to the 0° target.
        match planner().run(&density, &odometry) {
            SteeringCommand::Angle(angle) => {
                assert!((angle - (-45.0)).abs() < 1e-9);
            }
            other => panic!("expected angle, got {other:?}"),
        }
    }

    #[test]
    fn test_short_valleys_are_dropped() {
        // Open runs of two sectors separated by blocked sectors; minimum is
        // three, so nothing qualifies.
        let mut densities = [0.8; 36];
        for i in (0..36).step_by(3) {
            densities[i] = 0.0;
            if i + 1 < 36 {
                densities[i + 1] = 0.0;
            }
        }
        let density = density_from(&densities);
        let odometry = odometry_with(FlightMode::Auto, 10.0, 0.0);
        assert_eq!(planner().run(&density, &odometry), SteeringCommand::Reverse);
    }

    #[test]
    fn test_wide_valley_pre_check_only_in_auto() {
        let density = density_from(&[0.0; 36]);
        let odometry = odometry_with(FlightMode::Guided, 10.0, 0.0);

        // Outside AUTO the clear path is still steered explicitly: the
        // whole extent is one valley centred at 0.
        match planner().run(&density, &odometry) {
            SteeringCommand::Angle(angle) => assert!(angle.abs() < 1e-9),
            other => panic!("expected angle, got {other:?}"),
        }
    }

    #[test]
    fn test_narrow_central_valley_is_not_wide() {
        // Open only in [-5, 5]: spans 0° but not ±(threshold/2) beyond it
        // once the threshold is widened past its width.
        let planner = SteeringPlanner::new(SteeringConfig {
            density_threshold: 0.5,
            min_consec_sectors: 2,
            wide_valley_threshold: 40.0,
        });
        let mut densities = [0.8; 36];
        densities[17] = 0.2;
        densities[18] = 0.2;
        let density = density_from(&densities);
        let odometry = odometry_with(FlightMode::Auto, 10.0, 0.0);

        match planner.run(&density, &odometry) {
            SteeringCommand::Angle(angle) => assert!(angle.abs() < 1e-9),
            other => panic!("expected angle, got {other:?}"),
        }
    }

    #[test]
    fn test_valley_nearest_waypoint_bearing_wins() {
        // Two valleys: [-90, -55] and [40, 90]. Waypoint bears +45°.
        let mut densities = [0.8; 36];
        for (i, d) in densities.iter_mut().enumerate() {
            let angle_start = -90.0 + i as f64 * 5.0;
            if (-90.0..-55.0).contains(&angle_start) || (40.0..90.0).contains(&angle_start) {
                *d = 0.0;
            }
        }
        let density = density_from(&densities);
        let odometry = odometry_with(FlightMode::Loiter, 10.0, 10.0);

        match planner().run(&density, &odometry) {
            SteeringCommand::Angle(angle) => {
                // Centre of [40, 90] is 65, much closer to 45 than -72.5.
                assert!((angle - 65.0).abs() < 1e-9);
            }
            other => panic!("expected angle, got {other:?}"),
        }
    }

    #[test]
    fn test_target_angle_from_waypoint_delta() {
        let planner = planner();
        let east = odometry_with(FlightMode::Auto, 0.0, 5.0);
        assert!((planner.target_angle(&east) - 90.0).abs() < 1e-9);

        let north = odometry_with(FlightMode::Auto, 5.0, 0.0);
        assert!(planner.target_angle(&north).abs() < 1e-9);

        let diag = odometry_with(FlightMode::Auto, 5.0, 5.0);
        assert!((planner.target_angle(&diag) - 45.0).abs() < 1e-9);
    }
}
