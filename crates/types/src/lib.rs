//! Shared types and message definitions for kestrel.
//!
//! Every value that crosses a stage queue is defined here. Constructors
//! validate the documented invariants and return `Err` instead of producing
//! an out-of-range value, so downstream stages never re-check.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Maximum LiDAR range in metres; readings beyond this are sensor noise.
pub const MAX_DETECTION_DISTANCE: f64 = 50.0;

/// Mechanical scan limit of the steerable head, degrees either side of centre.
pub const MAX_DETECTION_ANGLE: f64 = 170.0;

#[derive(Debug, Error, PartialEq)]
pub enum TypeError {
    #[error("distance {0} m outside [0, {MAX_DETECTION_DISTANCE}]")]
    DistanceOutOfRange(f64),
    #[error("angle {0}° outside ±{MAX_DETECTION_ANGLE}")]
    AngleOutOfRange(f64),
    #[error("oscillation requires at least one reading")]
    EmptyOscillation,
    #[error("merged batch requires at least one detection")]
    EmptyDetections,
}

/// A single range/bearing sample from the LiDAR.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LidarDetection {
    /// Distance to the return in metres.
    pub distance: f64,
    /// Yaw angle of the steerable head in degrees (0 = straight ahead).
    pub angle: f64,
}

impl LidarDetection {
    /// Validates range and bearing bounds.
    pub fn new(distance: f64, angle: f64) -> Result<Self, TypeError> {
        if !(0.0..=MAX_DETECTION_DISTANCE).contains(&distance) {
            return Err(TypeError::DistanceOutOfRange(distance));
        }
        if angle.abs() > MAX_DETECTION_ANGLE {
            return Err(TypeError::AngleOutOfRange(angle));
        }
        Ok(Self { distance, angle })
    }

    /// Project into the drone's instantaneous body frame (x forward, y right).
    pub fn to_point(&self) -> DetectionPoint {
        let rad = self.angle.to_radians();
        DetectionPoint {
            x: self.distance * rad.cos(),
            y: self.distance * rad.sin(),
        }
    }
}

/// Cartesian projection of a detection in the body frame, metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionPoint {
    pub x: f64,
    pub y: f64,
}

/// One monotonic sweep of the steerable head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LidarOscillation {
    /// Readings in arrival order; angles form a single monotonic run.
    pub readings: Vec<LidarDetection>,
    pub min_angle: f64,
    pub max_angle: f64,
}

impl LidarOscillation {
    /// Builds an oscillation from a non-empty reading buffer.
    pub fn new(readings: Vec<LidarDetection>) -> Result<Self, TypeError> {
        if readings.is_empty() {
            return Err(TypeError::EmptyOscillation);
        }
        let min_angle = readings.iter().map(|r| r.angle).fold(f64::INFINITY, f64::min);
        let max_angle = readings
            .iter()
            .map(|r| r.angle)
            .fold(f64::NEG_INFINITY, f64::max);
        Ok(Self {
            readings,
            min_angle,
            max_angle,
        })
    }
}

/// Position in the local NED frame anchored at the home location, metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionLocal {
    pub north: f64,
    pub east: f64,
    pub down: f64,
}

impl PositionLocal {
    pub fn new(north: f64, east: f64, down: f64) -> Self {
        Self { north, east, down }
    }

    /// Squared horizontal+vertical distance to another local position.
    pub fn distance_squared(&self, other: &PositionLocal) -> f64 {
        let dn = self.north - other.north;
        let de = self.east - other.east;
        let dd = self.down - other.down;
        dn * dn + de * de + dd * dd
    }
}

/// Geodetic position (WGS-84), degrees and metres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionGlobal {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Attitude in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

/// Flight mode as seen by the avoidance pipeline.
///
/// The simple (proximity) topology projects the autopilot's mode onto
/// `Stopped`/`Moving`/`Manual`; the VFH topology carries the autopilot
/// mode family through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightMode {
    Stopped = 0,
    Moving = 1,
    Manual = 2,
    Auto = 3,
    Loiter = 4,
    Guided = 5,
    Rtl = 6,
}

/// Odometry snapshot merged with the mission's first waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometryAndWaypoint {
    pub local_position: PositionLocal,
    pub orientation: Orientation,
    pub flight_mode: FlightMode,
    pub next_waypoint: PositionLocal,
    /// Wall-clock seconds since the Unix epoch, stamped at creation.
    pub timestamp: f64,
}

impl OdometryAndWaypoint {
    pub fn new(
        local_position: PositionLocal,
        orientation: Orientation,
        flight_mode: FlightMode,
        next_waypoint: PositionLocal,
    ) -> Self {
        Self {
            local_position,
            orientation,
            flight_mode,
            next_waypoint,
            timestamp: unix_time(),
        }
    }
}

/// Detections accumulated since the previous odometry tick, paired with the
/// freshest odometry observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionsAndOdometry {
    pub detections: Vec<LidarDetection>,
    pub odometry: OdometryAndWaypoint,
}

impl DetectionsAndOdometry {
    pub fn new(
        detections: Vec<LidarDetection>,
        odometry: OdometryAndWaypoint,
    ) -> Result<Self, TypeError> {
        if detections.is_empty() {
            return Err(TypeError::EmptyDetections);
        }
        Ok(Self {
            detections,
            odometry,
        })
    }
}

/// Obstacle density accumulated over one angular sector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectorObstacleDensity {
    pub angle_start: f64,
    pub angle_end: f64,
    /// Non-negative; 0 means the sector is clear.
    pub density: f64,
}

/// Polar obstacle-density histogram over one oscillation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarObstacleDensity {
    /// Sectors partition `[start_angle, end_angle]` contiguously, in order.
    pub sectors: Vec<SectorObstacleDensity>,
}

/// Mission command issued by the proximity decision engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionCommand {
    StopMissionAndHalt = 0,
    ResumeMission = 1,
}

/// Steering output of the VFH decision stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SteeringCommand {
    /// Steer toward the given bearing, degrees relative to straight ahead.
    Angle(f64),
    /// Total blockage; halt and back away.
    Reverse,
    /// The straight-line path is clear; leave the mission untouched.
    NoChange,
}

/// Union of the two decision outputs, as consumed by the flight interface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AvoidanceCommand {
    Decision(DecisionCommand),
    Steering(SteeringCommand),
}

/// Wall-clock seconds since the Unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
