//! Autopilot link for kestrel.
//!
//! The pipeline only ever talks to the autopilot through the [`Link`]
//! trait: telemetry reads, mission waypoint reads, and flight-mode writes.
//! The shipped implementation speaks MAVLink to an ArduPilot flight
//! controller; tests substitute scripted links.

use std::time::Duration;
use thiserror::Error;
use types::{Orientation, PositionGlobal};

mod mav;

pub use mav::MavlinkLink;

#[derive(Error, Debug)]
pub enum AutopilotError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("link i/o error: {0}")]
    Io(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("unsupported flight mode: {0}")]
    UnsupportedMode(String),
}

/// Raw odometry as reported by the autopilot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkOdometry {
    pub position: PositionGlobal,
    pub orientation: Orientation,
}

/// Opaque autopilot client.
///
/// One instance is owned by the flight-interface stage for the lifetime of
/// the pipeline; odometry reads and command writes are serialised by virtue
/// of running on that single stage.
pub trait Link: Send {
    /// The home (launch) location, waited for up to `timeout`.
    fn home_location(&mut self, timeout: Duration) -> Result<PositionGlobal, AutopilotError>;

    /// Current global position and attitude.
    fn odometry(&mut self) -> Result<LinkOdometry, AutopilotError>;

    /// Current flight-mode name (e.g. "AUTO", "LOITER").
    fn flight_mode(&mut self) -> Result<String, AutopilotError>;

    /// First waypoint of the uploaded mission.
    fn next_waypoint(&mut self) -> Result<PositionGlobal, AutopilotError>;

    /// Command a flight-mode change by name.
    fn set_flight_mode(&mut self, mode: &str) -> Result<(), AutopilotError>;
}
