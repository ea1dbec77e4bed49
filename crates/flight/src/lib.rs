//! Flight-interface bridge for kestrel.
//!
//! Owns the autopilot link for the lifetime of the pipeline: per tick it
//! reads odometry, converts the global fix into the local NED frame, maps
//! the autopilot's flight mode into the pipeline's [`types::FlightMode`],
//! and dispatches avoidance commands back, but only once the drone has
//! flown within tolerance of the first mission waypoint.

use std::time::Duration;
use thiserror::Error;

pub mod conversions;
mod interface;
pub mod worker;

pub use interface::{map_flight_mode, FlightInterface, ModeProjection};

#[derive(Error, Debug)]
pub enum FlightError {
    #[error("autopilot link error: {0}")]
    Autopilot(#[from] autopilot::AutopilotError),
}

/// Flight-interface configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Autopilot link endpoint (e.g. "tcpout:127.0.0.1:5760").
    pub address: String,
    /// How long to wait for the home location on startup.
    pub timeout: Duration,
    /// Minimum period between ticks.
    pub worker_period: Duration,
    /// Distance to the first mission waypoint, metres, at which command
    /// dispatch arms.
    pub first_waypoint_distance_tolerance: f64,
}
