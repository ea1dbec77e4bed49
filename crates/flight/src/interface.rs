//! The flight-interface bridge proper.

use crate::{conversions, FlightError};
use autopilot::Link;
use std::time::Duration;
use tracing::{debug, info, trace};
use types::{
    AvoidanceCommand, DecisionCommand, FlightMode, OdometryAndWaypoint, PositionGlobal,
    PositionLocal, SteeringCommand,
};

/// How autopilot mode names project onto the pipeline's [`FlightMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeProjection {
    /// Proximity topology: the engine only distinguishes stopped, moving,
    /// and pilot override.
    Simple,
    /// VFH topology: the autopilot mode family is carried through.
    Vfh,
}

/// Map an autopilot mode name into the pipeline's flight mode.
///
/// Anything unrecognised reads as `Manual`: an unexpected mode means the
/// pilot (or a failsafe) took over, and the pipeline must treat that as an
/// override.
pub fn map_flight_mode(name: &str, projection: ModeProjection) -> FlightMode {
    match projection {
        ModeProjection::Simple => match name {
            "AUTO" => FlightMode::Moving,
            "LOITER" | "GUIDED" | "RTL" => FlightMode::Stopped,
            _ => FlightMode::Manual,
        },
        ModeProjection::Vfh => match name {
            "AUTO" => FlightMode::Auto,
            "LOITER" => FlightMode::Loiter,
            "GUIDED" => FlightMode::Guided,
            "RTL" => FlightMode::Rtl,
            _ => FlightMode::Manual,
        },
    }
}

/// Bridge between the autopilot link and the avoidance pipeline.
pub struct FlightInterface {
    link: Box<dyn Link>,
    home: PositionGlobal,
    first_waypoint: PositionLocal,
    tolerance_squared: f64,
    projection: ModeProjection,
    armed: bool,
}

impl FlightInterface {
    /// Open the bridge: wait for the home location, fetch the first mission
    /// waypoint, and convert it into the local frame.
    pub fn create(
        mut link: Box<dyn Link>,
        home_timeout: Duration,
        first_waypoint_distance_tolerance: f64,
        projection: ModeProjection,
    ) -> Result<Self, FlightError> {
        let home = link.home_location(home_timeout)?;
        let waypoint_global = link.next_waypoint()?;
        let first_waypoint = conversions::global_to_local(&waypoint_global, &home);

        info!(
            north = first_waypoint.north,
            east = first_waypoint.east,
            tolerance = first_waypoint_distance_tolerance,
            "first waypoint localised"
        );

        Ok(Self {
            link,
            home,
            first_waypoint,
            tolerance_squared: first_waypoint_distance_tolerance
                * first_waypoint_distance_tolerance,
            projection,
            armed: false,
        })
    }

    /// Whether command dispatch has armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// One telemetry tick: fetch odometry and mode, localise, and arm the
    /// command guard once the drone first comes within tolerance of the
    /// first waypoint.
    pub fn tick(&mut self) -> Result<OdometryAndWaypoint, FlightError> {
        let odometry = self.link.odometry()?;
        let mode_name = self.link.flight_mode()?;
        let flight_mode = map_flight_mode(&mode_name, self.projection);

        let local_position = conversions::global_to_local(&odometry.position, &self.home);

        if !self.armed
            && local_position.distance_squared(&self.first_waypoint) <= self.tolerance_squared
        {
            info!("first waypoint reached, command dispatch armed");
            self.armed = true;
        }

        trace!(
            north = local_position.north,
            east = local_position.east,
            ?flight_mode,
            "odometry tick"
        );

        Ok(OdometryAndWaypoint::new(
            local_position,
            odometry.orientation,
            flight_mode,
            self.first_waypoint,
        ))
    }

    /// Dispatch one avoidance command to the autopilot, gated on the guard.
    pub fn handle_command(&mut self, command: AvoidanceCommand) -> Result<(), FlightError> {
        if !self.armed {
            debug!(?command, "dropping command, dispatch not armed");
            return Ok(());
        }

        match command {
            AvoidanceCommand::Decision(DecisionCommand::StopMissionAndHalt) => {
                info!("stopping mission: LOITER");
                self.link.set_flight_mode("LOITER")?;
            }
            AvoidanceCommand::Decision(DecisionCommand::ResumeMission) => {
                info!("resuming mission: AUTO");
                self.link.set_flight_mode("AUTO")?;
            }
            AvoidanceCommand::Steering(SteeringCommand::Reverse) => {
                // Total blockage: halt in place until the field clears.
                info!("total blockage reported, holding: LOITER");
                self.link.set_flight_mode("LOITER")?;
            }
            AvoidanceCommand::Steering(SteeringCommand::Angle(angle)) => {
                info!(angle, "steering angle commanded");
            }
            AvoidanceCommand::Steering(SteeringCommand::NoChange) => {
                trace!("steering: no change");
            }
        }
        Ok(())
    }
}
