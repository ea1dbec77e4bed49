//! Flight-interface stage loop.

use crate::{Config, FlightInterface, ModeProjection};
use autopilot::Link;
use pipeline::{Poll, Queue, WorkerController};
use tracing::{error, info, warn};
use types::{AvoidanceCommand, FlightMode, OdometryAndWaypoint};

/// Run the flight-interface stage.
///
/// If the link cannot be brought up (home location or first waypoint
/// unobtainable) the stage logs and returns without entering its loop; the
/// pipeline then produces no commands.
pub fn run(
    link: Box<dyn Link>,
    config: &Config,
    commands_in: &Queue<AvoidanceCommand>,
    odometry_out: &Queue<OdometryAndWaypoint>,
    controller: &WorkerController,
    projection: ModeProjection,
) {
    let mut interface = match FlightInterface::create(
        link,
        config.timeout,
        config.first_waypoint_distance_tolerance,
        projection,
    ) {
        Ok(interface) => interface,
        Err(e) => {
            error!(error = %e, "flight interface failed to start");
            return;
        }
    };

    info!(period = ?config.worker_period, "flight interface started");

    while !controller.is_exit_requested() {
        controller.check_pause();

        std::thread::sleep(config.worker_period);

        let odometry = match interface.tick() {
            Ok(odometry) => odometry,
            Err(e) => {
                warn!(error = %e, "odometry tick failed");
                continue;
            }
        };

        let pilot_override = odometry.flight_mode == FlightMode::Manual;
        odometry_out.put(odometry);

        if pilot_override {
            warn!("pilot override detected, requesting pipeline exit");
            controller.request_exit();
            continue;
        }

        if let Poll::Item(command) = commands_in.try_get() {
            if let Err(e) = interface.handle_command(command) {
                warn!(error = %e, "command dispatch failed");
            }
        }
    }

    info!("flight interface stage stopped");
}
