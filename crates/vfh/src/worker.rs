//! Stage loops for the histogram and steering stages.

use crate::{HistogramConfig, SteeringConfig, SteeringPlanner, VectorFieldHistogram};
use pipeline::{Poll, Queue, WorkerController, QUEUE_TIMEOUT};
use tracing::{debug, info};
use types::{
    AvoidanceCommand, LidarOscillation, OdometryAndWaypoint, PolarObstacleDensity,
};

/// Run the histogram stage: oscillations in, polar densities out.
pub fn run_histogram(
    config: HistogramConfig,
    oscillations_in: &Queue<LidarOscillation>,
    densities_out: &Queue<PolarObstacleDensity>,
    controller: &WorkerController,
) {
    let vfh = VectorFieldHistogram::new(config);

    while !controller.is_exit_requested() {
        controller.check_pause();

        match oscillations_in.get_timeout(QUEUE_TIMEOUT) {
            Poll::Item(oscillation) => {
                densities_out.put(vfh.run(&oscillation));
            }
            Poll::Sentinel | Poll::Empty => continue,
        }
    }

    info!("histogram stage stopped");
}

/// Run the steering stage: densities plus the freshest odometry in,
/// steering commands out.
///
/// Odometry is polled non-blockingly and the latest sample retained;
/// densities arriving before any odometry has been seen are dropped.
pub fn run_steering(
    config: SteeringConfig,
    densities_in: &Queue<PolarObstacleDensity>,
    odometry_in: &Queue<OdometryAndWaypoint>,
    commands_out: &Queue<AvoidanceCommand>,
    controller: &WorkerController,
) {
    let planner = SteeringPlanner::new(config);
    let mut latest_odometry: Option<OdometryAndWaypoint> = None;

    while !controller.is_exit_requested() {
        controller.check_pause();

        while let Poll::Item(odometry) = odometry_in.try_get() {
            latest_odometry = Some(odometry);
        }

        match densities_in.get_timeout(QUEUE_TIMEOUT) {
            Poll::Item(density) => {
                let Some(odometry) = latest_odometry.as_ref() else {
                    debug!("dropping density, no odometry yet");
                    continue;
                };
                let command = planner.run(&density, odometry);
                commands_out.put(AvoidanceCommand::Steering(command));
            }
            Poll::Sentinel | Poll::Empty => continue,
        }
    }

    info!("steering stage stopped");
}
