//! Detection stage: configure the sensor, then stream detections into the
//! pipeline until exit is requested.

use crate::{Config, LidarError, Sf45};
use pipeline::{Queue, WorkerController};
use tracing::{info, trace, warn};
use types::LidarDetection;

/// Run the detection stage.
///
/// Configuration failures (retries exhausted) return an error and the stage
/// stops before producing anything; the supervisor notices the silent output
/// stream. Once streaming, every failure is soft: the scan is lossy by
/// design and the loop simply moves on to the next read.
pub fn run(
    config: &Config,
    detections_out: &Queue<LidarDetection>,
    controller: &WorkerController,
) -> Result<(), LidarError> {
    let mut lidar = Sf45::open(&config.port_name, config.baudrate, config.port_timeout)?;

    match lidar.product_info() {
        Ok(product) => info!(
            product = %product.product,
            firmware = %product.firmware,
            serial = %product.serial,
            "lidar identified"
        ),
        Err(e) => warn!(error = %e, "could not read lidar product information"),
    }

    lidar.configure(config)?;
    info!(
        port = %config.port_name,
        low = config.low_angle,
        high = config.high_angle,
        "lidar streaming started"
    );

    while !controller.is_exit_requested() {
        controller.check_pause();

        match lidar.read_detection(config.port_timeout) {
            Ok(Some(detection)) => {
                detections_out.put(detection);
            }
            Ok(None) => trace!("discarded out-of-range reading"),
            Err(LidarError::Timeout) => trace!("no reading within timeout"),
            Err(e) => warn!(error = %e, "lidar read failed"),
        }
    }

    let _ = lidar.set_stream_enabled(false);
    info!("detection stage stopped");
    Ok(())
}
