//! Data-merge stage for kestrel.
//!
//! Detections arrive at the lidar sample rate (hundreds of hertz); odometry
//! arrives an order of magnitude slower. This stage buffers detections and,
//! each time a fresh odometry sample appears, emits the whole buffer paired
//! with it as one [`DetectionsAndOdometry`] batch.

use pipeline::{Poll, Queue, WorkerController};
use std::time::Duration;
use tracing::{info, trace};
use types::{DetectionsAndOdometry, LidarDetection, OdometryAndWaypoint};

/// Run the merge stage.
///
/// Guarantees: every detection received before exit lands in exactly one
/// emitted batch (or is still buffered at exit); each batch carries the
/// freshest odometry observed. An odometry sample that arrives while the
/// buffer is empty is discarded, since a batch must carry detections.
pub fn run(
    delay: Duration,
    detections_in: &Queue<LidarDetection>,
    odometry_in: &Queue<OdometryAndWaypoint>,
    merged_out: &Queue<DetectionsAndOdometry>,
    controller: &WorkerController,
) {
    let mut buffer: Vec<LidarDetection> = Vec::new();

    while !controller.is_exit_requested() {
        controller.check_pause();

        let mut drained_any = false;
        while let Poll::Item(detection) = detections_in.try_get() {
            buffer.push(detection);
            drained_any = true;
        }

        match odometry_in.try_get() {
            Poll::Item(odometry) => {
                if let Ok(batch) = DetectionsAndOdometry::new(std::mem::take(&mut buffer), odometry)
                {
                    trace!(detections = batch.detections.len(), "merged batch");
                    merged_out.put(batch);
                }
            }
            Poll::Sentinel | Poll::Empty => {
                // Nothing to pair yet; back off if this pass found no input
                // at all so two empty queues cannot spin the loop.
                if !drained_any && buffer.is_empty() {
                    std::thread::sleep(delay);
                }
            }
        }
    }

    info!(buffered = buffer.len(), "merge stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{FlightMode, Orientation, PositionLocal};

    fn detection(distance: f64, angle: f64) -> LidarDetection {
        LidarDetection::new(distance, angle).unwrap()
    }

    fn odometry() -> OdometryAndWaypoint {
        OdometryAndWaypoint::new(
            PositionLocal::default(),
            Orientation::default(),
            FlightMode::Moving,
            PositionLocal::new(10.0, 0.0, 0.0),
        )
    }

    /// Drives the worker on a thread and shuts it down cooperatively.
    struct Harness {
        detections: Queue<LidarDetection>,
        odometry: Queue<OdometryAndWaypoint>,
        merged: Queue<DetectionsAndOdometry>,
        controller: WorkerController,
        handle: Option<std::thread::JoinHandle<()>>,
    }

    impl Harness {
        fn start() -> Self {
            let detections = Queue::bounded(64);
            let odometry = Queue::bounded(8);
            let merged = Queue::bounded(8);
            let controller = WorkerController::new();

            let worker_detections = detections.clone();
            let worker_odometry = odometry.clone();
            let worker_merged = merged.clone();
            let worker_controller = controller.clone();
            let handle = std::thread::spawn(move || {
                run(
                    Duration::from_millis(5),
                    &worker_detections,
                    &worker_odometry,
                    &worker_merged,
                    &worker_controller,
                );
            });

            Self {
                detections,
                odometry,
                merged,
                controller,
                handle: Some(handle),
            }
        }

        fn stop(&mut self) {
            self.controller.request_exit();
            if let Some(handle) = self.handle.take() {
                handle.join().unwrap();
            }
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            if self.handle.is_some() {
                self.stop();
            }
        }
    }

    fn wait_for_batch(queue: &Queue<DetectionsAndOdometry>) -> DetectionsAndOdometry {
        for _ in 0..100 {
            if let Poll::Item(batch) = queue.get_timeout(Duration::from_millis(20)) {
                return batch;
            }
        }
        panic!("no merged batch arrived");
    }

    #[test]
    fn test_batch_pairs_buffer_with_odometry() {
        let mut harness = Harness::start();

        for i in 0..5 {
            harness.detections.put(detection(6.0, f64::from(i)));
        }
        std::thread::sleep(Duration::from_millis(30));
        harness.odometry.put(odometry());

        let batch = wait_for_batch(&harness.merged);
        assert_eq!(batch.detections.len(), 5);

        harness.stop();
    }

    #[test]
    fn test_no_batch_without_detections() {
        let mut harness = Harness::start();

        harness.odometry.put(odometry());
        std::thread::sleep(Duration::from_millis(50));
        assert!(harness.merged.is_empty());

        harness.stop();
    }

    #[test]
    fn test_detections_are_not_duplicated_across_batches() {
        let mut harness = Harness::start();

        harness.detections.put(detection(6.0, 1.0));
        std::thread::sleep(Duration::from_millis(30));
        harness.odometry.put(odometry());
        let first = wait_for_batch(&harness.merged);

        harness.detections.put(detection(7.0, 2.0));
        std::thread::sleep(Duration::from_millis(30));
        harness.odometry.put(odometry());
        let second = wait_for_batch(&harness.merged);

        assert_eq!(first.detections.len(), 1);
        assert_eq!(second.detections.len(), 1);
        assert_eq!(first.detections[0].angle, 1.0);
        assert_eq!(second.detections[0].angle, 2.0);

        harness.stop();
    }

    #[test]
    fn test_detections_before_first_odometry_are_retained() {
        let mut harness = Harness::start();

        harness.detections.put(detection(6.0, 0.0));
        harness.detections.put(detection(6.0, 1.0));
        // A long quiet period without odometry must not lose the buffer.
        std::thread::sleep(Duration::from_millis(80));
        harness.odometry.put(odometry());

        let batch = wait_for_batch(&harness.merged);
        assert_eq!(batch.detections.len(), 2);

        harness.stop();
    }
}
