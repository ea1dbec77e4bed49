//! Oscillation segmentation for kestrel.
//!
//! The SF45/B head sweeps back and forth between its angle limits. This
//! crate watches the angle stream for direction reversals and cuts the
//! stream into [`LidarOscillation`]s, one per monotonic sweep.

use pipeline::{Poll, Queue, WorkerController, QUEUE_TIMEOUT};
use tracing::{debug, info};
use types::{LidarDetection, LidarOscillation};

/// Sweep direction of the steerable head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepDirection {
    Up,
    Down,
}

/// Segments the detection stream into monotonic sweeps.
///
/// Readings received before the first reversal are emitted as the first
/// oscillation; this is a known startup condition.
#[derive(Debug, Default)]
pub struct OscillationSegmenter {
    readings: Vec<LidarDetection>,
    last_angle: Option<f64>,
    direction: Option<SweepDirection>,
}

impl OscillationSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one detection; returns a completed oscillation on reversal.
    pub fn push(&mut self, detection: LidarDetection) -> Option<LidarOscillation> {
        let angle = detection.angle;

        let Some(last_angle) = self.last_angle else {
            self.readings.push(detection);
            self.last_angle = Some(angle);
            return None;
        };

        match self.direction {
            None => {
                self.direction = Some(if angle > last_angle {
                    SweepDirection::Up
                } else {
                    SweepDirection::Down
                });
            }
            Some(SweepDirection::Down) if angle > last_angle => {
                return self.reverse(detection, SweepDirection::Up);
            }
            Some(SweepDirection::Up) if angle < last_angle => {
                return self.reverse(detection, SweepDirection::Down);
            }
            Some(_) => {}
        }

        self.readings.push(detection);
        self.last_angle = Some(angle);
        None
    }

    fn reverse(
        &mut self,
        detection: LidarDetection,
        new_direction: SweepDirection,
    ) -> Option<LidarOscillation> {
        let completed = std::mem::replace(&mut self.readings, vec![detection]);
        self.direction = Some(new_direction);
        self.last_angle = Some(detection.angle);
        LidarOscillation::new(completed).ok()
    }
}

/// Run the segmentation stage.
pub fn run(
    detections_in: &Queue<LidarDetection>,
    oscillations_out: &Queue<LidarOscillation>,
    controller: &WorkerController,
) {
    let mut segmenter = OscillationSegmenter::new();

    while !controller.is_exit_requested() {
        controller.check_pause();

        match detections_in.get_timeout(QUEUE_TIMEOUT) {
            Poll::Item(detection) => {
                if let Some(oscillation) = segmenter.push(detection) {
                    debug!(
                        readings = oscillation.readings.len(),
                        min = oscillation.min_angle,
                        max = oscillation.max_angle,
                        "oscillation complete"
                    );
                    oscillations_out.put(oscillation);
                }
            }
            Poll::Sentinel | Poll::Empty => continue,
        }
    }

    info!("segmentation stage stopped");
}
