//! Proximity decision engine for kestrel.
//!
//! A command-latched state machine over merged detection/odometry batches.
//! Commands are edge-triggered: one STOP when an obstacle first enters the
//! proximity limit while moving, one RESUME when the field first clears
//! while stopped. A pending command suppresses further output until the
//! autopilot's observed flight mode reflects it, or until a timeout forces
//! a re-send.

use pipeline::{Poll, Queue, WorkerController, QUEUE_TIMEOUT};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use types::{AvoidanceCommand, DecisionCommand, DetectionsAndOdometry, FlightMode};

/// Decision-engine parameters.
#[derive(Debug, Clone, Copy)]
pub struct DecisionConfig {
    /// Obstacles nearer than this many metres trigger a stop.
    pub proximity_limit: f64,
    /// Merged batches retained for inspection.
    pub max_history: usize,
    /// Seconds before an unacknowledged command is re-sent.
    pub command_timeout: Duration,
}

/// Latched STOP/RESUME state machine.
#[derive(Debug)]
pub struct ProximityDecision {
    config: DecisionConfig,
    history: VecDeque<DetectionsAndOdometry>,
    command_requested: bool,
    last_command_sent: Option<FlightMode>,
    command_sent_at: Option<Instant>,
}

impl ProximityDecision {
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(config.max_history),
            command_requested: false,
            last_command_sent: None,
            command_sent_at: None,
        }
    }

    /// Process one merged batch, possibly emitting a command.
    pub fn run(&mut self, merged: DetectionsAndOdometry) -> Option<DecisionCommand> {
        let flight_mode = merged.odometry.flight_mode;

        self.history.push_back(merged);
        while self.history.len() > self.config.max_history {
            self.history.pop_front();
        }

        // The autopilot has caught up with the pending command.
        if self.command_requested && Some(flight_mode) == self.last_command_sent {
            debug!(?flight_mode, "command acknowledged");
            self.command_requested = false;
        }

        if self.command_requested {
            if let Some(sent_at) = self.command_sent_at {
                if sent_at.elapsed() > self.config.command_timeout {
                    let command = match self.last_command_sent {
                        Some(FlightMode::Stopped) => DecisionCommand::StopMissionAndHalt,
                        _ => DecisionCommand::ResumeMission,
                    };
                    info!(?command, "command unacknowledged, re-sending");
                    self.command_sent_at = Some(Instant::now());
                    return Some(command);
                }
            }
            return None;
        }

        match flight_mode {
            FlightMode::Stopped if self.field_is_clear() => {
                Some(self.emit(FlightMode::Moving, DecisionCommand::ResumeMission))
            }
            FlightMode::Moving if !self.field_is_clear() => {
                Some(self.emit(FlightMode::Stopped, DecisionCommand::StopMissionAndHalt))
            }
            _ => None,
        }
    }

    /// True when no retained batch holds a detection inside the limit.
    fn field_is_clear(&self) -> bool {
        self.history.iter().all(|batch| {
            batch
                .detections
                .iter()
                .all(|d| d.distance >= self.config.proximity_limit)
        })
    }

    fn emit(&mut self, target: FlightMode, command: DecisionCommand) -> DecisionCommand {
        info!(?command, "issuing command");
        self.command_requested = true;
        self.last_command_sent = Some(target);
        self.command_sent_at = Some(Instant::now());
        self.history.clear();
        command
    }
}

/// Run the decision stage.
pub fn run(
    config: DecisionConfig,
    merged_in: &Queue<DetectionsAndOdometry>,
    commands_out: &Queue<AvoidanceCommand>,
    controller: &WorkerController,
) {
    let mut decider = ProximityDecision::new(config);

    while !controller.is_exit_requested() {
        controller.check_pause();

        match merged_in.get_timeout(QUEUE_TIMEOUT) {
            Poll::Item(merged) => {
                if let Some(command) = decider.run(merged) {
                    commands_out.put(AvoidanceCommand::Decision(command));
                }
            }
            Poll::Sentinel | Poll::Empty => continue,
        }
    }

    info!("decision stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{LidarDetection, Orientation, OdometryAndWaypoint, PositionLocal};

    fn config() -> DecisionConfig {
        DecisionConfig {
            proximity_limit: 5.0,
            max_history: 20,
            command_timeout: Duration::from_secs(5),
        }
    }

    fn batch(mode: FlightMode, distances: &[f64]) -> DetectionsAndOdometry {
        let detections = distances
            .iter()
            .map(|&d| LidarDetection::new(d, 3.0).unwrap())
            .collect();
        let odometry = OdometryAndWaypoint::new(
            PositionLocal::default(),
            Orientation::default(),
            mode,
            PositionLocal::new(10.0, 0.0, 0.0),
        );
        DetectionsAndOdometry::new(detections, odometry).unwrap()
    }

    #[test]
    fn test_stop_on_close_obstacle_while_moving() {
        // Five clear batches, then one with an obstacle inside the limit.
        let mut decider = ProximityDecision::new(config());
        for _ in 0..5 {
            assert_eq!(decider.run(batch(FlightMode::Moving, &[6.0])), None);
        }
        assert_eq!(
            decider.run(batch(FlightMode::Moving, &[4.8])),
            Some(DecisionCommand::StopMissionAndHalt)
        );
    }

    #[test]
    fn test_resume_when_clear_while_stopped() {
        let mut decider = ProximityDecision::new(config());
        assert_eq!(
            decider.run(batch(FlightMode::Stopped, &[6.0, 6.0, 6.0, 6.0, 6.0])),
            Some(DecisionCommand::ResumeMission)
        );
    }

    #[test]
    fn test_no_resume_while_obstacle_remains() {
        let mut decider = ProximityDecision::new(config());
        assert_eq!(decider.run(batch(FlightMode::Stopped, &[4.0])), None);
        assert_eq!(decider.run(batch(FlightMode::Stopped, &[6.0])), None);
    }

    #[test]
    fn test_pending_command_suppresses_output() {
        let mut decider = ProximityDecision::new(config());
        assert!(decider.run(batch(FlightMode::Moving, &[4.0])).is_some());

        // Mode still reads Moving: the stop is in flight. Feeding clear or
        // blocked batches emits nothing until the mode changes.
        assert_eq!(decider.run(batch(FlightMode::Moving, &[4.0])), None);
        assert_eq!(decider.run(batch(FlightMode::Moving, &[6.0])), None);
    }

    #[test]
    fn test_acknowledgement_reopens_the_engine() {
        let mut decider = ProximityDecision::new(config());
        assert!(decider.run(batch(FlightMode::Moving, &[4.0])).is_some());

        // The autopilot reflects Stopped: latch clears, and with the field
        // clear again a resume follows.
        assert_eq!(
            decider.run(batch(FlightMode::Stopped, &[6.0])),
            Some(DecisionCommand::ResumeMission)
        );
    }

    #[test]
    fn test_timeout_resends_same_command() {
        let mut decider = ProximityDecision::new(DecisionConfig {
            command_timeout: Duration::from_millis(0),
            ..config()
        });
        assert_eq!(
            decider.run(batch(FlightMode::Moving, &[4.0])),
            Some(DecisionCommand::StopMissionAndHalt)
        );

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            decider.run(batch(FlightMode::Moving, &[6.0])),
            Some(DecisionCommand::StopMissionAndHalt)
        );
    }

    #[test]
    fn test_history_informs_resume_decision() {
        let mut decider = ProximityDecision::new(config());
        // An obstacle seen in an earlier batch still blocks the resume.
        assert_eq!(decider.run(batch(FlightMode::Stopped, &[4.0])), None);
        for _ in 0..3 {
            assert_eq!(decider.run(batch(FlightMode::Stopped, &[6.0])), None);
        }

        // Once the old batch ages out of the window, the field is clear.
        let mut decider = ProximityDecision::new(DecisionConfig {
            max_history: 2,
            ..config()
        });
        assert_eq!(decider.run(batch(FlightMode::Stopped, &[4.0])), None);
        assert_eq!(decider.run(batch(FlightMode::Stopped, &[6.0])), None);
        assert_eq!(
            decider.run(batch(FlightMode::Stopped, &[6.0])),
            Some(DecisionCommand::ResumeMission)
        );
    }

    #[test]
    fn test_emission_clears_history() {
        let mut decider = ProximityDecision::new(config());
        assert!(decider.run(batch(FlightMode::Moving, &[4.0])).is_some());
        assert!(decider.history.is_empty());
    }

    #[test]
    fn test_manual_mode_emits_nothing() {
        let mut decider = ProximityDecision::new(config());
        assert_eq!(decider.run(batch(FlightMode::Manual, &[4.0])), None);
        assert_eq!(decider.run(batch(FlightMode::Manual, &[6.0])), None);
    }

    #[test]
    fn test_exactly_at_limit_is_not_a_stop() {
        let mut decider = ProximityDecision::new(config());
        assert_eq!(decider.run(batch(FlightMode::Moving, &[5.0])), None);
    }
}
