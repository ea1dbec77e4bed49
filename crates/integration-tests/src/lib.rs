//! Shared test support for the integration tests: a scripted autopilot
//! link and polling helpers.

use autopilot::{AutopilotError, Link, LinkOdometry};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use types::{Orientation, PositionGlobal};

/// A fixed test home location.
pub const HOME: PositionGlobal = PositionGlobal {
    latitude: 43.4728,
    longitude: -80.5400,
    altitude: 334.0,
};

/// Autopilot state shared between a test body and the link owned by the
/// flight stage. Mode changes are acknowledged instantly.
pub struct AutopilotState {
    pub mode: Mutex<String>,
    pub modes_sent: Mutex<Vec<String>>,
    pub position: Mutex<PositionGlobal>,
    pub waypoint: PositionGlobal,
}

impl AutopilotState {
    pub fn new(waypoint: PositionGlobal) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(String::from("AUTO")),
            modes_sent: Mutex::new(Vec::new()),
            position: Mutex::new(HOME),
            waypoint,
        })
    }

    pub fn modes_sent(&self) -> Vec<String> {
        self.modes_sent.lock().unwrap().clone()
    }
}

/// [`Link`] over a shared [`AutopilotState`].
pub struct TestLink(pub Arc<AutopilotState>);

impl Link for TestLink {
    fn home_location(&mut self, _timeout: Duration) -> Result<PositionGlobal, AutopilotError> {
        Ok(HOME)
    }

    fn odometry(&mut self) -> Result<LinkOdometry, AutopilotError> {
        Ok(LinkOdometry {
            position: *self.0.position.lock().unwrap(),
            orientation: Orientation::default(),
        })
    }

    fn flight_mode(&mut self) -> Result<String, AutopilotError> {
        Ok(self.0.mode.lock().unwrap().clone())
    }

    fn next_waypoint(&mut self) -> Result<PositionGlobal, AutopilotError> {
        Ok(self.0.waypoint)
    }

    fn set_flight_mode(&mut self, mode: &str) -> Result<(), AutopilotError> {
        self.0.modes_sent.lock().unwrap().push(mode.to_string());
        *self.0.mode.lock().unwrap() = mode.to_string();
        Ok(())
    }
}

/// Poll until the predicate holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}
