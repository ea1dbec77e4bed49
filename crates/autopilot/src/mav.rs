//! MAVLink implementation of the autopilot [`Link`].
//!
//! Speaks the common dialect to an ArduPilot flight controller:
//! HEARTBEAT for the flight mode, GLOBAL_POSITION_INT + ATTITUDE for
//! odometry, the mission protocol for waypoints, and COMMAND_LONG
//! DO_SET_MODE for mode changes.

use crate::{AutopilotError, Link, LinkOdometry};
use mavlink::common::{
    MavCmd, MavMessage, MavModeFlag, COMMAND_LONG_DATA, MISSION_REQUEST_INT_DATA,
};
use mavlink::{MavConnection, MavHeader};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use types::{Orientation, PositionGlobal};

/// ArduPilot copter custom-mode numbers for the modes this system uses.
const COPTER_MODE_AUTO: u32 = 3;
const COPTER_MODE_GUIDED: u32 = 4;
const COPTER_MODE_LOITER: u32 = 5;
const COPTER_MODE_RTL: u32 = 6;

/// Window for a single telemetry read.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// MAVLink-backed autopilot link.
pub struct MavlinkLink {
    conn: Box<dyn MavConnection<MavMessage> + Send + Sync>,
    target_system: u8,
    target_component: u8,
    sequence: u8,
    last_position: Option<PositionGlobal>,
    last_attitude: Option<Orientation>,
}

impl MavlinkLink {
    /// Connect to the given MAVLink endpoint (e.g. "tcpout:127.0.0.1:5760"
    /// or "serial:/dev/ttyUSB0:57600") and wait for the first heartbeat.
    pub fn connect(address: &str) -> Result<Self, AutopilotError> {
        info!(address, "connecting to autopilot");
        let conn = mavlink::connect::<MavMessage>(address)
            .map_err(|e| AutopilotError::Connection(e.to_string()))?;

        let mut link = Self {
            conn,
            target_system: 1,
            target_component: 1,
            sequence: 0,
            last_position: None,
            last_attitude: None,
        };

        // Learn the autopilot's system id from its first heartbeat.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if Instant::now() >= deadline {
                return Err(AutopilotError::Timeout("heartbeat"));
            }
            let (header, message) = link.recv()?;
            if let MavMessage::HEARTBEAT(_) = message {
                link.target_system = header.system_id;
                link.target_component = header.component_id;
                info!(
                    system = header.system_id,
                    component = header.component_id,
                    "autopilot heartbeat received"
                );
                return Ok(link);
            }
        }
    }

    fn recv(&mut self) -> Result<(MavHeader, MavMessage), AutopilotError> {
        self.conn
            .recv()
            .map_err(|e| AutopilotError::Io(e.to_string()))
    }

    fn send(&mut self, message: MavMessage) -> Result<(), AutopilotError> {
        let header = MavHeader {
            system_id: 255,
            component_id: 0,
            sequence: self.sequence,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.conn
            .send(&header, &message)
            .map(|_| ())
            .map_err(|e| AutopilotError::Io(e.to_string()))
    }

    fn send_command(&mut self, command: MavCmd, param1: f32, param2: f32) -> Result<(), AutopilotError> {
        self.send(MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            param1,
            param2,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
            command,
            target_system: self.target_system,
            target_component: self.target_component,
            confirmation: 0,
        }))
    }

    /// Drain incoming telemetry, updating the position/attitude caches,
    /// until `predicate` returns a value or the deadline passes.
    fn wait_for<T>(
        &mut self,
        what: &'static str,
        timeout: Duration,
        mut predicate: impl FnMut(&MavMessage) -> Option<T>,
    ) -> Result<T, AutopilotError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let (_, message) = self.recv()?;
            self.cache_telemetry(&message);
            if let Some(value) = predicate(&message) {
                return Ok(value);
            }
        }
        Err(AutopilotError::Timeout(what))
    }

    fn cache_telemetry(&mut self, message: &MavMessage) {
        match message {
            MavMessage::GLOBAL_POSITION_INT(data) => {
                self.last_position = Some(PositionGlobal {
                    latitude: f64::from(data.lat) * 1e-7,
                    longitude: f64::from(data.lon) * 1e-7,
                    altitude: f64::from(data.alt) * 1e-3,
                });
            }
            MavMessage::ATTITUDE(data) => {
                self.last_attitude = Some(Orientation {
                    roll: f64::from(data.roll),
                    pitch: f64::from(data.pitch),
                    yaw: f64::from(data.yaw),
                });
            }
            _ => {}
        }
    }
}

impl Link for MavlinkLink {
    fn home_location(&mut self, timeout: Duration) -> Result<PositionGlobal, AutopilotError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.send_command(MavCmd::MAV_CMD_GET_HOME_POSITION, 0.0, 0.0)?;

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(AutopilotError::Timeout("home location"))?;
            let window = remaining.min(Duration::from_secs(1));

            match self.wait_for("home location", window, |message| match message {
                MavMessage::HOME_POSITION(data) => Some(PositionGlobal {
                    latitude: f64::from(data.latitude) * 1e-7,
                    longitude: f64::from(data.longitude) * 1e-7,
                    altitude: f64::from(data.altitude) * 1e-3,
                }),
                _ => None,
            }) {
                Ok(home) => {
                    info!(
                        latitude = home.latitude,
                        longitude = home.longitude,
                        "home location received"
                    );
                    return Ok(home);
                }
                Err(AutopilotError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn odometry(&mut self) -> Result<LinkOdometry, AutopilotError> {
        // Read telemetry until at least one fresh position or attitude has
        // arrived and both caches are populated.
        let deadline = Instant::now() + RECV_TIMEOUT;
        let mut refreshed = false;
        while Instant::now() < deadline {
            let (_, message) = self.recv()?;
            self.cache_telemetry(&message);
            if matches!(
                message,
                MavMessage::GLOBAL_POSITION_INT(_) | MavMessage::ATTITUDE(_)
            ) {
                refreshed = true;
            }
            if refreshed && self.last_position.is_some() && self.last_attitude.is_some() {
                break;
            }
        }

        match (self.last_position, self.last_attitude) {
            (Some(position), Some(attitude)) => Ok(LinkOdometry {
                position,
                orientation: attitude,
            }),
            _ => Err(AutopilotError::Timeout("odometry")),
        }
    }

    fn flight_mode(&mut self) -> Result<String, AutopilotError> {
        self.wait_for("flight mode", RECV_TIMEOUT, |message| match message {
            MavMessage::HEARTBEAT(data) => {
                if data
                    .base_mode
                    .contains(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED)
                {
                    Some(mode_name(data.custom_mode).to_string())
                } else {
                    Some(String::from("MANUAL"))
                }
            }
            _ => None,
        })
    }

    fn next_waypoint(&mut self) -> Result<PositionGlobal, AutopilotError> {
        // Mission item 0 is the home position on ArduPilot; the first real
        // waypoint is item 1.
        let seq = 1;
        self.send(MavMessage::MISSION_REQUEST_INT(MISSION_REQUEST_INT_DATA {
            seq,
            target_system: self.target_system,
            target_component: self.target_component,
        }))?;

        let waypoint = self.wait_for("mission item", RECV_TIMEOUT, |message| match message {
            MavMessage::MISSION_ITEM_INT(data) if data.seq == seq => Some(PositionGlobal {
                latitude: f64::from(data.x) * 1e-7,
                longitude: f64::from(data.y) * 1e-7,
                altitude: f64::from(data.z),
            }),
            _ => None,
        })?;
        debug!(
            latitude = waypoint.latitude,
            longitude = waypoint.longitude,
            "first mission waypoint received"
        );
        Ok(waypoint)
    }

    fn set_flight_mode(&mut self, mode: &str) -> Result<(), AutopilotError> {
        let custom_mode = match mode {
            "AUTO" => COPTER_MODE_AUTO,
            "GUIDED" => COPTER_MODE_GUIDED,
            "LOITER" => COPTER_MODE_LOITER,
            "RTL" => COPTER_MODE_RTL,
            other => return Err(AutopilotError::UnsupportedMode(other.to_string())),
        };
        trace!(mode, custom_mode, "setting flight mode");
        self.send_command(
            MavCmd::MAV_CMD_DO_SET_MODE,
            f32::from(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits()),
            custom_mode as f32,
        )
    }
}

/// Copter custom-mode number to mode name; unknown numbers read as MANUAL
/// so the pipeline treats any pilot-selected mode as an override.
fn mode_name(custom_mode: u32) -> &'static str {
    match custom_mode {
        COPTER_MODE_AUTO => "AUTO",
        COPTER_MODE_GUIDED => "GUIDED",
        COPTER_MODE_LOITER => "LOITER",
        COPTER_MODE_RTL => "RTL",
        _ => "MANUAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_name_mapping() {
        assert_eq!(mode_name(3), "AUTO");
        assert_eq!(mode_name(4), "GUIDED");
        assert_eq!(mode_name(5), "LOITER");
        assert_eq!(mode_name(6), "RTL");
        assert_eq!(mode_name(0), "MANUAL");
        assert_eq!(mode_name(99), "MANUAL");
    }
}
