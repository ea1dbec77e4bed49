//! SF45/B device driver: configuration commands and streaming reads.

use crate::protocol::{build_packet, PacketParser};
use crate::{Config, LidarError};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tokio_serial::SerialPort;
use tracing::trace;
use types::LidarDetection;

/// Product name, 16-byte string.
pub const CMD_PRODUCT_NAME: u8 = 0;
/// Firmware version, 4 bytes.
pub const CMD_FIRMWARE_VERSION: u8 = 2;
/// Serial number, 16-byte string.
pub const CMD_SERIAL_NUMBER: u8 = 3;
/// Distance-output field selection.
pub const CMD_DISTANCE_OUTPUT: u8 = 27;
/// Streaming enable/disable.
pub const CMD_STREAM: u8 = 30;
/// One streamed distance/yaw sample.
pub const CMD_DISTANCE_DATA: u8 = 44;
/// Sample-rate index.
pub const CMD_UPDATE_RATE: u8 = 66;
/// Rotation speed.
pub const CMD_ROTATION_SPEED: u8 = 85;
/// Scan extent, low side.
pub const CMD_LOW_ANGLE: u8 = 98;
/// Scan extent, high side.
pub const CMD_HIGH_ANGLE: u8 = 99;

/// Full write+read attempts before a command is declared failed.
const COMMAND_RETRIES: u32 = 4;
/// Response window for configuration commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
/// Response window for the product-information reads.
const INFO_TIMEOUT: Duration = Duration::from_millis(100);

/// Identification strings reported by the sensor.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub product: String,
    pub firmware: String,
    pub serial: String,
}

/// SF45/B driver over any byte transport.
///
/// Generic over the port so the command layer is testable against an
/// in-memory transport; production code uses [`Sf45::open`].
pub struct Sf45<P> {
    port: P,
    parser: PacketParser,
    command_timeout: Duration,
}

impl Sf45<Box<dyn SerialPort>> {
    /// Open the serial port and wrap it in a driver.
    pub fn open(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self, LidarError> {
        let port = tokio_serial::new(port_name, baudrate)
            .timeout(timeout)
            .open()
            .map_err(|e| LidarError::Serial(e.to_string()))?;
        Ok(Self::from_port(port))
    }
}

impl<P: Read + Write> Sf45<P> {
    pub fn from_port(port: P) -> Self {
        Self {
            port,
            parser: PacketParser::new(),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Override the per-attempt response window for configuration commands.
    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout;
    }

    /// Apply the full startup configuration and enable streaming.
    pub fn configure(&mut self, config: &Config) -> Result<(), LidarError> {
        self.set_update_rate(config.update_rate)?;
        self.set_distance_output(config.use_last_return)?;
        self.set_low_angle(config.low_angle)?;
        self.set_high_angle(config.high_angle)?;
        self.set_rotation_speed(config.rotate_speed)?;
        // Re-arm the output selection before opening the stream; the sensor
        // drops it if the angle or speed write raced a stream sample.
        self.set_distance_output(config.use_last_return)?;
        self.set_stream_enabled(true)?;
        Ok(())
    }

    /// Set the sample-rate index (1 = 50 Hz ... 12 = 5000 Hz).
    pub fn set_update_rate(&mut self, value: u8) -> Result<(), LidarError> {
        if !(1..=12).contains(&value) {
            return Err(LidarError::InvalidConfig(format!(
                "update rate {value} outside 1..=12"
            )));
        }
        self.execute(CMD_UPDATE_RATE, true, &[value], self.command_timeout)?;
        Ok(())
    }

    /// Select which fields the streamed distance packets carry: first (or
    /// last) raw return plus the yaw angle.
    pub fn set_distance_output(&mut self, use_last_return: bool) -> Result<(), LidarError> {
        let data: [u8; 4] = if use_last_return {
            [1, 1, 0, 0]
        } else {
            [8, 1, 0, 0]
        };
        self.execute(CMD_DISTANCE_OUTPUT, true, &data, self.command_timeout)?;
        Ok(())
    }

    /// Enable or disable distance streaming.
    pub fn set_stream_enabled(&mut self, enable: bool) -> Result<(), LidarError> {
        let data: [u8; 4] = if enable { [5, 0, 0, 0] } else { [0, 0, 0, 0] };
        self.execute(CMD_STREAM, true, &data, self.command_timeout)?;
        Ok(())
    }

    /// Set rotation speed, 5..=2000 where 5 is fastest.
    pub fn set_rotation_speed(&mut self, value: u16) -> Result<(), LidarError> {
        if !(5..=2000).contains(&value) {
            return Err(LidarError::InvalidConfig(format!(
                "rotation speed {value} outside 5..=2000"
            )));
        }
        self.execute(CMD_ROTATION_SPEED, true, &value.to_le_bytes(), self.command_timeout)?;
        Ok(())
    }

    /// Set the scan extent's low side, degrees in [-170, -5].
    pub fn set_low_angle(&mut self, value: f32) -> Result<(), LidarError> {
        if !(-170.0..=-5.0).contains(&value) {
            return Err(LidarError::InvalidConfig(format!(
                "low angle {value} outside [-170, -5]"
            )));
        }
        self.execute(CMD_LOW_ANGLE, true, &value.to_le_bytes(), self.command_timeout)?;
        Ok(())
    }

    /// Set the scan extent's high side, degrees in [5, 170].
    pub fn set_high_angle(&mut self, value: f32) -> Result<(), LidarError> {
        if !(5.0..=170.0).contains(&value) {
            return Err(LidarError::InvalidConfig(format!(
                "high angle {value} outside [5, 170]"
            )));
        }
        self.execute(CMD_HIGH_ANGLE, true, &value.to_le_bytes(), self.command_timeout)?;
        Ok(())
    }

    /// Query product name, firmware version, and serial number.
    pub fn product_info(&mut self) -> Result<ProductInfo, LidarError> {
        let product = str16(&self.execute(CMD_PRODUCT_NAME, false, &[], INFO_TIMEOUT)?);
        let fw = self.execute(CMD_FIRMWARE_VERSION, false, &[], INFO_TIMEOUT)?;
        let firmware = if fw.len() >= 9 {
            format!("{}.{}.{}", fw[6], fw[5], fw[4])
        } else {
            String::from("unknown")
        };
        let serial = str16(&self.execute(CMD_SERIAL_NUMBER, false, &[], INFO_TIMEOUT)?);
        Ok(ProductInfo {
            product,
            firmware,
            serial,
        })
    }

    /// Wait for the next streamed distance sample.
    ///
    /// Returns `Ok(None)` for samples outside the valid distance/angle
    /// domain, which are discarded by design.
    pub fn read_detection(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<LidarDetection>, LidarError> {
        let packet = self.wait_for_packet(CMD_DISTANCE_DATA, timeout)?;
        Ok(decode_distance(&packet))
    }

    /// Send a request packet and wait for its response, retrying the full
    /// write+read cycle up to [`COMMAND_RETRIES`] times.
    fn execute(
        &mut self,
        command: u8,
        write: bool,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, LidarError> {
        let packet = build_packet(command, write, data);
        for attempt in 0..COMMAND_RETRIES {
            self.port.write_all(&packet)?;
            match self.wait_for_packet(command, timeout) {
                Ok(response) => return Ok(response),
                Err(LidarError::Timeout) => {
                    trace!(command, attempt, "no response, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(LidarError::CommandFailed(command))
    }

    /// Read bytes until a valid packet with the given command completes or
    /// the deadline passes.
    fn wait_for_packet(&mut self, command: u8, timeout: Duration) -> Result<Vec<u8>, LidarError> {
        self.parser.reset();
        let deadline = Instant::now() + timeout;
        let mut byte = [0u8; 1];

        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => continue,
                Ok(_) => {
                    if self.parser.push(byte[0]) && self.parser.command() == Some(command) {
                        return Ok(self.parser.packet().to_vec());
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(LidarError::Io(e)),
            }
        }
        Err(LidarError::Timeout)
    }
}

/// Decode a streamed distance packet into a detection.
///
/// Distance arrives in centimetres; yaw in hundredths of a degree, with
/// values above 32000 folding negative (16-bit sign encoding). Readings
/// outside the valid domain yield `None`.
fn decode_distance(packet: &[u8]) -> Option<LidarDetection> {
    if packet.len() < 10 {
        return None;
    }
    let payload = &packet[4..packet.len() - 2];

    let distance = f64::from(u16::from_le_bytes([payload[0], payload[1]])) / 100.0;

    let mut raw_angle = i32::from(u16::from_le_bytes([payload[2], payload[3]]));
    if raw_angle > 32000 {
        raw_angle -= 65535;
    }
    let angle = f64::from(raw_angle) / 100.0;

    LidarDetection::new(distance, angle).ok()
}

/// Extract a NUL-terminated 16-byte string from a response packet.
fn str16(packet: &[u8]) -> String {
    packet
        .iter()
        .skip(4)
        .take(16)
        .take_while(|&&b| b != 0)
        .map(|&b| char::from(b))
        .collect()
}
