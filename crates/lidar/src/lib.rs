//! Lightware SF45/B driver for kestrel.
//!
//! The SF45/B is a steerable single-beam LiDAR speaking a binary
//! command/response protocol over serial (LWNX). This crate provides the
//! wire protocol (framing + CRC), the device driver (configuration and
//! streaming reads), and the detection stage that feeds angle-stamped
//! distance readings into the pipeline.

use std::time::Duration;
use thiserror::Error;

pub mod driver;
pub mod protocol;
pub mod worker;

pub use driver::{ProductInfo, Sf45};
pub use protocol::PacketParser;

#[derive(Error, Debug)]
pub enum LidarError {
    #[error("serial port error: {0}")]
    Serial(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no packet received within the timeout")]
    Timeout,
    #[error("command {0} failed to receive a response")]
    CommandFailed(u8),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// SF45/B configuration for the detection stage.
#[derive(Debug, Clone)]
pub struct Config {
    /// Serial port path (e.g. "/dev/ttyACM0")
    pub port_name: String,
    /// Baud rate (921600 for the SF45/B)
    pub baudrate: u32,
    /// Per-read serial timeout
    pub port_timeout: Duration,
    /// Sample-rate index, 1..=12 (1 = 50 Hz ... 12 = 5000 Hz)
    pub update_rate: u8,
    /// Scan extent low side, degrees in [-170, -5]
    pub low_angle: f32,
    /// Scan extent high side, degrees in [5, 170]
    pub high_angle: f32,
    /// Rotation speed, 5..=2000 where 5 is fastest
    pub rotate_speed: u16,
    /// Use the last raw return instead of the first
    pub use_last_return: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyACM0".into(),
            baudrate: 921_600,
            port_timeout: Duration::from_millis(100),
            update_rate: 5,
            low_angle: -170.0,
            high_angle: 170.0,
            rotate_speed: 5,
            use_last_return: false,
        }
    }
}
