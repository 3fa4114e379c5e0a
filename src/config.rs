//! Configuration for lidar-io scanners
//!
//! Loads scanner configuration from a TOML file. Every section has defaults,
//! so a file only needs the keys it changes:
//!
//! ```toml
//! [device]
//! type = "r2000"
//! name = "front"
//!
//! [pose]
//! position = [0.0, 0.0, 350.0]
//! orientation = [1.0, 0.0, 0.0, 0.0]
//!
//! [r2000]
//! host = "192.168.1.10"
//! packet_type = "C"
//! ```

use crate::core::transform::{Pose, Quaternion, Vector3};
use crate::devices::r2000::frame::PacketType;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub pose: PoseConfig,
    pub events: EventsConfig,
    pub r2000: R2000Config,
    pub sweep: SweepConfig,
    pub logging: LoggingConfig,
}

/// Supported scanner families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    R2000,
    Sweep,
}

/// Which scanner to build
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    /// Name used in log lines
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::R2000,
            name: "lidar".to_string(),
        }
    }
}

/// Scanner mounting pose in the world frame
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Translation [x, y, z], millimetres
    pub position: [f64; 3],
    /// Rotation quaternion [w, x, y, z]
    pub orientation: [f64; 4],
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

impl PoseConfig {
    pub fn to_pose(&self) -> Pose {
        let [x, y, z] = self.position;
        let [qw, qx, qy, qz] = self.orientation;
        Pose::new(Vector3::new(x, y, z), Quaternion::new(qw, qx, qy, qz))
    }
}

/// Subscriber defaults
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Capacity of channel subscribers created from this config
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8192,
        }
    }
}

/// Network scanner (HTTP control + TCP data)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct R2000Config {
    /// Device host name or IP address
    pub host: String,
    /// Point encoding requested for the data stream
    pub packet_type: PacketType,
    /// First angle of the scan output, 1/10000 degree; -1 = device default
    pub start_angle: i32,
    /// Ask the device to stop streaming when not fed
    pub watchdog: bool,
    pub watchdog_timeout_ms: u64,
    pub http_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Socket read timeout; bounds how long stop() waits for the reader
    pub read_timeout_ms: u64,
    /// Frames buffered between reader and dispatcher (oldest dropped)
    pub frame_queue_capacity: usize,
}

impl Default for R2000Config {
    fn default() -> Self {
        Self {
            host: "192.168.1.10".to_string(),
            packet_type: PacketType::C,
            start_angle: -1,
            watchdog: true,
            watchdog_timeout_ms: 10_000,
            http_timeout_ms: 3_000,
            connect_timeout_ms: 3_000,
            read_timeout_ms: 200,
            frame_queue_capacity: 256,
        }
    }
}

impl R2000Config {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Serial scanner (ASCII commands + 7-byte micro-frames)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Serial port path
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub motor_ready_timeout_ms: u64,
    /// Samples closer than this are discarded, millimetres
    pub min_distance_mm: f64,
    /// Multiply centimetre readings by 10
    pub convert_to_mm: bool,
    /// Raw reads buffered between poll and processor loops (oldest dropped)
    pub byte_queue_capacity: usize,
    /// Pause and resume acquisition around configuration changes; when
    /// false, changing configuration while acquiring is a state error
    pub smart_interleave: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 500,
            motor_ready_timeout_ms: 10_000,
            min_distance_mm: 200.0,
            convert_to_mm: true,
            byte_queue_capacity: 1024,
            smart_interleave: true,
        }
    }
}

impl SweepConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn motor_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.motor_ready_timeout_ms)
    }
}

/// Logging configuration for embedding binaries
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Parsed `level`, for `env_logger::Builder::filter_level` and friends
    pub fn level_filter(&self) -> Result<log::LevelFilter> {
        self.level
            .parse()
            .map_err(|_| Error::Config(format!("unknown log level '{}'", self.level)))
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use lidar_io::config::Config;
    ///
    /// let config = Config::from_file("lidar.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<()> {
        match self.device.device_type {
            DeviceType::R2000 => {
                let r = &self.r2000;
                if r.host.trim().is_empty() {
                    return Err(Error::Config("r2000.host is empty".to_string()));
                }
                if r.watchdog && r.watchdog_timeout_ms == 0 {
                    return Err(Error::Config(
                        "r2000.watchdog_timeout_ms must be > 0 when watchdog is on".to_string(),
                    ));
                }
                if r.frame_queue_capacity == 0 {
                    return Err(Error::Config("r2000.frame_queue_capacity is 0".to_string()));
                }
            }
            DeviceType::Sweep => {
                let s = &self.sweep;
                if s.port.trim().is_empty() {
                    return Err(Error::Config("sweep.port is empty".to_string()));
                }
                if s.baud_rate == 0 {
                    return Err(Error::Config("sweep.baud_rate is 0".to_string()));
                }
                if s.byte_queue_capacity == 0 {
                    return Err(Error::Config("sweep.byte_queue_capacity is 0".to_string()));
                }
            }
        }

        if self.events.channel_capacity == 0 {
            return Err(Error::Config("events.channel_capacity is 0".to_string()));
        }
        self.logging.level_filter()?;

        let p = &self.pose;
        if !p.position.iter().chain(p.orientation.iter()).all(|v| v.is_finite()) {
            return Err(Error::Config("pose contains non-finite values".to_string()));
        }
        if p.orientation.iter().map(|v| v * v).sum::<f64>() < 1e-12 {
            return Err(Error::Config("pose.orientation has zero norm".to_string()));
        }
        Ok(())
    }
}
