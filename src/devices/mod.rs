//! Scanner implementations

pub mod r2000;
pub mod sweep;

use crate::config::{Config, DeviceType};
use crate::core::scanner::Scanner;
use crate::error::Result;
use r2000::R2000Scanner;
use sweep::SweepScanner;

/// Create the scanner described by `config`
///
/// The scanner is returned disconnected.
pub fn create_scanner(config: &Config) -> Result<Box<dyn Scanner>> {
    config.validate()?;
    let pose = config.pose.to_pose();
    let name = config.device.name.as_str();

    match config.device.device_type {
        DeviceType::R2000 => Ok(Box::new(R2000Scanner::new(name, config.r2000.clone(), pose))),
        DeviceType::Sweep => Ok(Box::new(SweepScanner::new(name, config.sweep.clone(), pose))),
    }
}
