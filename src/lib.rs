//! lidar-io - range-finder acquisition library
//!
//! Acquires samples from two scanner families, normalizes them into one
//! ordered point stream and republishes that stream to any number of
//! consumers.
//!
//! ## Scanners
//!
//! - [`devices::r2000::R2000Scanner`]: networked scanner, HTTP control plane
//!   plus a binary TCP frame stream
//! - [`devices::sweep::SweepScanner`]: serial scanner, ASCII commands plus a
//!   continuous stream of 7-byte micro-frames
//!
//! Both implement [`core::scanner::Scanner`] and publish
//! [`core::types::LidarEvent`]s through an [`events::EventHub`]. Feed the
//! point stream into an [`events::aggregator::ScanAggregator`] to receive
//! complete [`core::types::Scan`]s.

pub mod config;
pub mod core;
pub mod devices;
pub mod error;
pub mod events;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use core::scanner::Scanner;
pub use core::transform::{Pose, Quaternion, Vector3};
pub use core::types::{LidarEvent, Point, Scan, ScannerId, ScannerState, StatusEvent, StatusLevel};
pub use error::{Error, Result};
pub use events::aggregator::ScanAggregator;
pub use events::{EventHub, Subscription};
