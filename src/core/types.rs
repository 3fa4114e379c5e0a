//! Core data types shared by both scanner engines.
//!
//! - [`Point`]: one calibrated sample, immutable once built
//! - [`Scan`]: all points of one logical rotation, built by the aggregator
//! - [`StatusEvent`]: fire-and-forget device or engine diagnostics
//! - [`LidarEvent`]: what a scanner publishes (point or status)

use crate::core::transform::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

static NEXT_SCANNER_ID: AtomicU64 = AtomicU64::new(1);

/// Lookup key identifying the scanner that produced a point
///
/// Carries no ownership, so points can outlive their scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScannerId(u64);

impl ScannerId {
    /// Allocate a process-unique id
    pub fn next() -> Self {
        ScannerId(NEXT_SCANNER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ScannerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scanner#{}", self.0)
    }
}

/// One range sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Angle around the rotation axis, degrees
    pub azimuth: f64,
    /// Range in millimetres
    pub distance: f64,
    /// Signal strength
    pub amplitude: u8,
    /// Logical scan id (monotonic per scanner)
    pub scan_id: u64,
    /// Cartesian position in the world frame
    pub position: Vector3,
    /// Scanner that produced this point
    pub scanner: ScannerId,
}

/// Points sharing one logical scan id, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    pub scanner: ScannerId,
    pub scan_id: u64,
    pub points: Vec<Point>,
}

impl Scan {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Status severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

impl StatusLevel {
    /// Matching `log` level
    pub fn log_level(self) -> log::Level {
        match self {
            StatusLevel::Info => log::Level::Info,
            StatusLevel::Warning => log::Level::Warn,
            StatusLevel::Error => log::Level::Error,
        }
    }
}

/// Severity plus human readable message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub message: String,
}

impl StatusEvent {
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, message)
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.level, self.message)
    }
}

/// Event published by a scanner
#[derive(Debug, Clone, PartialEq)]
pub enum LidarEvent {
    Point(Point),
    Status(StatusEvent),
}

impl LidarEvent {
    pub fn as_point(&self) -> Option<&Point> {
        match self {
            LidarEvent::Point(p) => Some(p),
            LidarEvent::Status(_) => None,
        }
    }

    pub fn as_status(&self) -> Option<&StatusEvent> {
        match self {
            LidarEvent::Status(s) => Some(s),
            LidarEvent::Point(_) => None,
        }
    }
}

/// Scanner lifecycle state
///
/// `Idle → Connecting → Connected → Starting → Running → Stopping → Connected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScannerState {
    Idle = 0,
    Connecting = 1,
    Connected = 2,
    Starting = 3,
    Running = 4,
    Stopping = 5,
}

impl ScannerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ScannerState::Connecting,
            2 => ScannerState::Connected,
            3 => ScannerState::Starting,
            4 => ScannerState::Running,
            5 => ScannerState::Stopping,
            _ => ScannerState::Idle,
        }
    }

    /// True once a device link exists (any state past `Connecting`)
    pub fn is_connected(self) -> bool {
        !matches!(self, ScannerState::Idle | ScannerState::Connecting)
    }
}

/// Lock-free shared cell holding a [`ScannerState`]
///
/// Worker threads hold a clone so a fatal I/O error can mark the session lost.
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub fn new(state: ScannerState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    pub fn get(&self) -> ScannerState {
        ScannerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ScannerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Set `to` only if the current state is `from`
    pub fn transition(&self, from: ScannerState, to: ScannerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
