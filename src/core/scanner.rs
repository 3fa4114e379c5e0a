//! Scanner capability set shared by every engine.
//!
//! Engines embed a [`ScannerCore`] (identity, event hub, pose, state) and
//! implement [`Scanner`] for the lifecycle operations.

use crate::core::transform::{self, Pose};
use crate::core::types::{
    LidarEvent, Point, ScannerId, ScannerState, StateCell, StatusEvent, StatusLevel,
};
use crate::error::Result;
use crate::events::EventHub;
use parking_lot::RwLock;

/// Interchangeable scanner interface
///
/// All operations take `&self`; engines serialize lifecycle transitions
/// internally, so a scanner can be shared behind an `Arc`.
pub trait Scanner: Send + Sync {
    /// Identity, events, pose and state
    fn core(&self) -> &ScannerCore;

    /// Open the device link and read device metadata
    fn connect(&self) -> Result<()>;

    /// Stop if running, then close the device link
    fn disconnect(&self) -> Result<()>;

    /// Begin streaming; no-op when already running
    fn start(&self) -> Result<()>;

    /// Stop streaming; no-op when not running
    fn stop(&self) -> Result<()>;

    fn id(&self) -> ScannerId {
        self.core().id()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> ScannerState {
        self.core().state()
    }

    fn events(&self) -> &EventHub<LidarEvent> {
        self.core().events()
    }

    fn pose(&self) -> Pose {
        self.core().pose()
    }

    fn set_pose(&self, pose: Pose) {
        self.core().set_pose(pose)
    }

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn is_scanning(&self) -> bool {
        self.state() == ScannerState::Running
    }
}

/// State and outputs common to all engines
pub struct ScannerCore {
    id: ScannerId,
    name: String,
    events: EventHub<LidarEvent>,
    pose: RwLock<Pose>,
    state: StateCell,
}

impl ScannerCore {
    pub fn new(name: impl Into<String>, pose: Pose) -> Self {
        Self {
            id: ScannerId::next(),
            name: name.into(),
            events: EventHub::new(),
            pose: RwLock::new(pose),
            state: StateCell::new(ScannerState::Idle),
        }
    }

    pub fn id(&self) -> ScannerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &EventHub<LidarEvent> {
        &self.events
    }

    pub fn pose(&self) -> Pose {
        *self.pose.read()
    }

    /// Replace the mounting pose; the orientation is normalized
    pub fn set_pose(&self, pose: Pose) {
        *self.pose.write() = Pose::new(pose.position, pose.orientation);
    }

    pub fn state(&self) -> ScannerState {
        self.state.get()
    }

    pub fn set_state(&self, state: ScannerState) {
        let previous = self.state.get();
        if previous != state {
            log::debug!("{}: {:?} -> {:?}", self.name, previous, state);
        }
        self.state.set(state);
    }

    /// Handle for worker threads
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Transform a polar sample into the world frame and publish it
    pub fn publish_point(&self, azimuth: f64, distance: f64, amplitude: u8, scan_id: u64) {
        let pose = self.pose();
        let point = Point {
            azimuth,
            distance,
            amplitude,
            scan_id,
            position: transform::to_world(azimuth, distance, &pose),
            scanner: self.id,
        };
        self.events.publish(&LidarEvent::Point(point));
    }

    /// Log and publish a status event
    pub fn publish_status(&self, status: StatusEvent) {
        log::log!(status.level.log_level(), "{}: {}", self.name, status.message);
        self.events.publish(&LidarEvent::Status(status));
    }

    pub fn status(&self, level: StatusLevel, message: impl Into<String>) {
        self.publish_status(StatusEvent::new(level, message));
    }

    /// Teardown: every subscriber gets exactly one completion
    pub fn complete(&self) {
        self.events.complete();
    }
}
