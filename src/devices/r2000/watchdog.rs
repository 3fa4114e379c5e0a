//! Watchdog feeder thread
//!
//! The device stops streaming when the handle's watchdog is not fed within
//! its timeout. Protocol 1.01 and later accept a fixed byte sequence on the
//! data socket; older firmware needs an HTTP `feed_watchdog` call.

use super::http::{DeviceApi, Handle};
use crate::core::scanner::ScannerCore;
use crate::core::session::CancelToken;
use crate::core::types::{ScannerState, StateCell, StatusEvent};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Back-channel feed message ("feedwdg\x04")
pub const FEED_MESSAGE: [u8; 8] = [0x66, 0x65, 0x65, 0x64, 0x77, 0x64, 0x67, 0x04];

/// Devices reject feeds more often than once per second
pub const MIN_FEED_INTERVAL_MS: u64 = 1000;

/// `max(1000 ms, timeout / 4)`
pub fn feed_interval(timeout_ms: u64) -> Duration {
    Duration::from_millis((timeout_ms / 4).max(MIN_FEED_INTERVAL_MS))
}

/// How the watchdog is fed
pub(super) enum Feeder<W: Write> {
    /// Write [`FEED_MESSAGE`] on the data socket
    Tcp(W),
    /// Call `feed_watchdog` over HTTP
    Http(DeviceApi, Handle),
}

pub(super) fn watchdog_loop<W: Write>(
    mut feeder: Feeder<W>,
    interval: Duration,
    core: Arc<ScannerCore>,
    state: StateCell,
    cancel: CancelToken,
) {
    log::debug!("{}: watchdog started, feeding every {:?}", core.name(), interval);
    while !cancel.is_cancelled() {
        match &mut feeder {
            Feeder::Tcp(socket) => {
                if let Err(e) = socket.write_all(&FEED_MESSAGE).and_then(|_| socket.flush()) {
                    if !cancel.is_cancelled() {
                        core.publish_status(StatusEvent::error(format!(
                            "Watchdog feed on data socket failed: {}",
                            e
                        )));
                        state.set(ScannerState::Idle);
                        cancel.cancel();
                    }
                    break;
                }
            }
            Feeder::Http(api, handle) => {
                if let Err(e) = api.feed_watchdog(handle) {
                    core.publish_status(StatusEvent::warning(format!(
                        "Watchdog feed over HTTP failed: {}",
                        e
                    )));
                }
            }
        }
        log::trace!("{}: watchdog fed", core.name());
        if !cancel.sleep(interval) {
            break;
        }
    }
    log::debug!("{}: watchdog exiting", core.name());
}
