//! Dispatcher thread: frame queue -> decoded points and status events

use super::frame::decode_points;
use super::reader::Frame;
use super::status_flags;
use super::StreamStats;
use crate::core::scan_counter::LogicalScanCounter;
use crate::core::scanner::ScannerCore;
use crate::core::session::CancelToken;
use crate::core::types::StatusEvent;
use crossbeam_queue::ArrayQueue;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Backoff when the queue is empty
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Publish one frame; returns the number of points published
pub(super) fn dispatch_frame(
    core: &ScannerCore,
    counter: &mut LogicalScanCounter,
    frame: &Frame,
) -> usize {
    let header = &frame.header;

    for event in status_flags::events_for(header.status_flags) {
        core.publish_status(event);
    }

    let samples = match decode_points(header, &frame.packet) {
        Ok(samples) => samples,
        Err(e) => {
            core.publish_status(StatusEvent::warning(format!("Undecodable frame dropped: {}", e)));
            return 0;
        }
    };

    let scan_id = counter.observe(header.scan_number as u64);
    let mut published = 0;
    for sample in samples.iter().filter(|s| s.valid) {
        core.publish_point(sample.azimuth, sample.distance as f64, sample.amplitude, scan_id);
        published += 1;
    }
    published
}

/// Dispatcher loop, FIFO over the frame queue
pub(super) fn dispatcher_loop(
    queue: Arc<ArrayQueue<Frame>>,
    core: Arc<ScannerCore>,
    stats: Arc<StreamStats>,
    cancel: CancelToken,
) {
    log::debug!("{}: dispatcher started", core.name());
    let mut counter = LogicalScanCounter::new();
    while !cancel.is_cancelled() {
        match queue.pop() {
            Some(frame) => {
                let published = dispatch_frame(&core, &mut counter, &frame);
                stats
                    .points_published
                    .fetch_add(published as u64, Ordering::Relaxed);
            }
            None => thread::sleep(IDLE_SLEEP),
        }
    }
    log::debug!("{}: dispatcher exiting", core.name());
}
