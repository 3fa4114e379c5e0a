//! Worker loops of the serial scanner
//!
//! The poll loop moves raw bytes from the port into a bounded chunk queue.
//! The processor loop cuts them into sample frames and publishes points.

use super::frame::{FrameEvent, FrameProcessor, Sample};
use crate::core::scan_counter::LogicalScanCounter;
use crate::core::scanner::ScannerCore;
use crate::core::session::CancelToken;
use crate::core::types::{ScannerState, StateCell, StatusEvent};
use crate::transport::Transport;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub(super) type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

const READ_CHUNK: usize = 1024;
const POLL_IDLE: Duration = Duration::from_millis(1);
const PROCESS_IDLE: Duration = Duration::from_millis(2);

/// Counters shared between the workers and the scanner handle
#[derive(Debug, Default)]
pub struct SweepStats {
    pub discarded_frames: AtomicU64,
    pub discarded_bytes: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub points_published: AtomicU64,
    pub device_errors: AtomicU64,
}

/// Sample filtering and unit settings of the processor loop
#[derive(Debug, Clone, Copy)]
pub(super) struct ProcessorSettings {
    pub convert_to_mm: bool,
    pub min_distance_mm: f64,
}

impl ProcessorSettings {
    fn distance(&self, sample: &Sample) -> f64 {
        if self.convert_to_mm {
            sample.distance as f64 * 10.0
        } else {
            sample.distance as f64
        }
    }
}

pub(super) fn poll_loop(
    link: SharedTransport,
    queue: Arc<ArrayQueue<Vec<u8>>>,
    core: Arc<ScannerCore>,
    state: StateCell,
    stats: Arc<SweepStats>,
    cancel: CancelToken,
) {
    log::debug!("{}: poll loop started", core.name());
    let mut buffer = vec![0u8; READ_CHUNK];

    while !cancel.is_cancelled() {
        let result = {
            let mut transport = link.lock();
            match transport.available() {
                Ok(0) => Ok(0),
                Ok(_) => transport.read(&mut buffer),
                Err(e) => Err(e),
            }
        };

        match result {
            Ok(0) => thread::sleep(POLL_IDLE),
            Ok(n) => {
                if queue.force_push(buffer[..n].to_vec()).is_some() {
                    let dropped = stats.chunks_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped % 100 == 1 {
                        log::warn!("{}: byte queue full, {} chunks dropped", core.name(), dropped);
                    }
                }
            }
            Err(e) => {
                core.publish_status(StatusEvent::error(format!("Serial read failed: {}", e)));
                state.set(ScannerState::Idle);
                cancel.cancel();
                break;
            }
        }
    }

    log::debug!("{}: poll loop exiting", core.name());
}

pub(super) fn processor_loop(
    queue: Arc<ArrayQueue<Vec<u8>>>,
    core: Arc<ScannerCore>,
    settings: ProcessorSettings,
    stats: Arc<SweepStats>,
    cancel: CancelToken,
) {
    log::debug!("{}: processor loop started", core.name());
    let mut processor = FrameProcessor::new();
    let mut counter = LogicalScanCounter::new();
    let (mut seen_frames, mut seen_bytes) = (0u64, 0u64);

    while !cancel.is_cancelled() {
        let Some(chunk) = queue.pop() else {
            thread::sleep(PROCESS_IDLE);
            continue;
        };

        processor.feed(&chunk, |event| match event {
            FrameEvent::Resynchronized { dropped } => {
                core.publish_status(StatusEvent::warning(format!(
                    "Checksum error, had to discard {} bytes to recover to a valid read window",
                    dropped
                )));
            }
            FrameEvent::Sample(sample) => {
                handle_sample(&core, &mut counter, &settings, &stats, &sample);
            }
        });

        // Mirror the processor's counters into the shared stats
        let frames = processor.discarded_frames();
        let bytes = processor.discarded_bytes();
        stats
            .discarded_frames
            .fetch_add(frames - seen_frames, Ordering::Relaxed);
        stats
            .discarded_bytes
            .fetch_add(bytes - seen_bytes, Ordering::Relaxed);
        (seen_frames, seen_bytes) = (frames, bytes);
    }

    log::debug!("{}: processor loop exiting", core.name());
}

fn handle_sample(
    core: &ScannerCore,
    counter: &mut LogicalScanCounter,
    settings: &ProcessorSettings,
    stats: &SweepStats,
    sample: &Sample,
) {
    if sample.sync {
        counter.advance();
    }
    if sample.error {
        stats.device_errors.fetch_add(1, Ordering::Relaxed);
        core.publish_status(StatusEvent::error(
            "Communication error with LIDAR module (device error bit set)",
        ));
        return;
    }

    let distance = settings.distance(sample);
    if distance < settings.min_distance_mm {
        return;
    }

    core.publish_point(sample.azimuth, distance, sample.signal, counter.current());

    let count = stats.points_published.fetch_add(1, Ordering::Relaxed) + 1;
    if count % 1000 == 0 {
        log::debug!("{}: {} points published", core.name(), count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::Pose;
    use crate::core::types::LidarEvent;
    use crate::devices::sweep::frame::{decode, encode};
    use crate::transport::MockTransport;
    use std::time::Instant;

    fn collect_events(core: &ScannerCore) -> (Arc<Mutex<Vec<LidarEvent>>>, crate::events::Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = core.events().subscribe_fn(move |e: &LidarEvent| sink.lock().push(e.clone()));
        (events, sub)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            convert_to_mm: true,
            min_distance_mm: 200.0,
        }
    }

    #[test]
    fn test_handle_sample_filters_and_converts() {
        let core = ScannerCore::new("sweep-test", Pose::identity());
        let (events, _sub) = collect_events(&core);
        let stats = SweepStats::default();
        let mut counter = LogicalScanCounter::new();

        // 15 cm is below the 200 mm floor once converted
        let near = decode(&encode(true, 0, 15, 10));
        let far = decode(&encode(false, 160, 150, 10));
        handle_sample(&core, &mut counter, &settings(), &stats, &near);
        handle_sample(&core, &mut counter, &settings(), &stats, &far);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        let point = events[0].as_point().unwrap();
        assert_eq!(point.distance, 1500.0);
        assert_eq!(point.azimuth, 10.0);
        assert_eq!(point.scan_id, 1);
    }

    #[test]
    fn test_device_error_skips_sample() {
        let core = ScannerCore::new("sweep-test", Pose::identity());
        let (events, _sub) = collect_events(&core);
        let stats = SweepStats::default();
        let mut counter = LogicalScanCounter::new();

        let mut sample = decode(&encode(true, 0, 150, 10));
        sample.error = true;
        handle_sample(&core, &mut counter, &settings(), &stats, &sample);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(events[0].as_status().is_some());
        assert_eq!(stats.device_errors.load(Ordering::Relaxed), 1);
        // Sync still counted
        assert_eq!(counter.current(), 1);
    }

    #[test]
    fn test_loops_publish_and_count_resync() {
        let core = Arc::new(ScannerCore::new("sweep-test", Pose::identity()));
        let (events, _sub) = collect_events(&core);
        let stats = Arc::new(SweepStats::default());
        let queue = Arc::new(ArrayQueue::new(16));
        let mock = MockTransport::new();
        let link: SharedTransport =
            Arc::new(Mutex::new(Box::new(mock.clone()) as Box<dyn Transport>));
        let cancel = CancelToken::new();

        let mut bytes = vec![0xAA; 20];
        bytes.extend_from_slice(&encode(true, 90 * 16, 150, 100));
        mock.inject_read(&bytes);

        let poll = {
            let (link, queue, core, stats, cancel) = (
                Arc::clone(&link),
                Arc::clone(&queue),
                Arc::clone(&core),
                Arc::clone(&stats),
                cancel.clone(),
            );
            let state = core.state_cell();
            thread::spawn(move || poll_loop(link, queue, core, state, stats, cancel))
        };
        let process = {
            let (queue, core, stats, cancel) = (
                Arc::clone(&queue),
                Arc::clone(&core),
                Arc::clone(&stats),
                cancel.clone(),
            );
            thread::spawn(move || processor_loop(queue, core, settings(), stats, cancel))
        };

        assert!(wait_until(|| stats.points_published.load(Ordering::Relaxed) == 1));
        cancel.cancel();
        poll.join().unwrap();
        process.join().unwrap();

        assert_eq!(stats.discarded_frames.load(Ordering::Relaxed), 1);
        assert_eq!(stats.discarded_bytes.load(Ordering::Relaxed), 20);

        let events = events.lock();
        let warning = events.iter().find_map(|e| e.as_status()).unwrap();
        assert!(warning.message.contains("discard 20 bytes"));
        assert_eq!(events.iter().filter(|e| e.as_point().is_some()).count(), 1);
    }
}
