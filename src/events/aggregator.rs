//! Groups the point stream into complete scans.
//!
//! Buffers are keyed per scanner, so several scanners can feed one
//! aggregator. A scan is emitted when the first point of a later scan
//! arrives, which proves the earlier one complete at the cost of one scan of
//! latency. Points that arrive for an already emitted scan are dropped.

use crate::core::types::{LidarEvent, Point, Scan, ScannerId};
use crate::events::{EventHub, Observer, Subscription};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct ScanBuffer {
    last_scan: Option<u64>,
    points: Vec<Point>,
}

/// Per-scanner scan grouping
pub struct ScanAggregator {
    buffers: RwLock<HashMap<ScannerId, Arc<Mutex<ScanBuffer>>>>,
    scans: EventHub<Scan>,
    late_points: AtomicU64,
}

impl Default for ScanAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanAggregator {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            scans: EventHub::new(),
            late_points: AtomicU64::new(0),
        }
    }

    /// Completed scans are published here
    pub fn scans(&self) -> &EventHub<Scan> {
        &self.scans
    }

    /// Feed the points of `source` into this aggregator
    pub fn attach(self: &Arc<Self>, source: &EventHub<LidarEvent>) -> Subscription {
        source.subscribe(Arc::new(AggregatorObserver(Arc::clone(self))))
    }

    /// Add one point
    ///
    /// Emission happens under the scanner's buffer lock, so scan subscribers
    /// must not push points for the same scanner back into this aggregator.
    pub fn push(&self, point: &Point) {
        let buffer = self.buffer_for(point.scanner);
        let mut buffer = buffer.lock();

        match buffer.last_scan {
            Some(last) if point.scan_id < last => {
                let late = self.late_points.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!(
                    "{}: dropping late point for scan {} (current {}, {} dropped)",
                    point.scanner,
                    point.scan_id,
                    last,
                    late
                );
                return;
            }
            Some(last) if point.scan_id > last => {
                let points = std::mem::take(&mut buffer.points);
                if !points.is_empty() {
                    let scan = Scan {
                        scanner: point.scanner,
                        scan_id: last,
                        points,
                    };
                    log::trace!("{}: scan {} complete ({} points)", scan.scanner, last, scan.len());
                    self.scans.publish(&scan);
                }
                buffer.last_scan = Some(point.scan_id);
            }
            Some(_) => {}
            None => buffer.last_scan = Some(point.scan_id),
        }

        buffer.points.push(*point);
    }

    /// Points buffered for the scan still in progress
    pub fn pending_points(&self, scanner: ScannerId) -> usize {
        self.buffers
            .read()
            .get(&scanner)
            .map(|b| b.lock().points.len())
            .unwrap_or(0)
    }

    /// Forget a scanner's buffer, discarding its open scan
    pub fn remove_scanner(&self, scanner: ScannerId) {
        self.buffers.write().remove(&scanner);
    }

    /// Points dropped because their scan was already emitted
    pub fn late_points(&self) -> u64 {
        self.late_points.load(Ordering::Relaxed)
    }

    fn buffer_for(&self, scanner: ScannerId) -> Arc<Mutex<ScanBuffer>> {
        if let Some(buffer) = self.buffers.read().get(&scanner) {
            return Arc::clone(buffer);
        }
        Arc::clone(self.buffers.write().entry(scanner).or_default())
    }
}

struct AggregatorObserver(Arc<ScanAggregator>);

impl Observer<LidarEvent> for AggregatorObserver {
    fn on_next(&self, event: &LidarEvent) {
        if let LidarEvent::Point(point) = event {
            self.0.push(point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transform::Vector3;

    fn point(scanner: ScannerId, scan_id: u64, azimuth: f64) -> Point {
        Point {
            azimuth,
            distance: 1000.0,
            amplitude: 10,
            scan_id,
            position: Vector3::ZERO,
            scanner,
        }
    }

    fn collect(agg: &ScanAggregator) -> (Arc<Mutex<Vec<Scan>>>, Subscription) {
        let scans = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&scans);
        let sub = agg.scans().subscribe_fn(move |s: &Scan| sink.lock().push(s.clone()));
        (scans, sub)
    }

    #[test]
    fn test_emits_previous_scan_when_next_begins() {
        let agg = ScanAggregator::new();
        let (scans, _sub) = collect(&agg);
        let id = ScannerId::next();

        agg.push(&point(id, 1, 0.0));
        agg.push(&point(id, 1, 1.0));
        assert!(scans.lock().is_empty());

        agg.push(&point(id, 2, 0.0));
        let scans = scans.lock();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].scan_id, 1);
        let azimuths: Vec<f64> = scans[0].points.iter().map(|p| p.azimuth).collect();
        assert_eq!(azimuths, vec![0.0, 1.0]);
        assert_eq!(agg.pending_points(id), 1);
    }

    #[test]
    fn test_scanners_do_not_mix() {
        let agg = ScanAggregator::new();
        let (scans, _sub) = collect(&agg);
        let a = ScannerId::next();
        let b = ScannerId::next();

        agg.push(&point(a, 1, 0.0));
        agg.push(&point(b, 7, 0.0));
        agg.push(&point(b, 7, 1.0));
        agg.push(&point(a, 1, 1.0));
        agg.push(&point(a, 2, 0.0));

        let scans = scans.lock();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].scanner, a);
        assert_eq!(scans[0].len(), 2);
        assert_eq!(agg.pending_points(b), 2);
    }

    #[test]
    fn test_k_scans_for_k_ids() {
        let agg = ScanAggregator::new();
        let (scans, _sub) = collect(&agg);
        let id = ScannerId::next();

        let mut pushed = 0;
        for scan_id in 1..=5u64 {
            for i in 0..scan_id {
                agg.push(&point(id, scan_id, i as f64));
                pushed += 1;
            }
        }
        // Terminator point closes scan 5
        agg.push(&point(id, 6, 0.0));

        let scans = scans.lock();
        assert_eq!(scans.len(), 5);
        for (i, scan) in scans.iter().enumerate() {
            assert_eq!(scan.scan_id, i as u64 + 1);
            assert_eq!(scan.len(), i + 1);
            assert!(scan.points.iter().all(|p| p.scan_id == scan.scan_id));
        }
        assert_eq!(scans.iter().map(Scan::len).sum::<usize>(), pushed);
    }

    #[test]
    fn test_late_points_are_dropped() {
        let agg = ScanAggregator::new();
        let (scans, _sub) = collect(&agg);
        let id = ScannerId::next();

        agg.push(&point(id, 3, 0.0));
        agg.push(&point(id, 4, 0.0));
        agg.push(&point(id, 3, 5.0));

        assert_eq!(agg.late_points(), 1);
        assert_eq!(scans.lock().len(), 1);
        assert_eq!(agg.pending_points(id), 1);
    }

    #[test]
    fn test_attach_consumes_point_events() {
        let agg = Arc::new(ScanAggregator::new());
        let (scans, _sub) = collect(&agg);
        let hub = EventHub::<LidarEvent>::new();
        let _attached = agg.attach(&hub);
        let id = ScannerId::next();

        hub.publish(&LidarEvent::Point(point(id, 1, 0.0)));
        hub.publish(&LidarEvent::Status(crate::core::types::StatusEvent::info("x")));
        hub.publish(&LidarEvent::Point(point(id, 2, 0.0)));

        assert_eq!(scans.lock().len(), 1);
    }

    #[test]
    fn test_concurrent_scanners() {
        let agg = Arc::new(ScanAggregator::new());
        let (scans, _sub) = collect(&agg);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                std::thread::spawn(move || {
                    let id = ScannerId::next();
                    for scan_id in 1..=11u64 {
                        for i in 0..20 {
                            agg.push(&point(id, scan_id, i as f64));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let scans = scans.lock();
        assert_eq!(scans.len(), 40);
        assert!(scans.iter().all(|s| s.len() == 20));
    }
}
