//! Event distribution for one scanner instance.
//!
//! [`EventHub`] fans every published event out to N subscribers. The
//! registry is copy-on-write: `publish` snapshots the current subscriber list
//! and iterates the snapshot, so subscribers may unsubscribe (or subscribe
//! others) from inside their own callback.
//!
//! Three kinds of subscriber are supported:
//! - any [`Observer`] implementation
//! - a closure ([`EventHub::subscribe_fn`])
//! - a bounded crossbeam channel ([`EventHub::subscribe_channel`]); events
//!   are dropped when the channel is full and the subscriber is pruned once
//!   its receiver is gone

pub mod aggregator;

use crate::core::types::{LidarEvent, Point, StatusEvent, StatusLevel};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receives events from an [`EventHub`]
pub trait Observer<T>: Send + Sync {
    /// Called for every published event
    fn on_next(&self, event: &T);

    /// Called exactly once when the hub completes
    fn on_completed(&self) {}

    /// Returning true removes the observer after the current publish
    fn is_closed(&self) -> bool {
        false
    }
}

struct FnObserver<F>(F);

impl<T, F> Observer<T> for FnObserver<F>
where
    F: Fn(&T) + Send + Sync,
{
    fn on_next(&self, event: &T) {
        (self.0)(event)
    }
}

struct ChannelObserver<T> {
    tx: Mutex<Option<Sender<T>>>,
    closed: AtomicBool,
    dropped: Arc<AtomicU64>,
}

impl<T: Clone + Send> Observer<T> for ChannelObserver<T> {
    fn on_next(&self, event: &T) {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.closed.store(true, Ordering::Relaxed);
            }
        }
    }

    fn on_completed(&self) {
        // Dropping the sender lets the receiver observe disconnection
        self.tx.lock().take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

struct Entry<T> {
    id: u64,
    observer: Arc<dyn Observer<T>>,
}

// Manual impl: derive would require T: Clone
impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            observer: Arc::clone(&self.observer),
        }
    }
}

struct HubInner<T> {
    registry: RwLock<Arc<Vec<Entry<T>>>>,
    next_id: AtomicU64,
    completed: AtomicBool,
    dropped: Arc<AtomicU64>,
}

impl<T> HubInner<T> {
    fn remove(&self, id: u64) -> bool {
        let mut registry = self.registry.write();
        if !registry.iter().any(|e| e.id == id) {
            return false;
        }
        let remaining: Vec<Entry<T>> = registry.iter().filter(|e| e.id != id).cloned().collect();
        *registry = Arc::new(remaining);
        true
    }
}

/// Subscription registry and fan-out
pub struct EventHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                registry: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                completed: AtomicBool::new(false),
                dropped: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Register an observer
    ///
    /// After [`complete`](Self::complete) the observer is completed at once
    /// and the returned subscription is inert.
    pub fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Subscription {
        {
            let mut registry = self.inner.registry.write();
            if !self.inner.completed.load(Ordering::Acquire) {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                let mut entries: Vec<Entry<T>> = registry.iter().cloned().collect();
                entries.push(Entry { id, observer });
                *registry = Arc::new(entries);

                let weak: Weak<HubInner<T>> = Arc::downgrade(&self.inner);
                return Subscription::new(move || {
                    weak.upgrade().map(|hub| hub.remove(id)).unwrap_or(false)
                });
            }
        }
        observer.on_completed();
        Subscription::inert()
    }

    /// Register a closure called for every event
    pub fn subscribe_fn<F>(&self, f: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(FnObserver(f)))
    }

    /// Register a bounded channel subscriber
    ///
    /// Events that do not fit are dropped and counted in
    /// [`dropped_events`](Self::dropped_events). The receiver disconnects
    /// when the hub completes.
    pub fn subscribe_channel(&self, capacity: usize) -> (Receiver<T>, Subscription)
    where
        T: Clone,
    {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        let observer = ChannelObserver {
            tx: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            dropped: Arc::clone(&self.inner.dropped),
        };
        let subscription = self.subscribe(Arc::new(observer));
        (rx, subscription)
    }

    /// Deliver `event` to every current subscriber
    pub fn publish(&self, event: &T) {
        let snapshot: Arc<Vec<Entry<T>>> = self.inner.registry.read().clone();
        let mut closed = Vec::new();
        for entry in snapshot.iter() {
            entry.observer.on_next(event);
            if entry.observer.is_closed() {
                closed.push(entry.id);
            }
        }
        for id in closed {
            if self.inner.remove(id) {
                log::debug!("Pruned disconnected channel subscriber {}", id);
            }
        }
    }

    /// Signal completion to every subscriber exactly once
    ///
    /// Subsequent calls are no-ops; the hub stays usable as a sink that
    /// delivers nothing.
    pub fn complete(&self) {
        let snapshot = {
            let mut registry = self.inner.registry.write();
            if self.inner.completed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::replace(&mut *registry, Arc::new(Vec::new()))
        };
        for entry in snapshot.iter() {
            entry.observer.on_completed();
        }
    }

    pub fn is_completed(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Events dropped by full channel subscribers
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl EventHub<LidarEvent> {
    /// Subscribe to points only
    pub fn subscribe_points<F>(&self, f: F) -> Subscription
    where
        F: Fn(&Point) + Send + Sync + 'static,
    {
        self.subscribe_fn(move |event: &LidarEvent| {
            if let LidarEvent::Point(p) = event {
                f(p);
            }
        })
    }

    /// Subscribe to status events at or above `min_level`
    pub fn subscribe_status<F>(&self, min_level: StatusLevel, f: F) -> Subscription
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        self.subscribe_fn(move |event: &LidarEvent| {
            if let LidarEvent::Status(s) = event {
                if s.level >= min_level {
                    f(s);
                }
            }
        })
    }
}

/// Handle returned by `subscribe`
///
/// Dropping it unsubscribes. Use [`detach`](Self::detach) to keep the
/// subscriber registered for the hub's lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() -> bool + Send>>,
}

impl Subscription {
    fn new<F>(release: F) -> Self
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    fn inert() -> Self {
        Self { release: None }
    }

    /// Remove the subscriber; returns false if it was already gone
    pub fn unsubscribe(&mut self) -> bool {
        match self.release.take() {
            Some(release) => release(),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    /// Leave the subscriber registered
    pub fn detach(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<u32>>,
        completions: AtomicUsize,
    }

    impl Observer<u32> for Recorder {
        fn on_next(&self, event: &u32) {
            self.seen.lock().push(*event);
        }

        fn on_completed(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let hub = EventHub::<u32>::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let _sa = hub.subscribe(a.clone());
        let _sb = hub.subscribe(b.clone());

        hub.publish(&1);
        hub.publish(&2);

        assert_eq!(*a.seen.lock(), vec![1, 2]);
        assert_eq!(*b.seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_unsubscribe_is_idempotent_and_targeted() {
        let hub = EventHub::<u32>::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let mut sa = hub.subscribe(a.clone());
        let _sb = hub.subscribe(b.clone());

        assert!(sa.unsubscribe());
        assert!(!sa.unsubscribe());
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&7);
        assert!(a.seen.lock().is_empty());
        assert_eq!(*b.seen.lock(), vec![7]);
    }

    #[test]
    fn test_drop_unsubscribes_but_detach_keeps() {
        let hub = EventHub::<u32>::new();
        {
            let _s = hub.subscribe_fn(|_| {});
        }
        assert_eq!(hub.subscriber_count(), 0);

        hub.subscribe_fn(|_| {}).detach();
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let hub = EventHub::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_cb = Arc::clone(&slot);
        let calls_cb = Arc::clone(&calls);
        let sub = hub.subscribe_fn(move |_| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            if let Some(mut s) = slot_cb.lock().take() {
                s.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        let other = Arc::new(Recorder::default());
        let _so = hub.subscribe(other.clone());

        hub.publish(&1);
        hub.publish(&2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*other.seen.lock(), vec![1, 2]);
    }

    #[test]
    fn test_complete_signals_each_subscriber_once() {
        let hub = EventHub::<u32>::new();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let _sa = hub.subscribe(a.clone());
        let mut sb = hub.subscribe(b.clone());

        hub.complete();
        hub.complete();
        // Releasing after completion must not disturb anything
        assert!(!sb.unsubscribe());

        assert_eq!(a.completions.load(Ordering::SeqCst), 1);
        assert_eq!(b.completions.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 0);

        hub.publish(&3);
        assert!(a.seen.lock().is_empty());
    }

    #[test]
    fn test_subscribe_after_complete_completes_immediately() {
        let hub = EventHub::<u32>::new();
        hub.complete();
        let late = Arc::new(Recorder::default());
        let sub = hub.subscribe(late.clone());
        assert!(!sub.is_active());
        assert_eq!(late.completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_subscriber_drops_when_full() {
        let hub = EventHub::<u32>::new();
        let (rx, _sub) = hub.subscribe_channel(2);

        for i in 0..5 {
            hub.publish(&i);
        }

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(hub.dropped_events(), 3);
    }

    #[test]
    fn test_channel_subscriber_pruned_when_receiver_gone() {
        let hub = EventHub::<u32>::new();
        let (rx, sub) = hub.subscribe_channel(4);
        sub.detach();
        drop(rx);

        hub.publish(&1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_channel_disconnects_on_complete() {
        let hub = EventHub::<u32>::new();
        let (rx, _sub) = hub.subscribe_channel(4);
        hub.publish(&9);
        hub.complete();

        assert_eq!(rx.recv().ok(), Some(9));
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_typed_views_filter_events() {
        use crate::core::transform::Vector3;
        use crate::core::types::ScannerId;

        let hub = EventHub::<LidarEvent>::new();
        let points = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&points);
        let _sp = hub.subscribe_points(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        let e = Arc::clone(&errors);
        let _se = hub.subscribe_status(StatusLevel::Warning, move |_| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(&LidarEvent::Point(Point {
            azimuth: 0.0,
            distance: 1.0,
            amplitude: 0,
            scan_id: 1,
            position: Vector3::ZERO,
            scanner: ScannerId::next(),
        }));
        hub.publish(&LidarEvent::Status(StatusEvent::info("skipped packets")));
        hub.publish(&LidarEvent::Status(StatusEvent::error("CPU overload")));

        assert_eq!(points.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }
}
