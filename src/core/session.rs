//! Per start/stop cycle worker management.
//!
//! Every loop spawned during one session observes the same cancellation
//! token. Stopping cancels the token and joins every worker.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep up to `duration` in short slices; returns false if cancelled
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(20);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}

/// Worker threads of one streaming session
#[derive(Debug, Default)]
pub struct Session {
    cancel: CancelToken,
    workers: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Spawn a named worker that receives the session token
    pub fn spawn<F>(&mut self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let token = self.token();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))
            .map_err(|e| Error::Other(format!("Failed to spawn {} thread: {}", name, e)))?;
        self.workers.push(handle);
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for every worker
    pub fn shutdown(mut self) -> Result<()> {
        self.join_all()
    }

    fn join_all(&mut self) -> Result<()> {
        self.cancel.cancel();
        let mut panicked = false;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                log::error!("{} thread panicked", name);
                panicked = true;
            }
        }
        if panicked {
            Err(Error::ThreadPanic)
        } else {
            Ok(())
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            let _ = self.join_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shutdown_stops_all_workers() {
        let mut session = Session::new();
        let iterations = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let iterations = Arc::clone(&iterations);
            session
                .spawn(&format!("test-worker-{i}"), move |token| {
                    while !token.is_cancelled() {
                        iterations.fetch_add(1, Ordering::Relaxed);
                        thread::sleep(Duration::from_millis(1));
                    }
                })
                .unwrap();
        }

        thread::sleep(Duration::from_millis(20));
        session.shutdown().unwrap();
        let after = iterations.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(iterations.load(Ordering::Relaxed), after);
    }

    #[test]
    fn test_panicking_worker_reported() {
        let mut session = Session::new();
        session.spawn("test-panic", |_| panic!("boom")).unwrap();
        assert!(matches!(session.shutdown(), Err(Error::ThreadPanic)));
    }

    #[test]
    fn test_cancellable_sleep() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
        token.cancel();
        assert!(!token.sleep(Duration::from_secs(10)));
    }
}
