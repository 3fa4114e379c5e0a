//! Network scanner driver (R2000 family)
//!
//! Control commands travel over HTTP (see [`http`]); scan data arrives as
//! binary frames on a TCP socket opened per streaming session.
//!
//! # Thread Model
//!
//! A running session owns three threads sharing one cancellation token:
//!
//! 1. **Reader**: socket -> bounded frame queue (oldest dropped when full)
//! 2. **Dispatcher**: frame queue -> status events and points, 10 ms backoff
//!    when idle
//! 3. **Watchdog** (optional): feeds the device watchdog at
//!    `max(1 s, timeout / 4)`
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Connecting -> Connected -> Starting -> Running -> Stopping -> Connected
//! ```
//!
//! `connect()` only reads the protocol version. `start()` acquires a handle,
//! opens the data socket and starts output; any failure releases what was
//! acquired and returns to `Connected`. A lost data connection drops the state
//! to `Idle`; `stop()` still releases the handle and joins the threads.

pub mod dispatcher;
pub mod frame;
pub mod http;
pub mod parameters;
pub mod reader;
pub mod status_flags;
pub mod watchdog;

use crate::config::R2000Config;
use crate::core::scanner::{Scanner, ScannerCore};
use crate::core::session::Session;
use crate::core::transform::Pose;
use crate::core::types::ScannerState;
use crate::error::{Error, Result};
use crossbeam_queue::ArrayQueue;
use http::{CommandClient, DeviceApi, Handle, ProtocolVersion, UreqClient};
use parking_lot::Mutex;
use reader::Frame;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use watchdog::Feeder;

/// Data stream counters, shared with the session threads
#[derive(Debug, Default)]
pub struct StreamStats {
    /// Frames read off the socket
    pub frames_received: AtomicU64,
    /// Frames discarded for bad magic or size
    pub frames_discarded: AtomicU64,
    /// Frames dropped because the queue was full
    pub frames_dropped: AtomicU64,
    pub points_published: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub frames_received: u64,
    pub frames_discarded: u64,
    pub frames_dropped: u64,
    pub points_published: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            points_published: self.points_published.load(Ordering::Relaxed),
        }
    }
}

/// One start/stop cycle
struct Streaming {
    handle: Handle,
    socket: TcpStream,
    queue: Arc<ArrayQueue<Frame>>,
    session: Session,
}

#[derive(Default)]
struct Lifecycle {
    protocol: Option<ProtocolVersion>,
    streaming: Option<Streaming>,
}

/// Network scanner
pub struct R2000Scanner {
    core: Arc<ScannerCore>,
    config: R2000Config,
    api: DeviceApi,
    /// Serializes connect/start/stop/disconnect
    lifecycle: Mutex<Lifecycle>,
    stats: Arc<StreamStats>,
}

impl R2000Scanner {
    /// Scanner talking HTTP to `config.host`
    pub fn new(name: &str, config: R2000Config, pose: Pose) -> Self {
        let client = UreqClient::new(&config.host, config.http_timeout());
        Self::with_client(name, config, pose, Arc::new(client))
    }

    /// Scanner using a custom control-plane client
    pub fn with_client(
        name: &str,
        config: R2000Config,
        pose: Pose,
        client: Arc<dyn CommandClient>,
    ) -> Self {
        Self {
            core: Arc::new(ScannerCore::new(name, pose)),
            config,
            api: DeviceApi::new(client),
            lifecycle: Mutex::new(Lifecycle::default()),
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Protocol version read on connect
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.lifecycle.lock().protocol
    }

    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    fn require_protocol(&self) -> Result<ProtocolVersion> {
        self.protocol_version()
            .ok_or_else(|| Error::State("scanner is not connected".to_string()))
    }

    /// Read named device parameters
    pub fn get_parameters(
        &self,
        names: &[&str],
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let version = self.require_protocol()?;
        for name in names {
            parameters::check_readable(name, version)?;
        }
        self.api.get_parameters(names)
    }

    /// Write one device parameter
    pub fn set_parameter(&self, name: &str, value: &str) -> Result<()> {
        let version = self.require_protocol()?;
        parameters::check_writable(name, version)?;
        log::info!("{}: set {}={}", self.core.name(), name, value);
        self.api.set_parameters(&[(name, value)])
    }

    /// Set the rotation frequency, Hz
    ///
    /// From protocol 1.01 the value is checked against the device's
    /// advertised range first.
    pub fn set_scan_frequency(&self, hz: f64) -> Result<()> {
        let version = self.require_protocol()?;
        if !hz.is_finite() || hz <= 0.0 {
            return Err(Error::InvalidParameter(format!("scan frequency {} Hz", hz)));
        }
        if version >= ProtocolVersion::V1_01 {
            let range = self
                .api
                .get_parameters(&["scan_frequency_min", "scan_frequency_max"])?;
            let min = range.get("scan_frequency_min").and_then(|v| v.as_f64());
            let max = range.get("scan_frequency_max").and_then(|v| v.as_f64());
            if let (Some(min), Some(max)) = (min, max) {
                if hz < min || hz > max {
                    return Err(Error::InvalidParameter(format!(
                        "scan frequency {} Hz outside device range [{}, {}]",
                        hz, min, max
                    )));
                }
            }
        }
        self.set_parameter("scan_frequency", &hz.to_string())
    }

    pub fn set_samples_per_scan(&self, samples: u32) -> Result<()> {
        if samples == 0 {
            return Err(Error::InvalidParameter("samples_per_scan must be > 0".to_string()));
        }
        self.set_parameter("samples_per_scan", &samples.to_string())
    }

    fn open_socket(&self, port: u16) -> Result<TcpStream> {
        let addrs = (self.config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", self.config.host, e)))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout()) {
                Ok(socket) => {
                    socket.set_read_timeout(Some(self.config.read_timeout()))?;
                    socket.set_nodelay(true)?;
                    return Ok(socket);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(Error::Connection(match last_err {
            Some(e) => format!("cannot connect to {}:{}: {}", self.config.host, port, e),
            None => format!("no address for {}", self.config.host),
        }))
    }

    fn spawn_session(
        &self,
        socket: &TcpStream,
        handle: &Handle,
        version: ProtocolVersion,
        queue: &Arc<ArrayQueue<Frame>>,
    ) -> Result<Session> {
        let mut session = Session::new();
        let name = self.core.name();

        let reader_socket = socket.try_clone()?;
        let (q, core, state, stats) = (
            Arc::clone(queue),
            Arc::clone(&self.core),
            self.core.state_cell(),
            Arc::clone(&self.stats),
        );
        session.spawn(&format!("{}-reader", name), move |cancel| {
            reader::reader_loop(reader_socket, q, core, state, stats, cancel)
        })?;

        let (q, core, stats) = (Arc::clone(queue), Arc::clone(&self.core), Arc::clone(&self.stats));
        session.spawn(&format!("{}-dispatch", name), move |cancel| {
            dispatcher::dispatcher_loop(q, core, stats, cancel)
        })?;

        if self.config.watchdog {
            let feeder = if version.supports_tcp_watchdog_feed() {
                Feeder::Tcp(socket.try_clone()?)
            } else {
                Feeder::<TcpStream>::Http(self.api.clone(), handle.clone())
            };
            let interval = watchdog::feed_interval(self.config.watchdog_timeout_ms);
            let (core, state) = (Arc::clone(&self.core), self.core.state_cell());
            session.spawn(&format!("{}-watchdog", name), move |cancel| {
                watchdog::watchdog_loop(feeder, interval, core, state, cancel)
            })?;
        }
        Ok(session)
    }

    /// Handshake for one session; releases the handle on failure
    fn open_stream(&self, version: ProtocolVersion) -> Result<Streaming> {
        let watchdog = self.config.watchdog.then_some(self.config.watchdog_timeout_ms);
        let handle =
            self.api
                .request_handle_tcp(self.config.packet_type, self.config.start_angle, watchdog)?;
        log::info!(
            "{}: acquired handle {} on port {}",
            self.core.name(),
            handle.token,
            handle.port
        );

        let opened = self.open_socket(handle.port).and_then(|socket| {
            self.api.start_scanoutput(&handle)?;
            let queue = Arc::new(ArrayQueue::new(self.config.frame_queue_capacity.max(1)));
            match self.spawn_session(&socket, &handle, version, &queue) {
                Ok(session) => Ok((socket, queue, session)),
                Err(e) => {
                    let _ = self.api.stop_scanoutput(&handle);
                    let _ = socket.shutdown(Shutdown::Both);
                    Err(e)
                }
            }
        });

        match opened {
            Ok((socket, queue, session)) => Ok(Streaming {
                handle,
                socket,
                queue,
                session,
            }),
            Err(e) => {
                if let Err(release_err) = self.api.release_handle(&handle) {
                    log::warn!(
                        "{}: releasing handle after failed start: {}",
                        self.core.name(),
                        release_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Stop output, release the handle, join the threads
    fn close_stream(&self, streaming: Streaming) -> Result<()> {
        let Streaming {
            handle,
            socket,
            queue,
            session,
        } = streaming;

        if let Err(e) = self.api.stop_scanoutput(&handle) {
            log::warn!("{}: stop_scanoutput failed: {}", self.core.name(), e);
        }
        if let Err(e) = self.api.release_handle(&handle) {
            log::warn!("{}: release_handle failed: {}", self.core.name(), e);
        }

        session.cancel();
        let _ = socket.shutdown(Shutdown::Both);
        let joined = session.shutdown();

        let mut discarded = 0;
        while queue.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("{}: discarded {} buffered frames", self.core.name(), discarded);
        }
        joined
    }
}

impl Scanner for R2000Scanner {
    fn core(&self) -> &ScannerCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if self.core.state().is_connected() && lifecycle.protocol.is_some() {
            return Ok(());
        }
        if let Some(streaming) = lifecycle.streaming.take() {
            // Leftover from a lost session
            self.close_stream(streaming)?;
        }

        self.core.set_state(ScannerState::Connecting);
        match self.api.protocol_info() {
            Ok(info) => {
                log::info!(
                    "{}: connected to {} ({} {})",
                    self.core.name(),
                    self.config.host,
                    info.protocol_name,
                    info.version()
                );
                lifecycle.protocol = Some(info.version());
                self.core.set_state(ScannerState::Connected);
                Ok(())
            }
            Err(e) => {
                self.core.set_state(ScannerState::Idle);
                Err(e)
            }
        }
    }

    fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let stopped = match lifecycle.streaming.take() {
            Some(streaming) => {
                self.core.set_state(ScannerState::Stopping);
                self.close_stream(streaming)
            }
            None => Ok(()),
        };
        lifecycle.protocol = None;
        self.core.set_state(ScannerState::Idle);
        log::info!("{}: disconnected", self.core.name());
        stopped
    }

    fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match self.core.state() {
            ScannerState::Running => return Ok(()),
            ScannerState::Connected => {}
            state => {
                return Err(Error::State(format!("cannot start while {:?}", state)));
            }
        }
        let version = lifecycle
            .protocol
            .ok_or_else(|| Error::State("scanner is not connected".to_string()))?;

        self.core.set_state(ScannerState::Starting);
        match self.open_stream(version) {
            Ok(streaming) => {
                lifecycle.streaming = Some(streaming);
                self.core.set_state(ScannerState::Running);
                log::info!("{}: scanning", self.core.name());
                Ok(())
            }
            Err(e) => {
                self.core.set_state(ScannerState::Connected);
                Err(e)
            }
        }
    }

    fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        let Some(streaming) = lifecycle.streaming.take() else {
            return Ok(());
        };
        let lost = self.core.state() == ScannerState::Idle;
        self.core.set_state(ScannerState::Stopping);
        let result = self.close_stream(streaming);
        if lost {
            lifecycle.protocol = None;
            self.core.set_state(ScannerState::Idle);
        } else {
            self.core.set_state(ScannerState::Connected);
        }
        log::info!("{}: stopped", self.core.name());
        result
    }
}

impl Drop for R2000Scanner {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("{}: error during teardown: {}", self.core.name(), e);
        }
        self.core.complete();
    }
}
