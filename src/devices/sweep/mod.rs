//! Serial scanner driver (Sweep)
//!
//! Control is a fixed-length ASCII command/response protocol (see
//! [`protocol`]); while acquiring, the device streams 7-byte sample frames
//! (see [`frame`]) on the same line.
//!
//! # Thread Model
//!
//! A running session owns two threads sharing one cancellation token:
//!
//! 1. **Poll**: serial port -> bounded chunk queue, 1 ms backoff when the
//!    port is empty
//! 2. **Processor**: chunk queue -> frame resync -> points and status events
//!
//! # Configuration while running
//!
//! Motor speed and sample rate changes stop acquisition, apply the command
//! and restart. Queries are refused while acquiring because the answer
//! would be interleaved with sample frames.

pub mod frame;
pub mod protocol;
pub mod reader;

use crate::config::SweepConfig;
use crate::core::scanner::{Scanner, ScannerCore};
use crate::core::session::Session;
use crate::core::transform::Pose;
use crate::core::types::ScannerState;
use crate::error::{Error, Result};
use crate::transport::{SerialTransport, Transport};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use protocol::{
    Command, DeviceInfoResponse, MotorSpeed, Response, SampleRate, VersionInfoResponse,
};
use reader::{ProcessorSettings, SharedTransport, SweepStats};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Opens the byte pipe on every `connect()`
pub type TransportFactory = Box<dyn Fn() -> Result<Box<dyn Transport>> + Send + Sync>;

const MOTOR_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Motor stabilisation after a speed change can take far longer than a cold start
const MOTOR_SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_SETTLE: Duration = Duration::from_millis(100);
const RESTART_DELAY: Duration = Duration::from_millis(250);

/// Device metadata read on connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepInfo {
    pub device: DeviceInfoResponse,
    pub version: VersionInfoResponse,
}

/// Point-in-time copy of [`SweepStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStatsSnapshot {
    pub discarded_frames: u64,
    pub discarded_bytes: u64,
    pub chunks_dropped: u64,
    pub points_published: u64,
    pub device_errors: u64,
}

impl SweepStats {
    pub fn snapshot(&self) -> SweepStatsSnapshot {
        SweepStatsSnapshot {
            discarded_frames: self.discarded_frames.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            points_published: self.points_published.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

/// Send `command` and read its fixed-length answer
///
/// Stale input is dropped first so the answer is aligned.
fn transact(transport: &mut dyn Transport, command: Command, timeout: Duration) -> Result<Response> {
    transport.discard_input()?;
    transport.write_all(&command.encode())?;
    transport.flush()?;

    let expected = command.response_len();
    if expected == 0 {
        return Ok(Response::None);
    }

    let mut answer = vec![0u8; expected];
    let mut filled = 0;
    let deadline = Instant::now() + timeout;
    while filled < expected && Instant::now() < deadline {
        match transport.read(&mut answer[filled..])? {
            0 => thread::sleep(Duration::from_millis(1)),
            n => filled += n,
        }
    }
    if filled < expected {
        return Err(Error::protocol(format!(
            "answer was {} bytes long instead of expected {}",
            filled, expected
        )));
    }

    protocol::parse_response(command, &answer)
}

/// One start/stop cycle
struct Streaming {
    queue: Arc<ArrayQueue<Vec<u8>>>,
    session: Session,
}

#[derive(Default)]
struct Lifecycle {
    link: Option<SharedTransport>,
    streaming: Option<Streaming>,
}

/// Serial scanner
pub struct SweepScanner {
    core: Arc<ScannerCore>,
    config: SweepConfig,
    factory: TransportFactory,
    /// Serializes connect/start/stop/disconnect and configuration changes
    lifecycle: Mutex<Lifecycle>,
    info: Mutex<Option<SweepInfo>>,
    stats: Arc<SweepStats>,
}

impl SweepScanner {
    /// Scanner on the serial port named in `config`
    pub fn new(name: &str, config: SweepConfig, pose: Pose) -> Self {
        let (port, baud, timeout) = (config.port.clone(), config.baud_rate, config.read_timeout());
        let factory: TransportFactory = Box::new(move || {
            let transport = SerialTransport::open(&port, baud, timeout)?;
            Ok(Box::new(transport) as Box<dyn Transport>)
        });
        Self::with_transport_factory(name, config, pose, factory)
    }

    /// Scanner over a custom byte pipe
    pub fn with_transport_factory(
        name: &str,
        config: SweepConfig,
        pose: Pose,
        factory: TransportFactory,
    ) -> Self {
        Self {
            core: Arc::new(ScannerCore::new(name, pose)),
            config,
            factory,
            lifecycle: Mutex::new(Lifecycle::default()),
            info: Mutex::new(None),
            stats: Arc::new(SweepStats::default()),
        }
    }

    /// Device metadata, `None` before the first connect
    pub fn info(&self) -> Option<SweepInfo> {
        self.info.lock().clone()
    }

    pub fn stats(&self) -> SweepStatsSnapshot {
        self.stats.snapshot()
    }

    /// Windows that failed their checksum
    pub fn discarded_frames(&self) -> u64 {
        self.stats.discarded_frames.load(Ordering::Relaxed)
    }

    /// Bytes dropped while resynchronizing
    pub fn discarded_bytes(&self) -> u64 {
        self.stats.discarded_bytes.load(Ordering::Relaxed)
    }

    fn link(&self) -> Result<SharedTransport> {
        self.lifecycle
            .lock()
            .link
            .clone()
            .ok_or_else(|| Error::State("scanner is not connected".to_string()))
    }

    /// Link for a query; refused while acquiring
    fn idle_link(&self) -> Result<SharedTransport> {
        if self.core.state() == ScannerState::Running {
            return Err(Error::State(
                "command not available while acquiring".to_string(),
            ));
        }
        self.link()
    }

    fn command(&self, link: &SharedTransport, command: Command) -> Result<Response> {
        let mut transport = link.lock();
        transact(&mut **transport, command, self.config.read_timeout())
    }

    fn poll_motor_ready(&self, link: &SharedTransport, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.command(link, Command::MotorReady) {
                Ok(Response::MotorReady(true)) => return Ok(()),
                Ok(_) => {}
                Err(e) => log::debug!("{}: motor ready query: {}", self.core.name(), e),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "motor not ready after {} ms",
                    timeout.as_millis()
                )));
            }
            thread::sleep(MOTOR_POLL_INTERVAL);
        }
    }

    fn read_info(&self, link: &SharedTransport) -> Result<SweepInfo> {
        let device = match self.command(link, Command::DeviceInfo)? {
            Response::DeviceInfo(device) => device,
            other => return Err(Error::protocol(format!("unexpected answer {:?}", other))),
        };
        let version = match self.command(link, Command::VersionInfo)? {
            Response::VersionInfo(version) => version,
            other => return Err(Error::protocol(format!("unexpected answer {:?}", other))),
        };
        Ok(SweepInfo { device, version })
    }

    /// Block until the motor reports a stable speed
    pub fn wait_for_motor_ready(&self, timeout: Duration) -> Result<()> {
        let link = self.idle_link()?;
        self.poll_motor_ready(&link, timeout)
    }

    /// Re-read `ID` and `IV`
    pub fn update_device_info(&self) -> Result<SweepInfo> {
        let link = self.idle_link()?;
        let info = self.read_info(&link)?;
        *self.info.lock() = Some(info.clone());
        Ok(info)
    }

    /// Current motor speed setting (`MI`)
    pub fn motor_speed(&self) -> Result<MotorSpeed> {
        let link = self.idle_link()?;
        match self.command(&link, Command::MotorInfo)? {
            Response::MotorSpeed(speed) => Ok(speed),
            other => Err(Error::protocol(format!("unexpected answer {:?}", other))),
        }
    }

    /// Current sample rate setting (`LI`)
    pub fn sample_rate(&self) -> Result<SampleRate> {
        let link = self.idle_link()?;
        match self.command(&link, Command::SampleRateInfo)? {
            Response::SampleRate(rate) => Ok(rate),
            other => Err(Error::protocol(format!("unexpected answer {:?}", other))),
        }
    }

    /// Reset the device (`RR`); the device answers nothing and reboots
    pub fn reset(&self) -> Result<()> {
        let link = self.idle_link()?;
        self.command(&link, Command::Reset).map(|_| ())
    }

    /// Run `apply` with acquisition paused, restarting afterwards if it was running
    ///
    /// The lifecycle lock is held throughout, so `start()`/`stop()` from other
    /// threads wait for the whole sequence.
    fn reconfigure<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&SharedTransport) -> Result<()>,
    {
        let mut lifecycle = self.lifecycle.lock();
        let link = lifecycle
            .link
            .clone()
            .ok_or_else(|| Error::State("scanner is not connected".to_string()))?;
        let was_running = self.core.state() == ScannerState::Running;
        if was_running {
            if !self.config.smart_interleave {
                return Err(Error::State(
                    "cannot change device configuration while acquiring".to_string(),
                ));
            }
            self.stop_locked(&mut lifecycle)?;
            thread::sleep(RESTART_DELAY);
        }

        let applied = apply(&link);
        // A session lost during the pause stays down
        let restarted = if was_running && self.core.state() == ScannerState::Connected {
            self.start_locked(&mut lifecycle)
        } else {
            Ok(())
        };
        applied.and(restarted)
    }

    /// Set the rotation speed, 0..=10 Hz, and wait for it to settle
    ///
    /// Nothing is sent when the motor already runs at `hz`.
    pub fn set_motor_speed(&self, hz: u8) -> Result<()> {
        let speed = MotorSpeed::new(hz)?;
        self.link()?;
        if self.info().and_then(|info| info.device.motor_speed) == Some(speed) {
            return Ok(());
        }
        self.reconfigure(|link| {
            self.command(link, Command::SetMotorSpeed(speed))?;
            self.poll_motor_ready(link, MOTOR_SETTLE_TIMEOUT)?;
            if let Some(info) = self.info.lock().as_mut() {
                info.device.motor_speed = Some(speed);
            }
            log::info!("{}: motor speed {} Hz", self.core.name(), hz);
            Ok(())
        })
    }

    pub fn set_sample_rate(&self, rate: SampleRate) -> Result<()> {
        self.reconfigure(|link| {
            self.command(link, Command::SetSampleRate(rate))?;
            if let Some(info) = self.info.lock().as_mut() {
                info.device.sample_rate = Some(rate);
            }
            log::info!("{}: sample rate {} Hz", self.core.name(), rate.hz());
            Ok(())
        })
    }

    /// Open the pipe, force the device idle, wait for the motor, read metadata
    fn open_link(&self) -> Result<(SharedTransport, SweepInfo)> {
        let transport = (self.factory)()?;
        let link: SharedTransport = Arc::new(Mutex::new(transport));
        {
            let mut transport = link.lock();
            transport.write_all(&Command::StopAcquisition.encode())?;
            transport.flush()?;
        }
        thread::sleep(STOP_SETTLE);
        link.lock().discard_input()?;

        self.poll_motor_ready(&link, self.config.motor_ready_timeout())?;
        let info = self.read_info(&link)?;
        Ok((link, info))
    }

    fn spawn_session(&self, link: &SharedTransport) -> Result<Streaming> {
        let queue = Arc::new(ArrayQueue::new(self.config.byte_queue_capacity.max(1)));
        let mut session = Session::new();
        let name = self.core.name();

        let (l, q, core, state, stats) = (
            Arc::clone(link),
            Arc::clone(&queue),
            Arc::clone(&self.core),
            self.core.state_cell(),
            Arc::clone(&self.stats),
        );
        session.spawn(&format!("{}-poll", name), move |cancel| {
            reader::poll_loop(l, q, core, state, stats, cancel)
        })?;

        let settings = ProcessorSettings {
            convert_to_mm: self.config.convert_to_mm,
            min_distance_mm: self.config.min_distance_mm,
        };
        let (q, core, stats) = (Arc::clone(&queue), Arc::clone(&self.core), Arc::clone(&self.stats));
        session.spawn(&format!("{}-process", name), move |cancel| {
            reader::processor_loop(q, core, settings, stats, cancel)
        })?;

        Ok(Streaming { queue, session })
    }

    /// Stop acquisition, join the threads, flush the line
    fn close_stream(&self, link: &SharedTransport, streaming: Streaming) -> Result<()> {
        let Streaming { queue, session } = streaming;

        if let Err(e) = link.lock().write_all(&Command::StopAcquisition.encode()) {
            log::warn!("{}: stop command failed: {}", self.core.name(), e);
        }
        let joined = session.shutdown();

        let mut discarded = 0;
        while queue.pop().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("{}: discarded {} buffered chunks", self.core.name(), discarded);
        }

        // Second stop catches samples sent before the first took effect
        let mop_up = (|| {
            let mut transport = link.lock();
            transport.discard_input()?;
            transport.write_all(&Command::StopAcquisition.encode())?;
            transport.flush()?;
            transport.discard_input()
        })();
        if let Err(e) = mop_up {
            log::warn!("{}: flushing line after stop: {}", self.core.name(), e);
        }
        joined
    }

    fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        match self.core.state() {
            ScannerState::Running => return Ok(()),
            ScannerState::Connected => {}
            state => {
                return Err(Error::State(format!("cannot start while {:?}", state)));
            }
        }
        let link = lifecycle
            .link
            .clone()
            .ok_or_else(|| Error::State("scanner is not connected".to_string()))?;

        self.core.set_state(ScannerState::Starting);
        let opened = self
            .command(&link, Command::StartAcquisition)
            .and_then(|_| self.spawn_session(&link));
        match opened {
            Ok(streaming) => {
                lifecycle.streaming = Some(streaming);
                self.core.set_state(ScannerState::Running);
                log::info!("{}: scanning", self.core.name());
                Ok(())
            }
            Err(e) => {
                let _ = link.lock().write_all(&Command::StopAcquisition.encode());
                self.core.set_state(ScannerState::Connected);
                Err(e)
            }
        }
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<()> {
        let Some(streaming) = lifecycle.streaming.take() else {
            return Ok(());
        };
        let Some(link) = lifecycle.link.clone() else {
            return Ok(());
        };
        let lost = self.core.state() == ScannerState::Idle;
        self.core.set_state(ScannerState::Stopping);
        let result = self.close_stream(&link, streaming);
        if lost {
            lifecycle.link = None;
            self.core.set_state(ScannerState::Idle);
        } else {
            self.core.set_state(ScannerState::Connected);
        }
        log::info!("{}: stopped", self.core.name());
        result
    }
}

impl Scanner for SweepScanner {
    fn core(&self) -> &ScannerCore {
        &self.core
    }

    fn connect(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if self.core.state().is_connected() && lifecycle.link.is_some() {
            return Ok(());
        }
        if let (Some(link), Some(streaming)) = (lifecycle.link.take(), lifecycle.streaming.take()) {
            // Leftover from a lost session
            let _ = self.close_stream(&link, streaming);
        }

        self.core.set_state(ScannerState::Connecting);
        match self.open_link() {
            Ok((link, info)) => {
                log::info!(
                    "{}: connected to {} {} (firmware {}, serial {})",
                    self.core.name(),
                    self.config.port,
                    info.version.model,
                    info.version.firmware,
                    info.version.serial
                );
                *self.info.lock() = Some(info);
                lifecycle.link = Some(link);
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
        let stopped = match (lifecycle.link.take(), lifecycle.streaming.take()) {
            (Some(link), Some(streaming)) => {
                self.core.set_state(ScannerState::Stopping);
                self.close_stream(&link, streaming)
            }
            _ => Ok(()),
        };
        self.core.set_state(ScannerState::Idle);
        log::info!("{}: disconnected", self.core.name());
        stopped
    }

    fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        self.start_locked(&mut lifecycle)
    }

    fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        self.stop_locked(&mut lifecycle)
    }
}

impl Drop for SweepScanner {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("{}: error during teardown: {}", self.core.name(), e);
        }
        self.core.complete();
    }
}
