//! Reader thread for the network scanner data socket
//!
//! Reads exactly one header, then exactly the body the header declares, and
//! queues the complete frame for the dispatcher. A header with the wrong
//! magic is reported and skipped using its declared size. If that size is
//! implausible too, the reader hunts for the next magic byte pair.

use super::frame::{FrameHeader, HEADER_BASE_SIZE, MAGIC};
use super::StreamStats;
use crate::core::scanner::ScannerCore;
use crate::core::session::CancelToken;
use crate::core::types::{ScannerState, StateCell, StatusEvent};
use crate::error::{Error, Result};
use crossbeam_queue::ArrayQueue;
use std::io::{ErrorKind, Read};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Complete frame, header bytes included
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub packet: Vec<u8>,
}

/// Fill `buf` completely, looping over partial reads
///
/// Returns `Ok(false)` if cancelled first. Read timeouts are the points
/// where cancellation is observed.
pub fn read_exact_cancellable<R: Read>(
    source: &mut R,
    buf: &mut [u8],
    cancel: &CancelToken,
) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        match source.read(&mut buf[filled..]) {
            Ok(0) => return Err(Error::Connection("connection closed by device".to_string())),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(Error::Connection(format!("socket read failed: {}", e))),
        }
    }
    Ok(true)
}

/// Read and drop `count` bytes
fn skip_bytes<R: Read>(source: &mut R, mut count: usize, cancel: &CancelToken) -> Result<bool> {
    let mut scratch = [0u8; 1024];
    while count > 0 {
        let n = count.min(scratch.len());
        if !read_exact_cancellable(source, &mut scratch[..n], cancel)? {
            return Ok(false);
        }
        count -= n;
    }
    Ok(true)
}

/// First offset of the magic byte pair in `buf`, or of a trailing lone first byte
fn find_magic(buf: &[u8]) -> Option<usize> {
    let [lo, hi] = MAGIC.to_le_bytes();
    (0..buf.len()).find(|&i| buf[i] == lo && buf.get(i + 1).map_or(true, |&b| b == hi))
}

/// Shift `header` until it starts with the magic and is full again
///
/// Returns the number of bytes dropped, or `None` if cancelled.
fn hunt_magic<R: Read>(
    source: &mut R,
    header: &mut [u8; HEADER_BASE_SIZE],
    cancel: &CancelToken,
) -> Result<Option<usize>> {
    let mut dropped = 0;
    loop {
        // Never accept offset 0: that alignment already failed
        let offset = find_magic(&header[1..]).map_or(HEADER_BASE_SIZE, |i| i + 1);
        header.copy_within(offset.., 0);
        dropped += offset;
        let keep = HEADER_BASE_SIZE - offset;
        if !read_exact_cancellable(source, &mut header[keep..], cancel)? {
            return Ok(None);
        }
        if u16::from_le_bytes([header[0], header[1]]) == MAGIC {
            return Ok(Some(dropped));
        }
    }
}

/// Read one frame; `Ok(None)` when cancelled
fn read_frame<R: Read>(
    source: &mut R,
    core: &ScannerCore,
    stats: &StreamStats,
    cancel: &CancelToken,
) -> Result<Option<Frame>> {
    let mut header_bytes = [0u8; HEADER_BASE_SIZE];
    if !read_exact_cancellable(source, &mut header_bytes, cancel)? {
        return Ok(None);
    }

    loop {
        let header = FrameHeader::parse(&header_bytes)?;
        if header.has_valid_magic() && header.has_plausible_size() {
            let mut packet = vec![0u8; header.packet_size as usize];
            packet[..HEADER_BASE_SIZE].copy_from_slice(&header_bytes);
            if !read_exact_cancellable(source, &mut packet[HEADER_BASE_SIZE..], cancel)? {
                return Ok(None);
            }
            return Ok(Some(Frame { header, packet }));
        }

        stats.frames_discarded.fetch_add(1, Ordering::Relaxed);
        if !header.has_valid_magic() && header.has_plausible_size() {
            core.publish_status(StatusEvent::error(format!(
                "Frame magic mismatch (0x{:04X}), skipping {} bytes",
                header.magic, header.packet_size
            )));
            if !skip_bytes(source, header.packet_size as usize - HEADER_BASE_SIZE, cancel)? {
                return Ok(None);
            }
            if !read_exact_cancellable(source, &mut header_bytes, cancel)? {
                return Ok(None);
            }
            continue;
        }

        core.publish_status(StatusEvent::error(format!(
            "Corrupt frame header (magic 0x{:04X}, size {}), resynchronizing",
            header.magic, header.packet_size
        )));
        match hunt_magic(source, &mut header_bytes, cancel)? {
            Some(dropped) => log::debug!("{}: resynchronized after {} bytes", core.name(), dropped),
            None => return Ok(None),
        }
    }
}

/// Reader loop: socket -> frame queue
///
/// A connection error ends the session: the state drops to `Idle` and every
/// loop of the session is cancelled.
pub(super) fn reader_loop<R: Read>(
    mut source: R,
    queue: Arc<ArrayQueue<Frame>>,
    core: Arc<ScannerCore>,
    state: StateCell,
    stats: Arc<StreamStats>,
    cancel: CancelToken,
) {
    log::debug!("{}: reader started", core.name());
    while !cancel.is_cancelled() {
        match read_frame(&mut source, &core, &stats, &cancel) {
            Ok(Some(frame)) => {
                log::trace!(
                    "{}: frame scan={} packet={} points={}",
                    core.name(),
                    frame.header.scan_number,
                    frame.header.packet_number,
                    frame.header.points_this_packet
                );
                stats.frames_received.fetch_add(1, Ordering::Relaxed);
                if queue.force_push(frame).is_some() {
                    let dropped = stats.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 100 == 0 {
                        log::warn!("{}: frame queue full, {} frames dropped", core.name(), dropped);
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                if !cancel.is_cancelled() {
                    core.publish_status(StatusEvent::error(format!("Data connection lost: {}", e)));
                    state.set(ScannerState::Idle);
                    cancel.cancel();
                }
                break;
            }
        }
    }
    log::debug!("{}: reader exiting", core.name());
}
