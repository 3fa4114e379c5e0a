//! Seven-byte sample frames of the serial scanner.
//!
//! ```text
//! b0      sync/error bits (bit0 = first sample of a scan, bit1 = device error)
//! b1..b2  azimuth, u16 LE, 1/16 degree
//! b3..b4  distance, u16 LE, centimetres
//! b5      signal strength
//! b6      sum(b0..b5) % 255
//! ```

/// Frame length in bytes
pub const FRAME_SIZE: usize = 7;

const SYNC_BIT: u8 = 0x01;
const ERROR_BIT: u8 = 0x02;

/// Decoded sample frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub sync: bool,
    pub error: bool,
    /// Degrees
    pub azimuth: f64,
    /// Centimetres
    pub distance: u16,
    pub signal: u8,
}

pub fn checksum_valid(window: &[u8; FRAME_SIZE]) -> bool {
    let sum: u32 = window[..6].iter().map(|&b| b as u32).sum();
    sum % 255 == window[6] as u32
}

/// Decode a window that already passed [`checksum_valid`]
pub fn decode(window: &[u8; FRAME_SIZE]) -> Sample {
    Sample {
        sync: window[0] & SYNC_BIT != 0,
        error: window[0] & ERROR_BIT != 0,
        azimuth: u16::from_le_bytes([window[1], window[2]]) as f64 / 16.0,
        distance: u16::from_le_bytes([window[3], window[4]]),
        signal: window[5],
    }
}

/// Encode a sample (test fixtures and simulators)
pub fn encode(sync: bool, azimuth_raw: u16, distance: u16, signal: u8) -> [u8; FRAME_SIZE] {
    let mut out = [0u8; FRAME_SIZE];
    out[0] = if sync { SYNC_BIT } else { 0 };
    out[1..3].copy_from_slice(&azimuth_raw.to_le_bytes());
    out[3..5].copy_from_slice(&distance.to_le_bytes());
    out[5] = signal;
    let sum: u32 = out[..6].iter().map(|&b| b as u32).sum();
    out[6] = (sum % 255) as u8;
    out
}

/// Output of [`FrameProcessor::push`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameEvent {
    Sample(Sample),
    /// A valid window was found again after `dropped` bytes
    Resynchronized { dropped: u64 },
}

/// Rolling-window frame extractor
///
/// Aligned windows are consumed whole. After a checksum failure the window
/// slides one byte at a time until it validates again.
#[derive(Debug, Default)]
pub struct FrameProcessor {
    window: [u8; FRAME_SIZE],
    fill: usize,
    resyncing: bool,
    resync_dropped: u64,
    discarded_frames: u64,
    discarded_bytes: u64,
    failed_windows: u64,
}

impl FrameProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte; a full window yields at most one event.
    ///
    /// A window that recovers from a resync yields the resync event; its
    /// sample is returned by [`FrameProcessor::take_recovered`].
    pub fn push(&mut self, byte: u8) -> Option<FrameEvent> {
        self.window[self.fill] = byte;
        self.fill += 1;
        if self.fill < FRAME_SIZE {
            return None;
        }

        if checksum_valid(&self.window) {
            self.fill = 0;
            if self.resyncing {
                self.resyncing = false;
                let dropped = std::mem::take(&mut self.resync_dropped);
                self.discarded_bytes += dropped;
                return Some(FrameEvent::Resynchronized { dropped });
            }
            return Some(FrameEvent::Sample(decode(&self.window)));
        }

        self.failed_windows += 1;
        if !self.resyncing {
            self.resyncing = true;
            self.discarded_frames += 1;
        }
        self.window.copy_within(1.., 0);
        self.fill = FRAME_SIZE - 1;
        self.resync_dropped += 1;
        None
    }

    /// Sample of the window that ended the last resync
    pub fn take_recovered(&self) -> Sample {
        decode(&self.window)
    }

    /// Feed a chunk, invoking `sink` for every sample and resync
    pub fn feed<F>(&mut self, bytes: &[u8], mut sink: F)
    where
        F: FnMut(FrameEvent),
    {
        for &byte in bytes {
            match self.push(byte) {
                Some(event @ FrameEvent::Resynchronized { .. }) => {
                    sink(event);
                    sink(FrameEvent::Sample(self.take_recovered()));
                }
                Some(event) => sink(event),
                None => {}
            }
        }
    }

    pub fn discarded_frames(&self) -> u64 {
        self.discarded_frames
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes
    }

    /// Every window that failed its checksum, including the first of each resync
    pub fn failed_windows(&self) -> u64 {
        self.failed_windows
    }

    /// Bytes dropped by a resync still in progress
    pub fn pending_discard(&self) -> u64 {
        self.resync_dropped
    }

    /// Drop the partial window (new session)
    pub fn reset_window(&mut self) {
        self.fill = 0;
        self.resyncing = false;
        self.resync_dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(processor: &mut FrameProcessor, bytes: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        processor.feed(bytes, |e| events.push(e));
        events
    }

    #[test]
    fn test_decode_fields() {
        // 90 degrees, 150 cm, signal 100, sync set
        let frame = encode(true, 90 * 16, 150, 100);
        assert_eq!(frame, [1, 0xA0, 0x05, 150, 0, 100, 161]);
        assert!(checksum_valid(&frame));

        let sample = decode(&frame);
        assert!(sample.sync);
        assert!(!sample.error);
        assert_eq!(sample.azimuth, 90.0);
        assert_eq!(sample.distance, 150);
        assert_eq!(sample.signal, 100);
    }

    #[test]
    fn test_single_byte_corruption_rejected() {
        let frame = encode(false, 1234, 567, 89);
        for i in 0..FRAME_SIZE {
            let mut corrupted = frame;
            corrupted[i] ^= 0x01;
            assert!(!checksum_valid(&corrupted), "byte {i} corruption accepted");
        }
    }

    #[test]
    fn test_fractional_azimuth() {
        let sample = decode(&encode(false, 8, 1, 0));
        assert_eq!(sample.azimuth, 0.5);
    }

    #[test]
    fn test_error_bit() {
        let mut frame = encode(false, 0, 100, 0);
        frame[0] |= ERROR_BIT;
        frame[6] = frame[6].wrapping_add(ERROR_BIT);
        assert!(checksum_valid(&frame));
        assert!(decode(&frame).error);
    }

    #[test]
    fn test_aligned_stream() {
        let mut processor = FrameProcessor::new();
        let mut bytes = Vec::new();
        for i in 0..5u16 {
            bytes.extend_from_slice(&encode(i == 0, i * 160, 100 + i, 50));
        }
        let events = collect(&mut processor, &bytes);
        assert_eq!(events.len(), 5);
        assert_eq!(processor.discarded_frames(), 0);
        assert_eq!(processor.discarded_bytes(), 0);
    }

    #[test]
    fn test_frames_split_across_chunks() {
        let mut processor = FrameProcessor::new();
        let frame = encode(true, 160, 100, 50);
        assert!(collect(&mut processor, &frame[..3]).is_empty());
        let events = collect(&mut processor, &frame[3..]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_twenty_garbage_bytes_then_frame() {
        let mut processor = FrameProcessor::new();
        let mut bytes = vec![0xAA; 20];
        bytes.extend_from_slice(&encode(true, 90 * 16, 150, 100));

        let events = collect(&mut processor, &bytes);
        assert_eq!(
            events,
            vec![
                FrameEvent::Resynchronized { dropped: 20 },
                FrameEvent::Sample(decode(&encode(true, 90 * 16, 150, 100))),
            ]
        );
        assert_eq!(processor.discarded_frames(), 1);
        assert_eq!(processor.discarded_bytes(), 20);

        // Counting only the checks after the first failure would give 19
        assert_eq!(processor.failed_windows(), 20);
        assert_eq!(processor.failed_windows() - processor.discarded_frames(), 19);
    }

    #[test]
    fn test_single_lost_byte() {
        let mut processor = FrameProcessor::new();
        let first = encode(false, 160, 100, 7);
        let second = encode(false, 320, 200, 7);
        let third = encode(false, 480, 300, 7);

        // Drop one byte of the first frame
        let mut bytes = first[1..].to_vec();
        bytes.extend_from_slice(&second);
        bytes.extend_from_slice(&third);

        let events = collect(&mut processor, &bytes);
        let samples: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Sample(s) => Some(s.distance),
                _ => None,
            })
            .collect();
        assert_eq!(samples, vec![200, 300]);
        assert_eq!(processor.discarded_frames(), 1);
        assert_eq!(processor.discarded_bytes(), 6);
    }

    #[test]
    fn test_pending_discard_during_resync() {
        let mut processor = FrameProcessor::new();
        collect(&mut processor, &[0xAA; 9]);
        assert_eq!(processor.discarded_frames(), 1);
        assert_eq!(processor.pending_discard(), 3);
        assert_eq!(processor.discarded_bytes(), 0);

        processor.reset_window();
        assert_eq!(processor.pending_discard(), 0);
    }
}
