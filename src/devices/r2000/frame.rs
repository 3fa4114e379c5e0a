//! Binary scan data frames of the network scanner.
//!
//! Every frame starts with a little-endian header that declares its own size,
//! followed by `points_this_packet` samples in one of three encodings:
//!
//! | Type | Size | Layout                                         |
//! |------|------|------------------------------------------------|
//! | A    | 4    | distance u32                                   |
//! | B    | 6    | distance u32, amplitude u16                    |
//! | C    | 4    | distance bits 0..20, amplitude bits 20..32     |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Frame magic, little-endian on the wire (`5C A2`)
pub const MAGIC: u16 = 0xA25C;

/// Size of the fixed header fields this decoder understands
pub const HEADER_BASE_SIZE: usize = 60;

/// Largest frame the device will send
pub const MAX_PACKET_SIZE: usize = 65_536;

/// Invalid distance marker, packet types A and B
pub const INVALID_DISTANCE_AB: u32 = 0xFFFF_FFFF;

/// Invalid distance marker, packet type C (all 20 distance bits set)
pub const INVALID_DISTANCE_C: u32 = 0xF_FFFF;

/// Point encoding of a data frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    /// Distance only
    A,
    /// Distance and 16-bit amplitude
    B,
    /// Bit-packed distance and 12-bit amplitude
    C,
}

impl PacketType {
    /// Wire value: ASCII letter in a u16
    pub fn to_wire(self) -> u16 {
        match self {
            PacketType::A => b'A' as u16,
            PacketType::B => b'B' as u16,
            PacketType::C => b'C' as u16,
        }
    }

    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x41 => Some(PacketType::A),
            0x42 => Some(PacketType::B),
            0x43 => Some(PacketType::C),
            _ => None,
        }
    }

    /// Query string letter
    pub fn as_str(self) -> &'static str {
        match self {
            PacketType::A => "A",
            PacketType::B => "B",
            PacketType::C => "C",
        }
    }

    /// Bytes per encoded point
    pub fn point_size(self) -> usize {
        match self {
            PacketType::A | PacketType::C => 4,
            PacketType::B => 6,
        }
    }

    pub fn invalid_distance(self) -> u32 {
        match self {
            PacketType::A | PacketType::B => INVALID_DISTANCE_AB,
            PacketType::C => INVALID_DISTANCE_C,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub magic: u16,
    pub packet_type: u16,
    /// Whole frame including header, bytes
    pub packet_size: u32,
    /// Header only, bytes; points start at this offset
    pub header_size: u16,
    /// Device scan counter (wraps)
    pub scan_number: u16,
    pub packet_number: u16,
    pub timestamp_raw: u64,
    pub timestamp_sync: u64,
    pub status_flags: u32,
    /// Scan frequency, 1/1000 Hz
    pub scan_frequency: u32,
    pub points_per_scan: u16,
    pub points_this_packet: u16,
    pub first_index: u16,
    /// 1/10000 degree
    pub first_angle: i32,
    /// 1/10000 degree
    pub angular_increment: i32,
    pub iq_input: u32,
    pub iq_overload: u32,
}

fn u16_at(b: &[u8], o: usize) -> u16 {
    u16::from_le_bytes([b[o], b[o + 1]])
}

fn u32_at(b: &[u8], o: usize) -> u32 {
    u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]])
}

fn i32_at(b: &[u8], o: usize) -> i32 {
    u32_at(b, o) as i32
}

fn u64_at(b: &[u8], o: usize) -> u64 {
    (u32_at(b, o) as u64) | ((u32_at(b, o + 4) as u64) << 32)
}

impl FrameHeader {
    /// Parse the fixed header fields; does not check the magic
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BASE_SIZE {
            return Err(Error::FrameIntegrity(format!(
                "header needs {} bytes, got {}",
                HEADER_BASE_SIZE,
                bytes.len()
            )));
        }
        Ok(Self {
            magic: u16_at(bytes, 0),
            packet_type: u16_at(bytes, 2),
            packet_size: u32_at(bytes, 4),
            header_size: u16_at(bytes, 8),
            scan_number: u16_at(bytes, 10),
            packet_number: u16_at(bytes, 12),
            timestamp_raw: u64_at(bytes, 14),
            timestamp_sync: u64_at(bytes, 22),
            status_flags: u32_at(bytes, 30),
            scan_frequency: u32_at(bytes, 34),
            points_per_scan: u16_at(bytes, 38),
            points_this_packet: u16_at(bytes, 40),
            first_index: u16_at(bytes, 42),
            first_angle: i32_at(bytes, 44),
            angular_increment: i32_at(bytes, 48),
            iq_input: u32_at(bytes, 52),
            iq_overload: u32_at(bytes, 56),
        })
    }

    /// Encode the fixed fields, zero-padded to `header_size`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity((self.header_size as usize).max(HEADER_BASE_SIZE));
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.packet_type.to_le_bytes());
        out.extend_from_slice(&self.packet_size.to_le_bytes());
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&self.scan_number.to_le_bytes());
        out.extend_from_slice(&self.packet_number.to_le_bytes());
        out.extend_from_slice(&self.timestamp_raw.to_le_bytes());
        out.extend_from_slice(&self.timestamp_sync.to_le_bytes());
        out.extend_from_slice(&self.status_flags.to_le_bytes());
        out.extend_from_slice(&self.scan_frequency.to_le_bytes());
        out.extend_from_slice(&self.points_per_scan.to_le_bytes());
        out.extend_from_slice(&self.points_this_packet.to_le_bytes());
        out.extend_from_slice(&self.first_index.to_le_bytes());
        out.extend_from_slice(&self.first_angle.to_le_bytes());
        out.extend_from_slice(&self.angular_increment.to_le_bytes());
        out.extend_from_slice(&self.iq_input.to_le_bytes());
        out.extend_from_slice(&self.iq_overload.to_le_bytes());
        out.resize((self.header_size as usize).max(HEADER_BASE_SIZE), 0);
        out
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    /// Declared size is large enough for the header and not absurd
    pub fn has_plausible_size(&self) -> bool {
        let size = self.packet_size as usize;
        let header = self.header_size as usize;
        header >= HEADER_BASE_SIZE && size >= header && size <= MAX_PACKET_SIZE
    }

    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_wire(self.packet_type)
    }

    /// Azimuth of the `index`-th point in this frame, degrees
    pub fn azimuth_of(&self, index: usize) -> f64 {
        (self.first_angle as f64 + index as f64 * self.angular_increment as f64) / 10_000.0
    }
}

/// One decoded sample, before coordinate transformation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub azimuth: f64,
    /// Device units (millimetres)
    pub distance: u32,
    pub amplitude: u8,
    pub valid: bool,
}

/// Decode every point of a complete frame (header included in `packet`)
pub fn decode_points(header: &FrameHeader, packet: &[u8]) -> Result<Vec<RawSample>> {
    let kind = header.kind().ok_or_else(|| {
        Error::FrameIntegrity(format!("unknown packet type 0x{:04X}", header.packet_type))
    })?;
    let count = header.points_this_packet as usize;
    let start = header.header_size as usize;
    let size = kind.point_size();
    let end = start + count * size;
    if packet.len() < end {
        return Err(Error::FrameIntegrity(format!(
            "frame holds {} bytes, {} points of type {} need {}",
            packet.len(),
            count,
            kind.as_str(),
            end
        )));
    }

    let invalid = kind.invalid_distance();
    let samples = packet[start..end]
        .chunks_exact(size)
        .enumerate()
        .map(|(i, raw)| {
            let (distance, amplitude) = match kind {
                PacketType::A => (u32_at(raw, 0), 0u8),
                PacketType::B => (u32_at(raw, 0), (u16_at(raw, 4) >> 8) as u8),
                PacketType::C => {
                    let word = u32_at(raw, 0);
                    (word & INVALID_DISTANCE_C, (word >> 24) as u8)
                }
            };
            RawSample {
                azimuth: header.azimuth_of(i),
                distance,
                amplitude,
                valid: distance != invalid,
            }
        })
        .collect();
    Ok(samples)
}

/// Pack a type C point
pub fn pack_point_c(distance: u32, amplitude: u16) -> u32 {
    (distance & INVALID_DISTANCE_C) | ((amplitude as u32 & 0xFFF) << 20)
}
