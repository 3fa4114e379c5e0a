//! Header status flag table.
//!
//! Each set bit in `FrameHeader::status_flags` that appears here produces one
//! status event per frame.

use crate::core::types::{StatusEvent, StatusLevel};

/// (bit mask, severity, message)
pub const STATUS_FLAGS: &[(u32, StatusLevel, &str)] = &[
    (1 << 1, StatusLevel::Info, "Scanner sampling rate was modified during this scan"),
    (1 << 2, StatusLevel::Warning, "Device reported invalid data in frame, consistency can't be guaranteed"),
    (1 << 3, StatusLevel::Warning, "Device reported unstable rotation"),
    (1 << 4, StatusLevel::Info, "Device reported skipped packet(s), check CPU and network load or lower scan frequency and sampling rate"),
    (1 << 10, StatusLevel::Warning, "Device temperature below warning threshold (0 °C)"),
    (1 << 11, StatusLevel::Warning, "Device temperature above warning threshold (80 °C)"),
    (1 << 12, StatusLevel::Warning, "Device CPU is about to overload"),
    (1 << 18, StatusLevel::Error, "Device temperature below error threshold (-10 °C)"),
    (1 << 19, StatusLevel::Error, "Device temperature above error threshold (85 °C)"),
    (1 << 20, StatusLevel::Error, "Device CPU overload"),
];

/// Status events for every known bit set in `flags`, in bit order
pub fn events_for(flags: u32) -> impl Iterator<Item = StatusEvent> {
    STATUS_FLAGS
        .iter()
        .filter(move |(mask, _, _)| flags & mask != 0)
        .map(|(_, level, message)| StatusEvent::new(*level, *message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_no_events() {
        assert_eq!(events_for(0).count(), 0);
        // Bits without a table entry are ignored
        assert_eq!(events_for((1 << 0) | (1 << 31)).count(), 0);
    }

    #[test]
    fn test_each_set_bit_yields_one_event() {
        let events: Vec<_> = events_for((1 << 3) | (1 << 20) | (1 << 4)).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].level, StatusLevel::Warning);
        assert_eq!(events[1].level, StatusLevel::Info);
        assert_eq!(events[2].level, StatusLevel::Error);
        assert_eq!(events[2].message, "Device CPU overload");
    }

    #[test]
    fn test_table_bits_are_distinct() {
        let all = STATUS_FLAGS.iter().fold(0u32, |acc, (m, _, _)| {
            assert_eq!(acc & m, 0);
            acc | m
        });
        assert_eq!(events_for(all).count(), STATUS_FLAGS.len());
    }
}
