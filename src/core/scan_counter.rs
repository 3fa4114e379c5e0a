//! Logical scan counter.
//!
//! Devices number their scans with a narrow counter that wraps. The logical
//! counter advances by exactly one whenever the native value changes, in
//! either direction, so it never needs to know the wrap width.

/// Monotonic scan id derived from a device-native counter
#[derive(Debug, Clone, Default)]
pub struct LogicalScanCounter {
    last_native: Option<u64>,
    logical: u64,
}

impl LogicalScanCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the native counter of the next frame; returns the logical id.
    ///
    /// The first observation yields 1.
    pub fn observe(&mut self, native: u64) -> u64 {
        if self.last_native != Some(native) {
            self.logical += 1;
            self.last_native = Some(native);
        }
        self.logical
    }

    /// Advance unconditionally (scan-sync flag on devices without a counter).
    pub fn advance(&mut self) -> u64 {
        self.logical += 1;
        self.logical
    }

    /// Current logical id (0 before the first observation)
    pub fn current(&self) -> u64 {
        self.logical
    }
}
