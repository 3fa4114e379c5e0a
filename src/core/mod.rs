//! Core abstractions shared by the scanner engines.
//!
//! - [`scanner::Scanner`]: trait every engine implements
//! - [`types`]: points, scans, status events, scanner state
//! - [`transform`]: polar to world-frame conversion
//! - [`scan_counter`]: logical scan ids from wrapping device counters
//! - [`session`]: cancellation and worker threads of one start/stop cycle

pub mod scan_counter;
pub mod scanner;
pub mod session;
pub mod transform;
pub mod types;
