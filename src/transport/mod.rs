//! Transport layer for byte-pipe I/O abstraction
//!
//! The serial engine talks to its device only through [`Transport`], so the
//! same command and frame logic runs against a real port or a scripted mock.

use crate::error::Result;

mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Transport trait for device communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 on timeout)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Drop everything currently buffered on the input side
    fn discard_input(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }

    /// Write the whole buffer, looping over short writes
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.write(data)?;
            if n == 0 {
                return Err(crate::error::Error::Connection(
                    "transport accepted zero bytes".to_string(),
                ));
            }
            data = &data[n..];
        }
        Ok(())
    }
}
