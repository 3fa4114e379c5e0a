//! Mock transport for hardware-free tests

use super::Transport;
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Computes the device's reply to one write, or `None` for silence
type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Mock transport with an optional scripted device behind it
///
/// Clones share state, so a test can keep one clone for inspection while the
/// scanner owns another.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    responder: Option<Responder>,
    /// Number of `discard_input` calls that actually dropped bytes
    discards: usize,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                responder: None,
                discards: 0,
            })),
        }
    }

    /// Create a mock whose every write is answered by `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        let mock = Self::new();
        mock.inner.lock().responder = Some(Box::new(responder));
        mock
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Written data split into LF-terminated commands
    pub fn written_commands(&self) -> Vec<String> {
        let written = self.get_written();
        written
            .split(|&b| b == b'\n')
            .filter(|c| !c.is_empty())
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Bytes still waiting to be read
    pub fn pending_read(&self) -> usize {
        self.inner.lock().read_buffer.len()
    }

    /// How many times pending input was thrown away
    pub fn discard_count(&self) -> usize {
        self.inner.lock().discards
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let available = inner.read_buffer.len().min(buffer.len());

        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }

        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.write_buffer.extend_from_slice(data);
        let reply = inner.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            inner.read_buffer.extend(reply);
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.read_buffer.is_empty() {
            inner.discards += 1;
        }
        inner.read_buffer.clear();
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_responder_answers_each_write() {
        let mut mock = MockTransport::with_responder(|cmd| {
            if cmd == b"MZ\n" {
                Some(b"MZ00P\n".to_vec())
            } else {
                None
            }
        });

        mock.write_all(b"MZ\n").unwrap();
        mock.write_all(b"RR\n").unwrap();

        let mut buf = [0u8; 16];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"MZ00P\n");
        assert_eq!(mock.written_commands(), vec!["MZ", "RR"]);
    }

    #[test]
    fn test_discard_input_drops_pending_bytes() {
        let mut mock = MockTransport::new();
        mock.inject_read(&[1, 2, 3]);
        mock.discard_input().unwrap();
        assert_eq!(mock.available().unwrap(), 0);
        assert_eq!(mock.discard_count(), 1);
    }
}
