//! Fake serial backend for tests.
//!
//! [`MockSerialBackend`] hands out in-memory devices.  Tests feed inbound
//! bytes with [`push_inbound`](MockSerialBackend::push_inbound), inspect what
//! was written, inject failures, and check that no two devices were ever open
//! at the same time.  Clones share state, so a test can keep one handle while
//! the worker owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use super::{SerialBackend, SerialDevice};
use crate::domain::serial::{PortDescriptor, SerialError, SerialSettings};

#[derive(Default)]
struct MockState {
    ports: Mutex<Vec<PortDescriptor>>,
    open_now: AtomicUsize,
    open_calls: AtomicUsize,
    overlap: AtomicBool,
    fail_open: AtomicBool,
    read_error: AtomicBool,
    write_limit: Mutex<Option<usize>>,
    inbound: Mutex<VecDeque<u8>>,
    written: Mutex<Vec<u8>>,
    last_settings: Mutex<Option<SerialSettings>>,
}

/// In-memory [`SerialBackend`].
#[derive(Clone, Default)]
pub struct MockSerialBackend {
    state: Arc<MockState>,
}

impl MockSerialBackend {
    /// Creates a backend advertising two USB-style ports.
    pub fn new() -> Self {
        Self::with_ports(vec![
            PortDescriptor::new("/dev/ttyMOCK0", "Mock UART", "Acme"),
            PortDescriptor::new("/dev/ttyMOCK1", "Serial Port", ""),
        ])
    }

    pub fn with_ports(ports: Vec<PortDescriptor>) -> Self {
        let backend = Self::default();
        *backend.state.ports.lock() = ports;
        backend
    }

    /// Queues bytes for the open device to return from `read`.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.inbound.lock().extend(bytes.iter().copied());
    }

    /// Everything written to any device so far.
    pub fn written(&self) -> Vec<u8> {
        self.state.written.lock().clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail with an I/O error.
    pub fn set_read_error(&self, fail: bool) {
        self.state.read_error.store(fail, Ordering::SeqCst);
    }

    /// Caps how many bytes a single write accepts.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        *self.state.write_limit.lock() = limit;
    }

    /// Number of devices open right now.
    pub fn currently_open(&self) -> usize {
        self.state.open_now.load(Ordering::SeqCst)
    }

    /// Total `open` attempts, failed ones included.
    pub fn open_calls(&self) -> usize {
        self.state.open_calls.load(Ordering::SeqCst)
    }

    /// `true` if a device was ever opened while another was still open.
    pub fn overlap_detected(&self) -> bool {
        self.state.overlap.load(Ordering::SeqCst)
    }

    /// Settings passed to the most recent successful `open`.
    pub fn last_settings(&self) -> Option<SerialSettings> {
        *self.state.last_settings.lock()
    }
}

impl SerialBackend for MockSerialBackend {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        self.state.ports.lock().clone()
    }

    fn open(
        &self,
        name: &str,
        settings: &SerialSettings,
    ) -> Result<Box<dyn SerialDevice>, SerialError> {
        self.state.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(SerialError::OpenFailed {
                port: name.to_string(),
                reason: "mock device unavailable".to_string(),
            });
        }

        if self.state.open_now.fetch_add(1, Ordering::SeqCst) > 0 {
            self.state.overlap.store(true, Ordering::SeqCst);
        }
        *self.state.last_settings.lock() = Some(*settings);

        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
            read_timeout: settings.read_timeout,
        }))
    }
}

struct MockDevice {
    state: Arc<MockState>,
    read_timeout: std::time::Duration,
}

impl SerialDevice for MockDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.state.read_error.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }

        let n = {
            let mut inbound = self.state.inbound.lock();
            let n = buf.len().min(inbound.len());
            for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
                *slot = byte;
            }
            n
        };

        if n == 0 {
            thread::sleep(self.read_timeout);
            return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"));
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let accepted = match *self.state.write_limit.lock() {
            Some(limit) => data.len().min(limit),
            None => data.len(),
        };
        self.state.written.lock().extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}
