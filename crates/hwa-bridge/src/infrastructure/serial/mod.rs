//! Serial worker: exclusive owner of the open device and its read loop.
//!
//! The worker holds at most one open device.  Device access goes through the
//! [`SerialBackend`] / [`SerialDevice`] capability traits so the worker never
//! sees a platform handle: production uses [`system::SystemSerialBackend`]
//! (the `serialport` crate), tests use [`mock::MockSerialBackend`].
//!
//! # Threads
//!
//! Command methods run on whatever thread calls them (a blocking pool thread
//! for WebSocket commands).  [`SerialWorker::start_read_loop`] spawns one
//! dedicated OS thread that polls the device and hands bytes to the data
//! callback.  The device slot is behind a mutex, so the loop and a command
//! never touch the device at the same time, and [`SerialWorker::close`]
//! always joins the loop before it releases the device.
//!
//! Stopping is cooperative: the loop checks its stop flag once per iteration,
//! so `stop_read_loop` waits at most one read timeout plus one poll interval.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::application::SerialControl;
use crate::domain::config::SerialConfig;
use crate::domain::serial::{PortDescriptor, SerialError, SerialSettings};

pub mod mock;
pub mod system;

/// Receives every non-empty chunk read by the background loop.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receives a description of each device failure.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// An open serial device.  Dropping it releases the device.
pub trait SerialDevice: Send {
    /// Reads up to `buf.len()` bytes, blocking at most the configured timeout.
    ///
    /// Timeouts surface as `ErrorKind::TimedOut` or `ErrorKind::WouldBlock`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes `data`, returning how many bytes the device accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// Platform access to serial devices.
pub trait SerialBackend: Send + Sync {
    /// Lists candidate device identifiers.  Liveness is not guaranteed.
    fn list_ports(&self) -> Vec<PortDescriptor>;

    /// Opens `name` exclusively with `settings` (8-N-1, no flow control).
    fn open(&self, name: &str, settings: &SerialSettings)
        -> Result<Box<dyn SerialDevice>, SerialError>;
}

type DeviceSlot = Arc<Mutex<Option<Box<dyn SerialDevice>>>>;

#[derive(Default)]
struct Callbacks {
    on_data: Option<DataCallback>,
    on_error: Option<ErrorCallback>,
}

impl Callbacks {
    fn data(&self, bytes: &[u8]) {
        if let Some(cb) = &self.on_data {
            cb(bytes);
        }
    }

    fn error(&self, message: &str) {
        if let Some(cb) = &self.on_error {
            cb(message);
        }
    }
}

/// What the worker remembers about the current (or next) session.
#[derive(Debug)]
struct SessionInfo {
    port_name: Option<String>,
    baud_rate: u32,
}

/// A running read loop: its private stop flag and thread.
struct ReadLoop {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Owns the serial session and its background read loop.
pub struct SerialWorker {
    backend: Arc<dyn SerialBackend>,
    config: SerialConfig,
    device: DeviceSlot,
    session: Mutex<SessionInfo>,
    callbacks: Arc<RwLock<Callbacks>>,
    read_loop: Mutex<Option<ReadLoop>>,
    /// Held across open/close/reconfigure so two commands cannot interleave
    /// and leave two devices open.
    lifecycle: Mutex<()>,
}

impl SerialWorker {
    /// Creates a closed worker.
    pub fn new(backend: Arc<dyn SerialBackend>, config: SerialConfig) -> Self {
        let baud_rate = config.default_baud;
        Self {
            backend,
            config,
            device: Arc::new(Mutex::new(None)),
            session: Mutex::new(SessionInfo {
                port_name: None,
                baud_rate,
            }),
            callbacks: Arc::new(RwLock::new(Callbacks::default())),
            read_loop: Mutex::new(None),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn set_data_callback(&self, cb: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.callbacks.write().on_data = Some(Arc::new(cb));
    }

    pub fn set_error_callback(&self, cb: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks.write().on_error = Some(Arc::new(cb));
    }

    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        self.backend.list_ports()
    }

    pub fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    /// Whether a background read loop is currently installed.
    pub fn is_reading(&self) -> bool {
        self.read_loop.lock().is_some()
    }

    /// Name of the open port, if any.
    pub fn port_name(&self) -> Option<String> {
        if self.is_open() {
            self.session.lock().port_name.clone()
        } else {
            None
        }
    }

    /// Baud rate of the open session, or the default for the next `open`.
    pub fn baud_rate(&self) -> u32 {
        self.session.lock().baud_rate
    }

    /// Opens `port` at `baud_rate`, closing any open session first.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::OpenFailed`] if the device cannot be acquired or
    /// configured.  The error is also passed to the error callback and the
    /// worker stays closed.
    pub fn open(&self, port: &str, baud_rate: u32) -> Result<(), SerialError> {
        let _guard = self.lifecycle.lock();
        self.open_locked(port, baud_rate)
    }

    /// Stops the read loop, then releases the device.  Idempotent.
    pub fn close(&self) {
        let _guard = self.lifecycle.lock();
        self.close_locked();
    }

    /// Changes the baud rate.
    ///
    /// An open port is closed and reopened at the new rate (the read loop is
    /// restarted if it was running).  A closed worker only records the rate
    /// for the next `open`.
    ///
    /// # Errors
    ///
    /// Returns the reopen failure; the worker is then closed.
    pub fn set_baud_rate(&self, baud_rate: u32) -> Result<(), SerialError> {
        let _guard = self.lifecycle.lock();

        let port = match self.port_name() {
            Some(port) => port,
            None => {
                self.session.lock().baud_rate = baud_rate;
                return Ok(());
            }
        };

        let was_reading = self.is_reading();
        self.open_locked(&port, baud_rate)?;
        if was_reading {
            self.start_read_loop();
        }
        Ok(())
    }

    /// Writes all of `data` to the device.
    ///
    /// # Errors
    ///
    /// [`SerialError::NotOpen`] when closed, [`SerialError::ShortWrite`] when
    /// the device accepted fewer bytes than given (not retried), or
    /// [`SerialError::WriteFailed`] on an I/O error.
    pub fn write(&self, data: &[u8]) -> Result<(), SerialError> {
        let result = {
            let mut slot = self.device.lock();
            match slot.as_mut() {
                None => Err(SerialError::NotOpen),
                Some(device) => match device.write(data) {
                    Ok(n) if n == data.len() => Ok(()),
                    Ok(n) => Err(SerialError::ShortWrite {
                        written: n,
                        expected: data.len(),
                    }),
                    Err(e) => Err(SerialError::WriteFailed(e.to_string())),
                },
            }
        };

        if let Err(e) = &result {
            if *e != SerialError::NotOpen {
                warn!("serial write failed: {e}");
                self.callbacks.read().error(&e.to_string());
            }
        }
        result
    }

    /// Performs one bounded read of at most `max_bytes`.
    ///
    /// Returns an empty vector when closed, on timeout, or on error.  Errors
    /// are reported only through the error callback.
    pub fn read(&self, max_bytes: usize) -> Vec<u8> {
        match read_chunk(&self.device, max_bytes) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{e}");
                self.callbacks.read().error(&e.to_string());
                Vec::new()
            }
        }
    }

    /// Launches the background read loop.
    ///
    /// No-op when a loop is already running or no device is open.
    pub fn start_read_loop(&self) {
        let mut slot = self.read_loop.lock();
        if slot.is_some() || !self.is_open() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext {
            stop: Arc::clone(&stop),
            device: Arc::clone(&self.device),
            callbacks: Arc::clone(&self.callbacks),
            chunk_size: self.config.read_chunk_size,
            poll_interval: self.config.poll_interval,
        };

        match thread::Builder::new()
            .name("serial-read".to_string())
            .spawn(move || ctx.run())
        {
            Ok(thread) => {
                debug!("serial read loop started");
                *slot = Some(ReadLoop { stop, thread });
            }
            Err(e) => {
                warn!("failed to spawn serial read thread: {e}");
                self.callbacks
                    .read()
                    .error(&format!("failed to start read loop: {e}"));
            }
        }
    }

    /// Stops the background read loop and waits for its thread to exit.
    ///
    /// After this returns no further data callback fires.  Safe to call when
    /// no loop is running.
    pub fn stop_read_loop(&self) {
        let Some(read_loop) = self.read_loop.lock().take() else {
            return;
        };
        read_loop.stop.store(true, Ordering::SeqCst);

        // A callback running on the loop thread may end up here; that thread
        // exits on its own once it sees the flag.
        if read_loop.thread.thread().id() == thread::current().id() {
            return;
        }
        if read_loop.thread.join().is_err() {
            warn!("serial read thread panicked");
        }
        debug!("serial read loop stopped");
    }

    fn open_locked(&self, port: &str, baud_rate: u32) -> Result<(), SerialError> {
        self.close_locked();
        self.session.lock().baud_rate = baud_rate;

        let settings = SerialSettings {
            baud_rate,
            read_timeout: self.config.read_timeout,
        };
        match self.backend.open(port, &settings) {
            Ok(device) => {
                *self.device.lock() = Some(device);
                self.session.lock().port_name = Some(port.to_string());
                info!("opened serial port {port} at {baud_rate} baud (8N1)");
                Ok(())
            }
            Err(e) => {
                warn!("{e}");
                self.callbacks.read().error(&e.to_string());
                Err(e)
            }
        }
    }

    fn close_locked(&self) {
        self.stop_read_loop();
        if self.device.lock().take().is_some() {
            let port = self.session.lock().port_name.take();
            info!("closed serial port {}", port.as_deref().unwrap_or("?"));
        }
    }
}

impl Drop for SerialWorker {
    fn drop(&mut self) {
        self.close_locked();
    }
}

impl SerialControl for SerialWorker {
    fn list_ports(&self) -> Vec<PortDescriptor> {
        SerialWorker::list_ports(self)
    }

    fn open(&self, port: &str, baud_rate: u32) -> Result<(), SerialError> {
        SerialWorker::open(self, port, baud_rate)
    }

    fn write(&self, data: &[u8]) -> Result<(), SerialError> {
        SerialWorker::write(self, data)
    }

    fn close(&self) {
        SerialWorker::close(self)
    }

    fn start_read_loop(&self) {
        SerialWorker::start_read_loop(self)
    }

    fn stop_read_loop(&self) {
        SerialWorker::stop_read_loop(self)
    }
}

// ── Read loop ─────────────────────────────────────────────────────────────────

struct LoopContext {
    stop: Arc<AtomicBool>,
    device: DeviceSlot,
    callbacks: Arc<RwLock<Callbacks>>,
    chunk_size: usize,
    poll_interval: std::time::Duration,
}

impl LoopContext {
    fn run(self) {
        // Only the first failure of a streak is reported, so an unplugged
        // device produces one notification rather than one per poll.
        let mut failing = false;

        while !self.stop.load(Ordering::SeqCst) {
            match read_chunk(&self.device, self.chunk_size) {
                Ok(bytes) => {
                    failing = false;
                    if !bytes.is_empty() {
                        self.callbacks.read().data(&bytes);
                    }
                }
                Err(e) => {
                    if !failing {
                        warn!("{e}");
                        self.callbacks.read().error(&e.to_string());
                        failing = true;
                    }
                }
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// One bounded read.  Closed device and timeouts yield `Ok(empty)`.
fn read_chunk(device: &DeviceSlot, max_bytes: usize) -> Result<Vec<u8>, SerialError> {
    let mut slot = device.lock();
    let Some(device) = slot.as_mut() else {
        return Ok(Vec::new());
    };

    let mut buf = vec![0u8; max_bytes];
    match device.read(&mut buf) {
        Ok(n) => {
            buf.truncate(n);
            Ok(buf)
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(Vec::new())
        }
        Err(e) => Err(SerialError::ReadFailed(e.to_string())),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
