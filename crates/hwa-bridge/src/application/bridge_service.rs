//! Command routing between WebSocket clients and the serial session.
//!
//! [`BridgeService::handle_message`] is the server's message handler: it
//! parses one JSON command, performs it against the serial session, and
//! returns the JSON reply for the sending client.
//!
//! ```text
//! {"cmd":"list"}                         → {"type":"ports","data":[...]}
//! {"cmd":"open","port":"...","baud":N}   → open + start read loop → status | error
//! {"cmd":"write","data":"..."}           → write bytes            → status | error
//! {"cmd":"close"}                        → stop loop + close      → status
//! anything else                          → {"type":"error","message":"Unknown command"}
//! ```

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::messages::{Command, ServerEvent};
use crate::domain::serial::{PortDescriptor, SerialError};

pub const MSG_OPENED: &str = "Port opened successfully";
pub const MSG_OPEN_FAILED: &str = "Failed to open port";
pub const MSG_SENT: &str = "Data sent";
pub const MSG_SEND_FAILED: &str = "Failed to send data";
pub const MSG_CLOSED: &str = "Port closed";
pub const MSG_UNKNOWN: &str = "Unknown command";

/// Used only if serde_json ever fails to encode a reply.
const ENCODE_FALLBACK: &str = r#"{"type":"error","message":"internal encoding error"}"#;

/// Errors raised while interpreting client input.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The text was not a JSON object with a known `"cmd"`.
    #[error("malformed command: {0}")]
    MalformedCommand(#[from] serde_json::Error),
}

/// Serial operations the command router needs.
///
/// Implemented by the infrastructure `SerialWorker`.
#[cfg_attr(test, mockall::automock)]
pub trait SerialControl: Send + Sync {
    fn list_ports(&self) -> Vec<PortDescriptor>;
    fn open(&self, port: &str, baud_rate: u32) -> Result<(), SerialError>;
    fn write(&self, data: &[u8]) -> Result<(), SerialError>;
    fn close(&self);
    fn start_read_loop(&self);
    fn stop_read_loop(&self);
}

/// Parses one inbound text message.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedCommand`] for invalid JSON, a missing or
/// unknown `"cmd"`, or missing fields.
pub fn parse_command(text: &str) -> Result<Command, BridgeError> {
    Ok(serde_json::from_str(text)?)
}

/// Serializes an event for the wire.
pub fn encode_event(event: &ServerEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        error!("failed to encode server event: {e}");
        ENCODE_FALLBACK.to_string()
    })
}

/// Routes client commands to the serial session.
pub struct BridgeService {
    serial: Arc<dyn SerialControl>,
    default_baud: u32,
}

impl BridgeService {
    pub fn new(serial: Arc<dyn SerialControl>, default_baud: u32) -> Self {
        Self {
            serial,
            default_baud,
        }
    }

    /// Handles one text message and returns the JSON reply.
    pub fn handle_message(&self, text: &str) -> String {
        encode_event(&self.handle_text(text))
    }

    /// Handles one text message and returns the reply event.
    pub fn handle_text(&self, text: &str) -> ServerEvent {
        match parse_command(text) {
            Ok(command) => self.execute(command),
            Err(e) => {
                debug!("{e}");
                ServerEvent::error(MSG_UNKNOWN)
            }
        }
    }

    /// Performs `command` against the serial session.
    pub fn execute(&self, command: Command) -> ServerEvent {
        match command {
            Command::List => ServerEvent::ports(&self.serial.list_ports()),

            Command::Open { port, baud } => {
                let baud = baud.unwrap_or(self.default_baud);
                match self.serial.open(&port, baud) {
                    Ok(()) => {
                        self.serial.start_read_loop();
                        info!("client opened {port} at {baud} baud");
                        ServerEvent::status(MSG_OPENED)
                    }
                    // The worker already broadcast the detailed reason.
                    Err(_) => ServerEvent::error(MSG_OPEN_FAILED),
                }
            }

            Command::Write { data } => match self.serial.write(data.as_bytes()) {
                Ok(()) => ServerEvent::status(MSG_SENT),
                Err(e) => {
                    warn!("write command failed: {e}");
                    ServerEvent::error(MSG_SEND_FAILED)
                }
            },

            Command::Close => {
                self.serial.stop_read_loop();
                self.serial.close();
                ServerEvent::status(MSG_CLOSED)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
