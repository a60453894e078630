//! JSON message types for the UI-facing command protocol.
//!
//! # Message flow
//!
//! ```text
//! UI → Bridge:  JSON text frame  →  Command         (tagged by "cmd")
//! Bridge → UI:  ServerEvent      →  JSON text frame (tagged by "type")
//! ```
//!
//! Replies to a command go back on the connection that sent it.  `rx` and
//! device `error` events raised by the serial worker are broadcast to every
//! connected client.
//!
//! ```json
//! {"cmd":"open","port":"/dev/ttyUSB0","baud":115200}
//! {"type":"rx","data":"OK\r\n"}
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::serial::PortDescriptor;

/// Commands a client can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum Command {
    /// Enumerate candidate serial ports.
    List,

    /// Open `port`, replacing any open session, and start streaming.
    ///
    /// `baud` falls back to the configured default when omitted.
    Open { port: String, baud: Option<u32> },

    /// Write `data` verbatim to the open port.
    Write { data: String },

    /// Stop streaming and release the port.
    Close,
}

/// Messages the bridge sends to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Reply to `list`.
    Ports { data: Vec<PortEntry> },

    /// Successful command outcome.
    Status { message: String },

    /// Failed command, unknown command, or device error.
    Error { message: String },

    /// Bytes received from the serial device.
    Rx { data: String },
}

/// Wire shape of one [`PortDescriptor`] inside a `ports` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    pub name: String,
    #[serde(rename = "desc")]
    pub description: String,
    pub manufacturer: String,
}

impl From<&PortDescriptor> for PortEntry {
    fn from(port: &PortDescriptor) -> Self {
        Self {
            name: port.name.clone(),
            description: port.description.clone(),
            manufacturer: port.manufacturer.clone(),
        }
    }
}

impl ServerEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ServerEvent::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Wraps raw serial bytes.  Invalid UTF-8 sequences become U+FFFD.
    pub fn rx(bytes: &[u8]) -> Self {
        ServerEvent::Rx {
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn ports(ports: &[PortDescriptor]) -> Self {
        ServerEvent::Ports {
            data: ports.iter().map(PortEntry::from).collect(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
