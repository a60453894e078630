//! Serial port descriptors, line settings, and device errors.

use std::time::Duration;

use thiserror::Error;

/// One candidate serial device reported by enumeration.
///
/// Enumeration only promises plausible identifiers; the device may still be
/// busy or gone by the time it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Identifier passed back to `open` (`/dev/ttyUSB0`, `COM3`, ...).
    pub name: String,
    pub description: String,
    pub manufacturer: String,
}

impl PortDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        manufacturer: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            manufacturer: manufacturer.into(),
        }
    }
}

/// Line settings applied when a device is opened.
///
/// Framing is fixed at 8 data bits, no parity, 1 stop bit, no flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    pub baud_rate: u32,
    /// Bound on a single blocking read.
    pub read_timeout: Duration,
}

/// Failures of the serial device collaborator.
///
/// The `Display` text is what the error callback broadcasts to clients.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerialError {
    #[error("Failed to open port: {port} ({reason})")]
    OpenFailed { port: String, reason: String },

    #[error("serial port is not open")]
    NotOpen,

    #[error("short write to serial port: {written} of {expected} bytes accepted")]
    ShortWrite { written: usize, expected: usize },

    #[error("serial write failed: {0}")]
    WriteFailed(String),

    #[error("serial read failed: {0}")]
    ReadFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failed_message_names_the_port() {
        let err = SerialError::OpenFailed {
            port: "/dev/ttyUSB9".to_string(),
            reason: "No such file or directory".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to open port: /dev/ttyUSB9 (No such file or directory)"
        );
    }

    #[test]
    fn test_short_write_message_reports_counts() {
        let err = SerialError::ShortWrite { written: 3, expected: 8 };
        assert!(err.to_string().contains("3 of 8"));
    }
}
