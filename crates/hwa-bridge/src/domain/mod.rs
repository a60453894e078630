//! Domain layer for hwa-bridge.
//!
//! Pure types with no I/O, no async, and no device access: the JSON command
//! protocol, serial port descriptors and settings, and runtime configuration.

pub mod config;
pub mod messages;
pub mod serial;

pub use config::{BridgeConfig, SerialConfig};
pub use messages::{Command, PortEntry, ServerEvent};
pub use serial::{PortDescriptor, SerialError, SerialSettings};
