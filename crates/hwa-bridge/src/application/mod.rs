//! Application layer for hwa-bridge.
//!
//! Decides *what* each client command does to the serial session and what
//! the client is told back.  Device access happens behind the
//! [`SerialControl`] trait, so this layer is tested without hardware or
//! sockets.

pub mod bridge_service;

pub use bridge_service::{encode_event, BridgeError, BridgeService, SerialControl};
