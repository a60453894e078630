//! hwa-bridge library crate.
//!
//! Exposes one serial port to any number of WebSocket clients.  Clients send
//! JSON commands (`list`, `open`, `write`, `close`); bytes read from the port
//! are pushed to every client as `rx` events.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! UI (JSON over WebSocket)
//!         ↕
//! [hwa-bridge]
//!   ├── domain/           Config, port descriptors, JSON message enums
//!   ├── application/      Command router over the SerialControl trait
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop + connection state machine (hwa-core codec)
//!         ├── registry/   Live clients and broadcast
//!         ├── serial/     Serial worker, serialport backend, mock backend
//!         └── wiring/     Composition root
//!         ↕
//! Serial device (8-N-1, no flow control)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` only.
//! - `infrastructure` depends on all other layers plus `tokio`, `serialport`,
//!   and `hwa-core`.

/// Domain layer: configuration and message types (no I/O).
pub mod domain;

/// Application layer: command routing.
pub mod application;

/// Infrastructure layer: WebSocket server, client registry, serial worker.
pub mod infrastructure;
