//! Infrastructure layer for hwa-bridge.
//!
//! Everything that touches a socket, a device, or a thread lives here.
//!
//! # Responsibilities
//!
//! - Binding the WebSocket listener and running one task per connection
//! - Tracking live clients and fanning broadcasts out to their queues
//! - Owning the serial device and its background read loop
//! - Wiring serial callbacks and the command router into the server
//!
//! # What does NOT belong here?
//!
//! - Command semantics (that is the application layer)
//! - Message and configuration types (that is the domain layer)
//! - Frame and handshake encoding (that is `hwa-core`)

pub mod registry;
pub mod serial;
pub mod wiring;
pub mod ws_server;

pub use registry::ClientRegistry;
pub use serial::{system::SystemSerialBackend, SerialBackend, SerialDevice, SerialWorker};
pub use wiring::{wire_bridge, Bridge};
pub use ws_server::{MessageHandler, WebSocketServer};
