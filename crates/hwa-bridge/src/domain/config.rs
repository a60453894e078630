//! Bridge configuration types.
//!
//! [`BridgeConfig`] holds every runtime setting.  `main.rs` fills it from CLI
//! arguments and environment variables; tests build it from [`Default`] and
//! override single fields.  Nothing in the library reads the environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default WebSocket listen port.
pub const DEFAULT_WS_PORT: u16 = 9001;

/// Default baud rate used when an `open` command omits one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// All runtime configuration for the bridge.
///
/// # Example
///
/// ```rust
/// use hwa_bridge::domain::BridgeConfig;
///
/// let cfg = BridgeConfig::default();
/// assert_eq!(cfg.ws_bind_addr.port(), 9001);
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the WebSocket listener binds to.
    pub ws_bind_addr: SocketAddr,

    /// Maximum number of frames queued for one client before further
    /// broadcasts to that client are dropped.
    ///
    /// Broadcasting only enqueues, so a stalled client fills its own queue
    /// instead of blocking delivery to everyone else.
    pub outbound_queue_capacity: usize,

    /// Largest inbound frame payload accepted from a client, in bytes.
    pub max_frame_size: usize,

    /// Serial worker settings.
    pub serial: SerialConfig,
}

/// Settings for the serial worker and its background read loop.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Baud rate applied when a client opens a port without naming one.
    pub default_baud: u32,

    /// Upper bound on bytes returned by a single device read.
    pub read_chunk_size: usize,

    /// How long one device read may block before returning empty.
    pub read_timeout: Duration,

    /// Sleep between read-loop iterations.
    ///
    /// Bounds CPU use and is also the worst-case latency of `stop_read_loop`
    /// on top of one `read_timeout`.
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    /// | Field                   | Default         |
    /// |-------------------------|-----------------|
    /// | ws_bind_addr            | `0.0.0.0:9001`  |
    /// | outbound_queue_capacity | 64 frames       |
    /// | max_frame_size          | 1 MiB           |
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_WS_PORT)),
            outbound_queue_capacity: 64,
            max_frame_size: 1 << 20,
            serial: SerialConfig::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            default_baud: DEFAULT_BAUD_RATE,
            read_chunk_size: 256,
            read_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
