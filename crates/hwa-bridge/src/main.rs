//! HW Analyzer serial bridge: entry point.
//!
//! Serves a WebSocket endpoint through which a UI can list serial ports, open
//! one, write to it, and receive everything the device sends.
//!
//! # Usage
//!
//! ```text
//! hwa-bridge [OPTIONS]
//!
//! Options:
//!   --port             <PORT>  WebSocket listen port [default: 9001]
//!   --bind             <IP>    WebSocket bind address [default: 0.0.0.0]
//!   --baud             <BAUD>  Baud rate for `open` without one [default: 115200]
//!   --read-chunk       <N>     Max bytes per serial read [default: 256]
//!   --read-timeout-ms  <MS>    Serial read timeout [default: 50]
//!   --poll-interval-ms <MS>    Read-loop sleep [default: 10]
//!   --queue-capacity   <N>     Per-client outbound queue [default: 64]
//!   --max-frame-size   <BYTES> Largest inbound frame payload [default: 1048576]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable               | Default   |
//! |------------------------|-----------|
//! | `HWA_WS_PORT`          | `9001`    |
//! | `HWA_WS_BIND`          | `0.0.0.0` |
//! | `HWA_DEFAULT_BAUD`     | `115200`  |
//! | `HWA_READ_CHUNK`       | `256`     |
//! | `HWA_READ_TIMEOUT_MS`  | `50`      |
//! | `HWA_POLL_INTERVAL_MS` | `10`      |
//! | `HWA_QUEUE_CAPACITY`   | `64`      |
//! | `HWA_MAX_FRAME_SIZE`   | `1048576` |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hwa_bridge::domain::{BridgeConfig, SerialConfig};
use hwa_bridge::infrastructure::{wire_bridge, SystemSerialBackend};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Serial-port-to-WebSocket bridge for the HW Analyzer UI.
#[derive(Debug, Parser)]
#[command(
    name = "hwa-bridge",
    about = "Serial-port-to-WebSocket bridge for the HW Analyzer UI",
    version
)]
struct Cli {
    /// TCP port for the WebSocket server (ws://host:PORT).
    #[arg(long, default_value_t = 9001, env = "HWA_WS_PORT")]
    port: u16,

    /// IP address to bind the WebSocket server to.
    ///
    /// `0.0.0.0` accepts LAN clients; `127.0.0.1` only local ones.
    #[arg(long, default_value = "0.0.0.0", env = "HWA_WS_BIND")]
    bind: String,

    /// Baud rate used when an `open` command does not name one.
    #[arg(long, default_value_t = 115_200, env = "HWA_DEFAULT_BAUD")]
    baud: u32,

    /// Maximum bytes returned by one serial read.
    #[arg(long, default_value_t = 256, env = "HWA_READ_CHUNK")]
    read_chunk: usize,

    /// How long one serial read may block, in milliseconds.
    #[arg(long, default_value_t = 50, env = "HWA_READ_TIMEOUT_MS")]
    read_timeout_ms: u64,

    /// Sleep between read-loop iterations, in milliseconds.
    #[arg(long, default_value_t = 10, env = "HWA_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Frames queued per client before broadcasts to it are dropped.
    #[arg(long, default_value_t = 64, env = "HWA_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Largest inbound frame payload accepted, in bytes.
    #[arg(long, default_value_t = 1 << 20, env = "HWA_MAX_FRAME_SIZE")]
    max_frame_size: usize,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`BridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address or a size
    /// option is zero.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid WebSocket bind address: '{}'", self.bind))?;

        anyhow::ensure!(self.read_chunk > 0, "--read-chunk must be at least 1");
        anyhow::ensure!(self.queue_capacity > 0, "--queue-capacity must be at least 1");

        Ok(BridgeConfig {
            ws_bind_addr: SocketAddr::new(ip, self.port),
            outbound_queue_capacity: self.queue_capacity,
            max_frame_size: self.max_frame_size,
            serial: SerialConfig {
                default_baud: self.baud,
                read_chunk_size: self.read_chunk,
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                poll_interval: Duration::from_millis(self.poll_interval_ms),
            },
        })
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;

    info!(
        "HW Analyzer bridge starting: ws={}, default baud={}",
        config.ws_bind_addr, config.serial.default_baud
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    // The accept loop polls `running` every 200 ms.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let bridge = wire_bridge(config, Arc::new(SystemSerialBackend));
    Arc::clone(&bridge.server).run(running).await?;

    bridge.serial.close();
    info!("HW Analyzer bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
