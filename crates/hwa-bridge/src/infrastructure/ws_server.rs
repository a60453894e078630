//! WebSocket server: accept loop and per-connection handling.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting connections and spawning one Tokio task per client.
//! 3. Running each client through the connection state machine:
//!
//! ```text
//! Connecting ──read request──► Handshaking ──101 sent, registered──► Open
//!     │ empty read                  │ no key / write failed            │ EOF, read error
//!     ▼                             ▼                                  ▼
//!   Closed ◄────────────────────────┴──────────── Closed ◄─────── Closing (unregister)
//! ```
//!
//! 4. In `Open`, buffering socket bytes in a [`FrameAccumulator`] and handing
//!    each complete text frame to the message handler.  The handler's reply
//!    goes back on the same connection only.
//! 5. Stopping the accept loop when the shared `running` flag is cleared.
//!
//! Outbound traffic for a client, direct replies and broadcasts alike, goes
//! through that client's bounded queue and is written by a dedicated writer
//! task.  Control frames (ping, pong, close), binary frames, and fragmented
//! messages are decoded and dropped; the server never answers them.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hwa_core::{
    build_handshake_response, encode_text_frame, handle_handshake, header_end, Frame,
    FrameAccumulator, FrameError,
};

use crate::domain::config::BridgeConfig;
use crate::infrastructure::registry::{ClientRegistry, OutboundSender};

/// Size of each socket read.
const READ_BUFFER_SIZE: usize = 4096;

/// How often the accept loop re-checks the `running` flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a closing connection waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Turns one inbound text message into the reply for its sender.
///
/// Called on Tokio's blocking pool, so it may perform blocking serial I/O.
pub type MessageHandler = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Lifecycle of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Open,
    Closing,
    Closed,
}

struct Connection {
    id: Uuid,
    peer: SocketAddr,
    state: ConnectionState,
}

impl Connection {
    fn new(peer: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            state: ConnectionState::Connecting,
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!("connection {} ({}): {:?} → {:?}", self.id, self.peer, self.state, next);
        self.state = next;
    }
}

/// The listener plus everything its connection handlers share.
pub struct WebSocketServer {
    config: BridgeConfig,
    registry: Arc<ClientRegistry>,
    handler: RwLock<Option<MessageHandler>>,
}

impl WebSocketServer {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: Arc::new(ClientRegistry::new()),
            handler: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Installs the handler for inbound text messages.
    ///
    /// Until one is set, text frames are dropped.
    pub fn set_message_handler(&self, handler: impl Fn(&str) -> String + Send + Sync + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Sends `message` to every connected client.  See
    /// [`ClientRegistry::broadcast`].
    pub fn broadcast(&self, message: &str) -> usize {
        self.registry.broadcast(message)
    }

    /// Binds `config.ws_bind_addr` and serves until `running` is cleared.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound (port in use, no
    /// permission).
    pub async fn run(self: Arc<Self>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
        let addr = self.config.ws_bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind WebSocket listener on {addr}"))?;
        self.serve(listener, running).await
    }

    /// Runs the accept loop on an already-bound listener.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        running: Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let local = listener
            .local_addr()
            .context("listener has no local address")?;
        info!("WebSocket server listening on {local}");

        loop {
            if !running.load(Ordering::Relaxed) {
                info!("shutdown flag set; stopping accept loop");
                break;
            }

            // Bounded so the flag is re-checked even with no clients arriving.
            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    info!("new connection from {peer}");
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!("{peer}: failed to set TCP_NODELAY: {e}");
                    }
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                Ok(Err(e)) => error!("accept error: {e}"),
                Err(_) => {}
            }
        }

        Ok(())
    }

    /// Runs one connection and logs how it ended.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        match self.run_connection(stream, peer).await {
            Ok(()) => info!("connection {peer} closed"),
            Err(e) => warn!("connection {peer} closed with error: {e:#}"),
        }
    }

    async fn run_connection(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<()> {
        let mut conn = Connection::new(peer);
        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        // ── Connecting → Handshaking ──────────────────────────────────────────
        let n = reader
            .read(&mut buf)
            .await
            .context("failed to read handshake request")?;
        if n == 0 {
            conn.transition(ConnectionState::Closed);
            return Ok(());
        }
        conn.transition(ConnectionState::Handshaking);

        // ── Handshaking → Open ────────────────────────────────────────────────
        let request = &buf[..n];
        let accept_key = match handle_handshake(&String::from_utf8_lossy(request)) {
            Ok(key) => key,
            Err(e) => {
                conn.transition(ConnectionState::Closed);
                return Err(e).context("handshake rejected");
            }
        };
        let response = build_handshake_response(&accept_key);
        if let Err(e) = writer.write_all(response.as_bytes()).await {
            conn.transition(ConnectionState::Closed);
            return Err(e).context("failed to send handshake response");
        }

        let mut frames = FrameAccumulator::new(self.config.max_frame_size);
        if let Some(end) = header_end(request) {
            frames.push(&request[end..]);
        }

        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity.max(1));
        let writer_task = tokio::spawn(write_outbound(writer, rx, conn.id));
        let registration = match self.register(conn.id, tx.clone()) {
            Ok(registration) => registration,
            Err(e) => {
                conn.transition(ConnectionState::Closed);
                drop(tx);
                let _ = timeout(WRITER_DRAIN_TIMEOUT, writer_task).await;
                return Err(e);
            }
        };
        conn.transition(ConnectionState::Open);

        // ── Open ──────────────────────────────────────────────────────────────
        let result = self.read_frames(&conn, reader, buf, frames, &tx).await;

        // ── Closing → Closed ──────────────────────────────────────────────────
        conn.transition(ConnectionState::Closing);
        drop(registration);
        drop(tx);
        if timeout(WRITER_DRAIN_TIMEOUT, writer_task).await.is_err() {
            debug!("connection {}: writer did not drain in time", conn.id);
        }
        conn.transition(ConnectionState::Closed);

        result
    }

    /// Adds the client to the registry.  The entry is removed when the
    /// returned guard drops, including when the connection task unwinds.
    fn register(&self, id: Uuid, tx: OutboundSender) -> anyhow::Result<Registration> {
        if !self.registry.add(id, tx) {
            error!("connection {id}: could not be registered, closing");
            anyhow::bail!("client id {id} is already registered");
        }
        Ok(Registration {
            registry: Arc::clone(&self.registry),
            id,
        })
    }

    async fn read_frames(
        &self,
        conn: &Connection,
        mut reader: OwnedReadHalf,
        mut buf: Vec<u8>,
        mut frames: FrameAccumulator,
        reply_tx: &OutboundSender,
    ) -> anyhow::Result<()> {
        loop {
            loop {
                match frames.next_frame() {
                    Ok(Some(frame)) => self.dispatch(conn, frame, reply_tx).await,
                    Ok(None) => break,
                    Err(e @ FrameError::PayloadTooLarge { .. }) => {
                        warn!("connection {}: dropping frame: {e}", conn.id);
                    }
                    Err(e) => {
                        return Err(e).context("undecodable frame stream");
                    }
                }
            }

            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("connection {}: peer closed the socket", conn.id);
                    return Ok(());
                }
                Ok(n) => frames.push(&buf[..n]),
                Err(e) => return Err(e).context("socket read failed"),
            }
        }
    }

    async fn dispatch(&self, conn: &Connection, frame: Frame, reply_tx: &OutboundSender) {
        if !frame.is_text() {
            debug!(
                "connection {}: ignoring {:?} frame (fin={}, {} bytes)",
                conn.id, frame.opcode, frame.fin, frame.payload_length
            );
            return;
        }

        let text = match frame.text() {
            Ok(text) => text.to_owned(),
            Err(e) => {
                warn!("connection {}: dropping text frame: {e}", conn.id);
                return;
            }
        };

        let handler = self.handler.read().clone();
        let Some(handler) = handler else {
            debug!("connection {}: no message handler, dropping text frame", conn.id);
            return;
        };

        let reply = match tokio::task::spawn_blocking(move || handler(&text)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("connection {}: message handler failed: {e}", conn.id);
                return;
            }
        };

        if reply_tx.send(encode_text_frame(&reply)).await.is_err() {
            debug!("connection {}: writer gone, reply dropped", conn.id);
        }
    }
}

/// Registry entry of an open connection.
struct Registration {
    registry: Arc<ClientRegistry>,
    id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Drains one client's outbound queue into its socket.
///
/// Ends when every sender is gone or a write fails, then shuts the socket's
/// write side down.
async fn write_outbound(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Vec<u8>>, id: Uuid) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("connection {id}: write failed: {e}");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
