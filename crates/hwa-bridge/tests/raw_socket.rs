//! End-to-end tests for the WebSocket server over a real loopback socket.
//!
//! The client side is written by hand with the `hwa-core` codec so every
//! byte on the wire is under the test's control.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use hwa_bridge::domain::BridgeConfig;
use hwa_bridge::infrastructure::WebSocketServer;
use hwa_core::{encode_frame, header_end, FrameAccumulator, Opcode};

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw client: a socket plus whatever bytes arrived but were not consumed yet.
struct RawClient {
    stream: TcpStream,
    frames: FrameAccumulator,
}

impl RawClient {
    /// Connects, performs the handshake, and returns the client plus the
    /// server's 101 response head.
    async fn connect(addr: SocketAddr) -> (Self, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(upgrade_request(Some(SAMPLE_KEY)).as_bytes())
            .await
            .unwrap();

        let mut bytes = Vec::new();
        let mut buf = [0u8; 1024];
        let end = loop {
            if let Some(end) = header_end(&bytes) {
                break end;
            }
            let n = timeout(IO_TIMEOUT, stream.read(&mut buf))
                .await
                .expect("timed out waiting for handshake response")
                .unwrap();
            assert!(n > 0, "server closed during handshake");
            bytes.extend_from_slice(&buf[..n]);
        };

        let mut frames = FrameAccumulator::new(usize::MAX);
        frames.push(&bytes[end..]);
        let head = String::from_utf8(bytes[..end].to_vec()).unwrap();
        (Self { stream, frames }, head)
    }

    async fn send_text(&mut self, text: &str) {
        let frame = encode_frame(Opcode::Text, text.as_bytes(), Some(MASK));
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn recv_text(&mut self) -> String {
        let mut buf = vec![0u8; 8192];
        loop {
            if let Some(frame) = self.frames.next_frame().unwrap() {
                assert!(!frame.masked, "server frames must not be masked");
                assert!(frame.is_text());
                return frame.text().unwrap().to_string();
            }
            let n = timeout(IO_TIMEOUT, self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "server closed before sending a frame");
            self.frames.push(&buf[..n]);
        }
    }
}

fn upgrade_request(key: Option<&str>) -> String {
    let key_line = key
        .map(|k| format!("Sec-WebSocket-Key: {k}\r\n"))
        .unwrap_or_default();
    format!(
        "GET / HTTP/1.1\r\n\
         Host: 127.0.0.1\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         {key_line}\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}

async fn start_server(
    handler: impl Fn(&str) -> String + Send + Sync + 'static,
) -> (Arc<WebSocketServer>, SocketAddr) {
    let server = Arc::new(WebSocketServer::new(BridgeConfig::default()));
    server.set_message_handler(handler);
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(Arc::clone(&server).serve(listener, Arc::new(AtomicBool::new(true))));
    (server, addr)
}

async fn wait_for_clients(server: &WebSocketServer, expected: usize) {
    for _ in 0..200 {
        if server.registry().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} registered clients, found {}",
        server.registry().len()
    );
}

#[tokio::test]
async fn test_handshake_returns_rfc_accept_key() {
    let (_server, addr) = start_server(|t| t.to_string()).await;

    let (_client, head) = RawClient::connect(addr).await;

    assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(head.contains("Upgrade: websocket\r\n"));
    assert!(head.contains("Connection: Upgrade\r\n"));
    assert!(head.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n")));
}

#[tokio::test]
async fn test_masked_text_frame_is_echoed() {
    let (_server, addr) = start_server(|t| t.to_string()).await;
    let (mut client, _) = RawClient::connect(addr).await;

    client.send_text("ping").await;

    assert_eq!(client.recv_text().await, "ping");
}

#[tokio::test]
async fn test_frame_split_across_writes_is_reassembled() {
    let (_server, addr) = start_server(|t| format!("got {t}")).await;
    let (mut client, _) = RawClient::connect(addr).await;

    let frame = encode_frame(Opcode::Text, b"fragmented on the wire", Some(MASK));
    let (first, second) = frame.split_at(5);
    client.stream.write_all(first).await.unwrap();
    client.stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.stream.write_all(second).await.unwrap();

    assert_eq!(client.recv_text().await, "got fragmented on the wire");
}

#[tokio::test]
async fn test_large_reply_uses_extended_length() {
    let (_server, addr) = start_server(|_| "x".repeat(70_000)).await;
    let (mut client, _) = RawClient::connect(addr).await;

    client.send_text("big").await;

    let reply = client.recv_text().await;
    assert_eq!(reply.len(), 70_000);
}

#[tokio::test]
async fn test_medium_request_uses_16_bit_length() {
    let (_server, addr) = start_server(|t| t.len().to_string()).await;
    let (mut client, _) = RawClient::connect(addr).await;

    client.send_text(&"y".repeat(300)).await;

    assert_eq!(client.recv_text().await, "300");
}

#[tokio::test]
async fn test_replies_go_only_to_sender() {
    let (server, addr) = start_server(|t| t.to_string()).await;
    let (mut alice, _) = RawClient::connect(addr).await;
    let (mut bob, _) = RawClient::connect(addr).await;
    wait_for_clients(&server, 2).await;

    alice.send_text("for alice").await;
    assert_eq!(alice.recv_text().await, "for alice");

    // Bob's next frame is a broadcast, not Alice's reply.
    server.broadcast("to everyone");
    assert_eq!(bob.recv_text().await, "to everyone");
    assert_eq!(alice.recv_text().await, "to everyone");
}

#[tokio::test]
async fn test_missing_key_closes_without_101() {
    let (server, addr) = start_server(|t| t.to_string()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(upgrade_request(None).as_bytes())
        .await
        .unwrap();

    let mut received = Vec::new();
    timeout(IO_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("server did not close the connection")
        .unwrap();

    assert!(received.is_empty(), "no response expected, got {received:?}");
    assert!(server.registry().is_empty());
}

#[tokio::test]
async fn test_immediate_disconnect_is_harmless() {
    let (server, addr) = start_server(|t| t.to_string()).await;

    drop(TcpStream::connect(addr).await.unwrap());
    let (mut client, _) = RawClient::connect(addr).await;
    client.send_text("still alive").await;

    assert_eq!(client.recv_text().await, "still alive");
    wait_for_clients(&server, 1).await;
}
