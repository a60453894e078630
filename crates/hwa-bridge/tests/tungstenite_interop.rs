//! Interop tests: a standards-compliant client (`tokio-tungstenite`) drives
//! the fully wired bridge backed by the in-memory serial device.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

use hwa_bridge::domain::{BridgeConfig, SerialConfig};
use hwa_bridge::infrastructure::serial::mock::MockSerialBackend;
use hwa_bridge::infrastructure::{wire_bridge, Bridge};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        serial: SerialConfig {
            read_timeout: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            ..SerialConfig::default()
        },
        ..BridgeConfig::default()
    }
}

async fn start_bridge(backend: &MockSerialBackend) -> (Bridge, SocketAddr) {
    let bridge = wire_bridge(fast_config(), Arc::new(backend.clone()));
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        Arc::clone(&bridge.server).serve(listener, Arc::new(AtomicBool::new(true))),
    );
    (bridge, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, response) = connect_async(format!("ws://{addr}/")).await.unwrap();
    assert_eq!(response.status(), 101);
    client
}

async fn send(client: &mut Client, command: Value) {
    client
        .send(Message::Text(command.to_string()))
        .await
        .unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = timeout(IO_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn request(client: &mut Client, command: Value) -> Value {
    send(client, command).await;
    recv(client).await
}

#[tokio::test]
async fn test_list_reports_mock_ports() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    let reply = request(&mut client, json!({"cmd": "list"})).await;

    assert_eq!(reply["type"], "ports");
    assert_eq!(reply["data"][0]["name"], "/dev/ttyMOCK0");
    assert_eq!(reply["data"][0]["desc"], "Mock UART");
    assert_eq!(reply["data"][0]["manufacturer"], "Acme");
    assert_eq!(reply["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_write_receive_close_session() {
    let backend = MockSerialBackend::new();
    let (bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    let reply = request(
        &mut client,
        json!({"cmd": "open", "port": "/dev/ttyMOCK0", "baud": 9600}),
    )
    .await;
    assert_eq!(reply, json!({"type": "status", "message": "Port opened successfully"}));
    assert!(bridge.serial.is_reading());
    assert_eq!(backend.last_settings().unwrap().baud_rate, 9600);

    backend.push_inbound(b"OK\r\n");
    assert_eq!(recv(&mut client).await, json!({"type": "rx", "data": "OK\r\n"}));

    let reply = request(&mut client, json!({"cmd": "write", "data": "AT\r\n"})).await;
    assert_eq!(reply, json!({"type": "status", "message": "Data sent"}));
    assert_eq!(backend.written(), b"AT\r\n");

    let reply = request(&mut client, json!({"cmd": "close"})).await;
    assert_eq!(reply, json!({"type": "status", "message": "Port closed"}));
    assert!(!bridge.serial.is_open());
    assert_eq!(backend.currently_open(), 0);
}

#[tokio::test]
async fn test_open_without_baud_uses_default() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    request(&mut client, json!({"cmd": "open", "port": "/dev/ttyMOCK1"})).await;

    assert_eq!(backend.last_settings().unwrap().baud_rate, 115_200);
}

#[tokio::test]
async fn test_serial_data_reaches_every_client() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    // A round trip on each connection guarantees both are registered.
    request(&mut second, json!({"cmd": "list"})).await;
    request(&mut first, json!({"cmd": "open", "port": "/dev/ttyMOCK0"})).await;

    backend.push_inbound(b"boot ok");

    let expected = json!({"type": "rx", "data": "boot ok"});
    assert_eq!(recv(&mut first).await, expected);
    assert_eq!(recv(&mut second).await, expected);
}

#[tokio::test]
async fn test_failed_open_broadcasts_reason_then_replies() {
    let backend = MockSerialBackend::new();
    backend.set_fail_open(true);
    let (bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    send(&mut client, json!({"cmd": "open", "port": "/dev/ttyMOCK0"})).await;

    // The worker's error callback broadcasts before the command returns.
    let broadcast = recv(&mut client).await;
    assert_eq!(broadcast["type"], "error");
    assert!(broadcast["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to open port: /dev/ttyMOCK0"));

    let reply = recv(&mut client).await;
    assert_eq!(reply, json!({"type": "error", "message": "Failed to open port"}));
    assert!(!bridge.serial.is_open());
}

#[tokio::test]
async fn test_write_while_closed_is_an_error() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    let reply = request(&mut client, json!({"cmd": "write", "data": "x"})).await;

    assert_eq!(reply, json!({"type": "error", "message": "Failed to send data"}));
}

#[tokio::test]
async fn test_unknown_and_malformed_commands() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;
    let unknown = json!({"type": "error", "message": "Unknown command"});

    assert_eq!(request(&mut client, json!({"cmd": "reboot"})).await, unknown);

    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    assert_eq!(recv(&mut client).await, unknown);
}

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let backend = MockSerialBackend::new();
    let (_bridge, addr) = start_bridge(&backend).await;
    let mut client = connect(addr).await;

    client
        .send(Message::Binary(b"{\"cmd\":\"list\"}".to_vec()))
        .await
        .unwrap();
    let reply = request(&mut client, json!({"cmd": "close"})).await;

    // The only reply is to the text command.
    assert_eq!(reply, json!({"type": "status", "message": "Port closed"}));
}
