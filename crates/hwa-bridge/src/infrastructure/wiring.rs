//! Composition root: connects the serial worker, the command router, and
//! the WebSocket server.
//!
//! ```text
//! serial read loop ──on_data──►  ServerEvent::rx    ──► registry.broadcast
//! serial failures  ──on_error──► ServerEvent::error ──► registry.broadcast
//! client text      ──handler───► BridgeService      ──► reply to sender
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::application::{encode_event, BridgeService, SerialControl};
use crate::domain::config::BridgeConfig;
use crate::domain::messages::ServerEvent;
use crate::infrastructure::serial::{SerialBackend, SerialWorker};
use crate::infrastructure::ws_server::WebSocketServer;

/// The wired bridge, ready to [`WebSocketServer::run`].
pub struct Bridge {
    pub server: Arc<WebSocketServer>,
    pub serial: Arc<SerialWorker>,
}

/// Builds the server and serial worker and installs every callback.
pub fn wire_bridge(config: BridgeConfig, backend: Arc<dyn SerialBackend>) -> Bridge {
    let serial = Arc::new(SerialWorker::new(backend, config.serial.clone()));
    let default_baud = config.serial.default_baud;
    let server = Arc::new(WebSocketServer::new(config));

    // The callbacks hold the registry, not the server, so the worker never
    // keeps the server alive.
    let registry = Arc::clone(server.registry());
    serial.set_data_callback(move |bytes| {
        let sent = registry.broadcast(&encode_event(&ServerEvent::rx(bytes)));
        debug!("broadcast {} serial bytes to {sent} clients", bytes.len());
    });

    let registry = Arc::clone(server.registry());
    serial.set_error_callback(move |message| {
        registry.broadcast(&encode_event(&ServerEvent::error(message)));
    });

    let control: Arc<dyn SerialControl> = serial.clone();
    let router = BridgeService::new(control, default_baud);
    server.set_message_handler(move |text| router.handle_message(text));

    Bridge { server, serial }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use hwa_core::decode_frame;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::domain::config::SerialConfig;
    use crate::infrastructure::serial::mock::MockSerialBackend;

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

    fn recv_text(rx: &mut mpsc::Receiver<Vec<u8>>) -> String {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Ok(bytes) = rx.try_recv() {
                let (frame, _) = decode_frame(&bytes).unwrap();
                return frame.text().unwrap().to_string();
            }
            assert!(Instant::now() < deadline, "no broadcast received");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_serial_data_is_broadcast_as_rx() {
        let backend = MockSerialBackend::new();
        let bridge = wire_bridge(fast_config(), Arc::new(backend.clone()));
        let (tx, mut rx) = mpsc::channel(8);
        bridge.server.registry().add(Uuid::new_v4(), tx);

        bridge.serial.open("/dev/ttyMOCK0", 9600).unwrap();
        bridge.serial.start_read_loop();
        backend.push_inbound(b"hello\r\n");

        assert_eq!(recv_text(&mut rx), r#"{"type":"rx","data":"hello\r\n"}"#);
        bridge.serial.close();
    }

    #[test]
    fn test_open_failure_is_broadcast_as_error() {
        let backend = MockSerialBackend::new();
        backend.set_fail_open(true);
        let bridge = wire_bridge(fast_config(), Arc::new(backend));
        let (tx, mut rx) = mpsc::channel(8);
        bridge.server.registry().add(Uuid::new_v4(), tx);

        assert!(bridge.serial.open("/dev/ttyMOCK0", 9600).is_err());

        let text = recv_text(&mut rx);
        assert!(text.starts_with(r#"{"type":"error","message":"Failed to open port"#));
    }

    #[test]
    fn test_default_baud_reaches_worker() {
        let backend = MockSerialBackend::new();
        let config = BridgeConfig {
            serial: SerialConfig {
                default_baud: 57_600,
                ..SerialConfig::default()
            },
            ..BridgeConfig::default()
        };
        let bridge = wire_bridge(config, Arc::new(backend));
        assert_eq!(bridge.serial.baud_rate(), 57_600);
    }
}
