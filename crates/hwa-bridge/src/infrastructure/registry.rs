//! Client registry: the set of live WebSocket connections.
//!
//! Each registered client is represented by the sending half of its bounded
//! outbound queue.  A dedicated writer task per connection drains the queue
//! into the socket (see [`crate::infrastructure::ws_server`]), so
//! [`ClientRegistry::broadcast`] only enqueues.  It never waits on a socket,
//! and a stalled client fills its own queue without delaying anyone else.
//!
//! `add`, `remove`, and `broadcast` all take the same lock for their whole
//! duration, so broadcasts are serialized with each other and with
//! membership changes.

use std::collections::HashMap;

use hwa_core::encode_text_frame;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Sending half of one client's outbound queue.  Items are complete,
/// already-encoded WebSocket frames.
pub type OutboundSender = mpsc::Sender<Vec<u8>>;

/// Thread-safe map from connection id to outbound queue.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<Uuid, OutboundSender>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id`.  Returns `false` (and keeps the existing entry) if
    /// `id` is already present.
    pub fn add(&self, id: Uuid, sender: OutboundSender) -> bool {
        let mut clients = self.clients.lock();
        if clients.contains_key(&id) {
            warn!("client {id} is already registered");
            return false;
        }
        clients.insert(id, sender);
        debug!("client {id} registered ({} live)", clients.len());
        true
    }

    /// Unregisters `id`.  Removing an unknown id is a no-op returning `false`.
    pub fn remove(&self, id: &Uuid) -> bool {
        let mut clients = self.clients.lock();
        let removed = clients.remove(id).is_some();
        if removed {
            debug!("client {id} unregistered ({} live)", clients.len());
        }
        removed
    }

    /// Queues `message` as a text frame for every registered client.
    ///
    /// Returns the number of delivery attempts, which equals the number of
    /// clients registered at the time of the call.  A client whose queue is
    /// full misses this message; a client whose writer has exited is
    /// skipped and will be removed by its own connection handler.
    pub fn broadcast(&self, message: &str) -> usize {
        let frame = encode_text_frame(message);
        let clients = self.clients.lock();

        for (id, sender) in clients.iter() {
            match sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("client {id}: outbound queue full, dropping broadcast");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("client {id}: writer closed, skipping broadcast");
                }
            }
        }

        clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.clients.lock().contains_key(id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
