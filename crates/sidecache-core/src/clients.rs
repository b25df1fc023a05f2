//! Connected client surfaces.
//!
//! The hub tracks every open client surface (a tab, a webview) and carries
//! the agent-to-client half of the control channel: broadcasts, focus and
//! navigate commands, and requests to open a new surface when none fits.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Messages pushed from the agent to client surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Session teardown: drop these keys from client-side storage.
    ClearAuthData { keys: Vec<String> },
    /// Bring this surface to the foreground.
    Focus,
    /// Point this surface at a new URL.
    Navigate { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct ClientEntry {
    url: String,
    sender: UnboundedSender<ClientMessage>,
}

/// Registry of connected surfaces, shared behind an `Arc`.
///
/// No await happens under the lock; sends go through unbounded channels and
/// never block.
pub struct ClientHub {
    clients: Mutex<HashMap<ClientId, ClientEntry>>,
    next_id: AtomicU64,
    open_tx: UnboundedSender<String>,
    open_rx: Mutex<Option<UnboundedReceiver<String>>>,
}

impl ClientHub {
    pub fn new() -> Self {
        let (open_tx, open_rx) = mpsc::unbounded_channel();
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open_tx,
            open_rx: Mutex::new(Some(open_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ClientId, ClientEntry>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a surface currently showing `url`.
    pub fn connect(&self, url: &str) -> (ClientId, UnboundedReceiver<ClientMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().insert(
            id,
            ClientEntry {
                url: url.to_string(),
                sender,
            },
        );
        debug!(client = %id, url, "Client surface connected");
        (id, receiver)
    }

    pub fn disconnect(&self, id: ClientId) {
        if self.lock().remove(&id).is_some() {
            debug!(client = %id, "Client surface disconnected");
        }
    }

    /// A surface moved; keep its location current so `focus_or_open` can
    /// find it.
    pub fn update_location(&self, id: ClientId, url: &str) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.url = url.to_string();
        }
    }

    pub fn client_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver to every connected surface, pruning dead ones. Returns how
    /// many surfaces received the message.
    pub fn broadcast(&self, message: &ClientMessage) -> usize {
        let mut clients = self.lock();
        clients.retain(|id, entry| {
            if entry.sender.send(message.clone()).is_ok() {
                true
            } else {
                debug!(client = %id, "Pruning dead client surface");
                false
            }
        });
        clients.len()
    }

    /// Focus the surface already showing `url`, or ask the host to open a
    /// new one.
    pub fn focus_or_open(&self, url: &str) {
        let mut clients = self.lock();
        let target = clients
            .iter()
            .find(|(_, entry)| entry.url == url)
            .map(|(id, _)| *id);

        if let Some(id) = target {
            let delivered = clients
                .get(&id)
                .map(|entry| {
                    entry.sender.send(ClientMessage::Focus).is_ok()
                        && entry
                            .sender
                            .send(ClientMessage::Navigate {
                                url: url.to_string(),
                            })
                            .is_ok()
                })
                .unwrap_or(false);
            if delivered {
                debug!(client = %id, url, "Focused existing client surface");
                return;
            }
            // The matching surface is gone; fall through to opening one.
            clients.remove(&id);
        }
        drop(clients);

        if self.open_tx.send(url.to_string()).is_err() {
            debug!(url, "No host listening for open requests");
        }
    }

    /// Stream of URLs the host should open new surfaces for. Can be taken
    /// once.
    pub fn take_open_requests(&self) -> Option<UnboundedReceiver<String>> {
        self.open_rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl Default for ClientHub {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
