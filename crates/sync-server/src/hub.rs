//! The connection registry: a `dashmap` of online client IDs to a channel
//! back into each connection's own write loop, so one connection's handler
//! (an upload, a kick) can push to every other open connection without
//! holding a lock across an `.await`. Mirrors the registry pattern the
//! orchestrator crate uses for its live-session table.

use dashmap::DashMap;
use sync_core::wire::{ClientInfo, Message};
use tokio::sync::mpsc;

/// A message pushed into a connection's write loop from outside its own
/// read/dispatch path.
#[derive(Debug, Clone)]
pub enum HubPush {
    /// Forward this wire message to the connection as-is.
    Send(Message),
    /// Revoke this session: send `AUTH_FAIL` then close with `KICKED`.
    Kick,
    /// The store was wiped via `/api/reset`: close with `SERVER_RESET`
    /// without an `AUTH_FAIL`, since the session itself wasn't revoked.
    Reset,
}

/// Registry of currently-connected, authenticated sessions.
#[derive(Default)]
pub struct Hub {
    online: DashMap<String, mpsc::UnboundedSender<HubPush>>,
}

impl Hub {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id`'s push channel, replacing any prior
    /// registration for the same ID (a reconnect from the same device).
    pub fn register(&self, client_id: String, tx: mpsc::UnboundedSender<HubPush>) {
        self.online.insert(client_id, tx);
    }

    /// Drop `client_id`'s registration if `tx` is still the one on file
    /// (a stale disconnect of a since-replaced session must not evict the
    /// newer registration).
    pub fn unregister(&self, client_id: &str, tx: &mpsc::UnboundedSender<HubPush>) {
        if let Some(entry) = self.online.get(client_id) {
            if !entry.same_channel(tx) {
                return;
            }
        } else {
            return;
        }
        self.online.remove(client_id);
    }

    /// Whether `client_id` currently holds an open, authenticated connection.
    #[must_use]
    pub fn is_online(&self, client_id: &str) -> bool {
        self.online.contains_key(client_id)
    }

    /// Number of currently connected, authenticated sessions.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Push `msg` to every online client except `except_client_id`.
    pub fn broadcast_except(&self, except_client_id: &str, msg: Message) {
        for entry in self.online.iter() {
            if entry.key() == except_client_id {
                continue;
            }
            let _ = entry.value().send(HubPush::Send(msg.clone()));
        }
    }

    /// Push `msg` to every online client, including `except_client_id`'s
    /// caveat cases (used for the `FILE_REMOVED` echo back to the deleting
    /// client, which doubles as its delete acknowledgement).
    pub fn broadcast_all(&self, msg: Message) {
        for entry in self.online.iter() {
            let _ = entry.value().send(HubPush::Send(msg.clone()));
        }
    }

    /// Close every online connection with [`HubPush::Reset`], e.g. after
    /// `/api/reset` wipes the store out from under them.
    pub fn reset_all(&self) {
        for entry in self.online.iter() {
            let _ = entry.value().send(HubPush::Reset);
        }
    }

    /// Push directly to one client by ID, if online. Returns `false` if
    /// the client is not currently connected.
    pub fn push_to(&self, client_id: &str, push: HubPush) -> bool {
        match self.online.get(client_id) {
            Some(tx) => tx.send(push).is_ok(),
            None => false,
        }
    }

    /// Build the full `CLIENT_LIST` payload: every client with session
    /// history, marked online if it currently holds a connection.
    #[must_use]
    pub fn client_list(&self, sessions: &[(String, String)]) -> Vec<ClientInfo> {
        sessions
            .iter()
            .map(|(client_id, device_name)| ClientInfo {
                client_id: client_id.clone(),
                device_name: device_name.clone(),
                online: self.is_online(client_id),
            })
            .collect()
    }
}
