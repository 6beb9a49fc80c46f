//! Client-side lookup tables: app addresses and live app connections

use burrow_proto::Message;
use burrow_transport::{channel, MessageStream, Publisher};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::debug;

/// Finished session ids remembered so their late frames are dropped at once
const FINISHED_LIMIT: usize = 1024;

/// Local address of every announced app
#[derive(Debug, Default)]
pub struct AppAddressRegistry {
    addresses: DashMap<String, String>,
}

impl AppAddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, app_name: &str, address: &str) {
        self.addresses
            .insert(app_name.to_string(), address.to_string());
    }

    pub fn unregister(&self, app_name: &str) {
        self.addresses.remove(app_name);
    }

    pub fn get(&self, app_name: &str) -> Option<String> {
        self.addresses.get(app_name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// One tunneled session to a local app
#[derive(Debug, Clone)]
pub struct AppConnection {
    pub session_id: String,
    pub app_name: String,
    outbox: Publisher<Message>,
}

impl AppConnection {
    /// Queue a frame for the local socket. Returns `false` once the session ended.
    pub async fn deliver(&self, message: Message) -> bool {
        self.outbox.publish(message).await
    }

    fn close(&self) {
        self.outbox.close();
    }
}

/// Live app connections by session id
#[derive(Default)]
pub struct AppConnectionRegistry {
    connections: DashMap<String, AppConnection>,
    finished: Mutex<VecDeque<String>>,
}

impl std::fmt::Debug for AppConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl AppConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the stream its bridge reads from
    ///
    /// An existing entry for the same session is closed and replaced.
    pub fn create(&self, session_id: &str, app_name: &str, capacity: usize) -> MessageStream {
        let (outbox, inbound) = channel(capacity);
        let connection = AppConnection {
            session_id: session_id.to_string(),
            app_name: app_name.to_string(),
            outbox,
        };
        if let Some(previous) = self.connections.insert(session_id.to_string(), connection) {
            debug!(session_id = %session_id, "Replacing existing app connection");
            previous.close();
        }
        inbound
    }

    pub fn get(&self, session_id: &str) -> Option<AppConnection> {
        self.connections
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    /// Close and forget a session. Safe to call repeatedly.
    pub fn remove(&self, session_id: &str) {
        if let Some((_, connection)) = self.connections.remove(session_id) {
            connection.close();
            debug!(session_id = %session_id, app = %connection.app_name, "App connection closed");
        }
        if let Ok(mut finished) = self.finished.lock() {
            if !finished.iter().any(|id| id == session_id) {
                finished.push_back(session_id.to_string());
                if finished.len() > FINISHED_LIMIT {
                    finished.pop_front();
                }
            }
        }
    }

    /// Whether the session was seen and has already ended
    pub fn is_finished(&self, session_id: &str) -> bool {
        self.finished
            .lock()
            .map(|finished| finished.iter().any(|id| id == session_id))
            .unwrap_or(false)
    }

    pub fn close_all(&self) {
        let session_ids: Vec<String> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in session_ids {
            self.remove(&session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
