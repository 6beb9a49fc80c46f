//! Task tracking for app acceptor loops
//!
//! Keeps the join handle of every acceptor loop, keyed by peer and app, so
//! the loop can be aborted when the app is withdrawn or the peer leaves.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tracks acceptor loops by `(peer, app)`
pub struct TaskTracker {
    tasks: Mutex<HashMap<(String, String), JoinHandle<()>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Register the acceptor loop of `peer/app`, aborting any previous one
    pub fn register(&self, peer: &str, app: &str, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(previous) = tasks.insert((peer.to_string(), app.to_string()), handle) {
                debug!("Replacing acceptor loop {}/{}", peer, app);
                previous.abort();
            }
        }
    }

    /// Abort and forget the loop of `peer/app`. Returns whether one existed.
    pub fn unregister(&self, peer: &str, app: &str) -> bool {
        let removed = self
            .tasks
            .lock()
            .ok()
            .and_then(|mut tasks| tasks.remove(&(peer.to_string(), app.to_string())));
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every loop of `peer`. Returns how many were aborted.
    pub fn unregister_peer(&self, peer: &str) -> usize {
        let Ok(mut tasks) = self.tasks.lock() else {
            return 0;
        };
        let keys: Vec<(String, String)> = tasks
            .keys()
            .filter(|(owner, _)| owner == peer)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(handle) = tasks.remove(key) {
                handle.abort();
            }
        }
        keys.len()
    }

    /// Number of loops still running
    pub fn len(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.values().filter(|handle| !handle.is_finished()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}
