//! Client exposer: announces local apps and serves the sessions opened on them

use crate::apps::{AppState, AppStateChange, AppStateManager};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::registry::{AppAddressRegistry, AppConnectionRegistry};
use burrow_peer::{bridge, AppEvent, AppEventKind, Peer};
use burrow_proto::{Message, MessageType};
use burrow_transport::Subscription;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Exposes local apps through one connected peer
pub struct Exposer {
    peer: Arc<dyn Peer>,
    config: ClientConfig,
    addresses: Arc<AppAddressRegistry>,
    connections: Arc<AppConnectionRegistry>,
}

impl Exposer {
    pub fn new(peer: Arc<dyn Peer>, config: ClientConfig) -> Self {
        Self {
            peer,
            config,
            addresses: Arc::new(AppAddressRegistry::new()),
            connections: Arc::new(AppConnectionRegistry::new()),
        }
    }

    pub fn addresses(&self) -> &AppAddressRegistry {
        &self.addresses
    }

    pub fn connections(&self) -> &AppConnectionRegistry {
        &self.connections
    }

    /// Announce the apps of `manager` and serve sessions until the peer's
    /// frame stream ends
    pub async fn expose(&self, manager: &dyn AppStateManager) -> ClientResult<()> {
        let mirror = tokio::spawn(mirror_changes(
            self.peer.clone(),
            manager.changes(),
            self.addresses.clone(),
        ));
        let confirmations = tokio::spawn(log_confirmations(
            self.peer.name().to_string(),
            self.peer.app_events(),
        ));

        let frames = self.peer.frames();
        while let Some(message) = frames.recv().await {
            match message.message_type {
                MessageType::SessionOpened => self.open_session(message),
                MessageType::Frame => self.forward(message).await,
                MessageType::SessionClosed => {
                    debug!(session_id = %message.session_id, "Server closed session");
                    self.connections.remove(&message.session_id);
                }
                MessageType::Ping => {}
                other => {
                    warn!(session_id = %message.session_id, "Ignoring {} in frame stream", other);
                }
            }
        }

        mirror.abort();
        confirmations.abort();
        self.connections.close_all();
        info!(peer = %self.peer.name(), "Peer disconnected, all app connections closed");
        Ok(())
    }

    /// Register the session right away so following frames find it, then
    /// dial the app in the background
    fn open_session(&self, message: Message) {
        let session_id = message.session_id;
        let app_name = message.app_name;
        if session_id.is_empty() {
            warn!(app = %app_name, "Ignoring session-opened without session id");
            return;
        }

        let inbound =
            self.connections
                .create(&session_id, &app_name, self.config.session_capacity);
        let address = self.addresses.get(&app_name);
        let peer = self.peer.clone();
        let connections = self.connections.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let Some(address) = address else {
                warn!(session_id = %session_id, app = %app_name, "Session opened for unknown app");
                connections.remove(&session_id);
                close_session(peer.as_ref(), &session_id, &app_name).await;
                return;
            };

            let stream =
                match tokio::time::timeout(config.dial_timeout, TcpStream::connect(&address)).await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        error!(session_id = %session_id, "Failed to connect to app {} on {}: {}", app_name, address, e);
                        connections.remove(&session_id);
                        close_session(peer.as_ref(), &session_id, &app_name).await;
                        return;
                    }
                    Err(_) => {
                        error!(session_id = %session_id, "Timed out connecting to app {} on {}", app_name, address);
                        connections.remove(&session_id);
                        close_session(peer.as_ref(), &session_id, &app_name).await;
                        return;
                    }
                };

            info!(session_id = %session_id, app = %app_name, "Connected to {}", address);
            bridge(
                peer.as_ref(),
                &session_id,
                &app_name,
                inbound,
                stream,
                config.read_buffer_size,
            )
            .await;
            connections.remove(&session_id);
        });
    }

    async fn forward(&self, message: Message) {
        let attempts = self.config.session_lookup_attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(connection) = self.connections.get(&message.session_id) {
                let session_id = message.session_id.clone();
                if !connection.deliver(message).await {
                    debug!(session_id = %session_id, "Session ended, dropping frame");
                }
                return;
            }
            if self.connections.is_finished(&message.session_id) {
                debug!(session_id = %message.session_id, "Dropping frame for finished session");
                return;
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.session_lookup_delay).await;
            }
        }

        warn!(
            session_id = %message.session_id,
            "No connection for session after {} lookups, closing it", attempts
        );
        self.connections.remove(&message.session_id);
        close_session(self.peer.as_ref(), &message.session_id, &message.app_name).await;
    }
}

async fn close_session(peer: &dyn Peer, session_id: &str, app_name: &str) {
    if let Err(e) = peer
        .send(Message::session_closed(session_id, app_name))
        .await
    {
        debug!(session_id = %session_id, "Failed to send session-closed: {}", e);
    }
}

/// Forward app state changes to the peer until it closes
async fn mirror_changes(
    peer: Arc<dyn Peer>,
    changes: Subscription<AppStateChange>,
    addresses: Arc<AppAddressRegistry>,
) {
    let closed = peer.closed();
    loop {
        let change = tokio::select! {
            _ = closed.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let app = change.app;
        match change.state {
            AppState::Added => {
                info!(app = %app.name, "New app added: {} on {}", app.name, app.address);
                addresses.register(&app.name, &app.address);
                if let Err(e) = peer.send(Message::app_added(&app.name, &app.address)).await {
                    error!(app = %app.name, "Could not send app added message to the peer: {}", e);
                }
            }
            AppState::Withdrawn => {
                info!(app = %app.name, "App withdrawn: {}", app.name);
                if let Err(e) = peer.send(Message::app_withdrawn(&app.name)).await {
                    error!(app = %app.name, "Could not send app withdrawn message to the peer: {}", e);
                }
                addresses.unregister(&app.name);
            }
        }
    }
    debug!("App state mirroring stopped");
}

async fn log_confirmations(peer: String, events: Subscription<AppEvent>) {
    while let Some(event) = events.recv().await {
        match event.kind {
            AppEventKind::Confirmed => {
                info!(
                    peer = %peer,
                    app = %event.app.name,
                    "App {} is exposed by {} on {}", event.app.name, peer, event.app.address
                );
            }
            other => {
                debug!(peer = %peer, app = %event.app.name, "Ignoring {:?} app event", other);
            }
        }
    }
}
