//! Exposing peer apps on local TCP ports

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::ports::{PortAllocator, PortOpener};
use crate::task_tracker::TaskTracker;
use async_trait::async_trait;
use burrow_peer::{bridge, Peer};
use burrow_proto::{App, Message};
use burrow_router::PacketRouter;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// App reachable on a local port, on behalf of a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedApp {
    /// `address` is the local listener, `peer` the owning peer
    pub app: App,
    pub port: u16,
}

/// Opens and closes local listeners for peer apps
#[async_trait]
pub trait AppExposer: Send + Sync {
    /// Start listening for `app` and bridge every accepted connection to `peer`
    async fn expose(
        &self,
        peer: Arc<dyn Peer>,
        app: &App,
        router: Arc<PacketRouter>,
    ) -> ServerResult<ExposedApp>;

    /// Stop listening for `app` of `peer`. Idempotent.
    async fn unexpose(&self, peer: &str, app: &str) -> ServerResult<()>;

    /// Stop listening for every app of `peer`
    async fn terminate(&self, peer: &str) -> ServerResult<()>;

    /// Snapshot of everything currently exposed
    fn apps(&self) -> Vec<ExposedApp>;
}

/// [`AppExposer`] opening one TCP listener per app
pub struct DefaultAppExposer {
    allocator: Arc<dyn PortAllocator>,
    config: ServerConfig,
    registry: DashMap<(String, String), ExposedApp>,
    tasks: TaskTracker,
}

impl DefaultAppExposer {
    pub fn new(allocator: Arc<dyn PortAllocator>, config: ServerConfig) -> Self {
        Self {
            allocator,
            config,
            registry: DashMap::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Number of acceptor loops still running
    pub fn listeners(&self) -> usize {
        self.tasks.len()
    }
}

#[async_trait]
impl AppExposer for DefaultAppExposer {
    async fn expose(
        &self,
        peer: Arc<dyn Peer>,
        app: &App,
        router: Arc<PacketRouter>,
    ) -> ServerResult<ExposedApp> {
        let opener = PortOpener::open(&app.name, self.allocator.as_ref(), &self.config).await?;
        let port = opener.port();
        let peer_name = peer.name().to_string();

        let exposed = ExposedApp {
            app: app
                .with_address(format!("{}:{}", self.config.bind_host, port))
                .with_peer(peer_name.clone()),
            port,
        };

        let acceptor = tokio::spawn(accept_sessions(
            opener.into_listener(),
            peer,
            app.name.clone(),
            router,
            self.config.read_buffer_size,
            self.config.accept_error_delay,
        ));
        self.tasks.register(&peer_name, &app.name, acceptor);
        self.registry
            .insert((peer_name.clone(), app.name.clone()), exposed.clone());

        info!(
            peer = %peer_name,
            app = %app.name,
            "Exposed app {} of peer {} on {}", app.name, peer_name, exposed.app.address
        );
        Ok(exposed)
    }

    async fn unexpose(&self, peer: &str, app: &str) -> ServerResult<()> {
        let stopped = self.tasks.unregister(peer, app);
        let removed = self
            .registry
            .remove(&(peer.to_string(), app.to_string()))
            .is_some();
        if stopped || removed {
            info!(peer = %peer, app = %app, "Withdrew app {} of peer {}", app, peer);
        }
        Ok(())
    }

    async fn terminate(&self, peer: &str) -> ServerResult<()> {
        let stopped = self.tasks.unregister_peer(peer);
        self.registry.retain(|(owner, _), _| owner != peer);
        debug!(peer = %peer, "Closed {} listeners", stopped);
        Ok(())
    }

    fn apps(&self) -> Vec<ExposedApp> {
        self.registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Accept connections for one app until the peer closes or the loop is aborted
async fn accept_sessions(
    listener: TcpListener,
    peer: Arc<dyn Peer>,
    app_name: String,
    router: Arc<PacketRouter>,
    read_buffer_size: usize,
    accept_error_delay: Duration,
) {
    let peer_closed = peer.closed();
    loop {
        let accepted = tokio::select! {
            _ = peer_closed.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, remote_addr)) => {
                let session_id = new_session_id();
                debug!(
                    session_id = %session_id,
                    app = %app_name,
                    "New connection from {}", remote_addr
                );
                tokio::spawn(handle_session(
                    peer.clone(),
                    router.clone(),
                    session_id,
                    app_name.clone(),
                    stream,
                    read_buffer_size,
                ));
            }
            Err(e) => {
                error!(app = %app_name, "Failed to accept TCP connection: {}", e);
                // Errors such as EMFILE repeat until something is released
                tokio::select! {
                    _ = peer_closed.cancelled() => break,
                    _ = tokio::time::sleep(accept_error_delay) => {}
                }
            }
        }
    }
    debug!(app = %app_name, peer = %peer.name(), "Acceptor loop ended");
}

async fn handle_session(
    peer: Arc<dyn Peer>,
    router: Arc<PacketRouter>,
    session_id: String,
    app_name: String,
    stream: TcpStream,
    read_buffer_size: usize,
) {
    // Mailbox first, so no reply can arrive before it exists
    let mailbox = router.get(&session_id);

    if let Err(e) = peer
        .send(Message::session_opened(&session_id, &app_name))
        .await
    {
        warn!(session_id = %session_id, "Failed to open session with peer: {}", e);
        router.done(&session_id);
        return;
    }

    bridge(
        peer.as_ref(),
        &session_id,
        &app_name,
        mailbox,
        stream,
        read_buffer_size,
    )
    .await;
    router.done(&session_id);
}

/// Random 16 hex character session id
fn new_session_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}
