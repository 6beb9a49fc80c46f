//! The server loop: one router and one app event loop per connected peer

use crate::error::ServerResult;
use crate::exposer::AppExposer;
use burrow_peer::{AppEvent, AppEventKind, Peer, PeerFactory};
use burrow_proto::Message;
use burrow_router::PacketRouter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Accepts peers and exposes the apps they announce
pub struct Server {
    peers: Arc<dyn PeerFactory>,
    exposer: Arc<dyn AppExposer>,
}

impl Server {
    pub fn new(peers: Arc<dyn PeerFactory>, exposer: Arc<dyn AppExposer>) -> Self {
        Self { peers, exposer }
    }

    /// Serve peers until the peer factory stops producing them
    pub async fn run(&self) -> ServerResult<()> {
        let peers = self.peers.peers().await?;
        info!("Server started, waiting for peers");

        while let Some(peer) = peers.recv().await {
            tokio::spawn(serve_peer(peer, self.exposer.clone()));
        }

        info!("Peer stream ended, server stopping");
        Ok(())
    }
}

async fn serve_peer(peer: Arc<dyn Peer>, exposer: Arc<dyn AppExposer>) {
    let name = peer.name().to_string();
    info!(peer = %name, "Peer `{}` connected", name);

    let router = PacketRouter::new(peer.frames());
    let events = peer.app_events();

    while let Some(event) = events.recv().await {
        if let Err(e) = on_app_event(&peer, exposer.as_ref(), &router, event).await {
            error!(peer = %name, "Failed to handle app event: {}", e);
        }
    }

    match exposer.terminate(&name).await {
        Ok(()) => info!(peer = %name, "Peer `{}` disconnected", name),
        Err(e) => warn!(peer = %name, "Could not terminate peer `{}` gracefully: {}", name, e),
    }
}

async fn on_app_event(
    peer: &Arc<dyn Peer>,
    exposer: &dyn AppExposer,
    router: &Arc<PacketRouter>,
    event: AppEvent,
) -> ServerResult<()> {
    match event.kind {
        AppEventKind::Added => {
            let exposed = exposer
                .expose(peer.clone(), &event.app, router.clone())
                .await?;
            peer.send(Message::app_confirmed(
                &exposed.app.name,
                &exposed.app.address,
            ))
            .await?;
        }
        AppEventKind::Withdrawn => {
            exposer.unexpose(peer.name(), &event.app.name).await?;
        }
        AppEventKind::Confirmed => {
            debug!(peer = %peer.name(), app = %event.app.name, "Ignoring app confirmation from peer");
        }
    }
    Ok(())
}
