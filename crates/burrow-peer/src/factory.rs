//! Peer factories and the adapters layered on top of them

use crate::connection::{PeerConfig, PeerConnection};
use crate::error::PeerResult;
use crate::peer::{Peer, PeerFactory, PeerStream};
use async_trait::async_trait;
use burrow_transport::{channel, TransportFactory, DEFAULT_CHANNEL_CAPACITY};
use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Introduces every transport produced by a [`TransportFactory`]
///
/// Introductions run concurrently, so one silent transport does not hold
/// up the others.
pub struct DefaultPeerFactory {
    local_name: String,
    transports: Arc<dyn TransportFactory>,
    config: PeerConfig,
}

impl DefaultPeerFactory {
    pub fn new(local_name: impl Into<String>, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            local_name: local_name.into(),
            transports,
            config: PeerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl PeerFactory for DefaultPeerFactory {
    async fn peers(&self) -> PeerResult<PeerStream> {
        let transports = self.transports.transports().await?;
        let (publisher, peers) = channel(DEFAULT_CHANNEL_CAPACITY);
        let local_name = self.local_name.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            while let Some(transport) = transports.recv().await {
                if publisher.is_closed() {
                    let _ = transport.close().await;
                    break;
                }

                let publisher = publisher.clone();
                let local_name = local_name.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let transport_id = transport.id().to_string();
                    match PeerConnection::connect(&local_name, transport, config).await {
                        Ok(peer) => {
                            let peer: Arc<dyn Peer> = peer;
                            if !publisher.publish(peer.clone()).await {
                                let _ = peer.close().await;
                            }
                        }
                        Err(e) => {
                            error!(transport = %transport_id, "Error when creating peer: {}", e);
                        }
                    }
                });
            }
            debug!("Transport stream ended");
        });

        Ok(peers)
    }
}

/// Rejects peers whose name is already connected
///
/// A duplicate is closed immediately and never published. The winning
/// peer's name is released once it closes.
pub struct UniquePeerFactory {
    inner: Arc<dyn PeerFactory>,
    names: Arc<DashSet<String>>,
}

impl UniquePeerFactory {
    pub fn new(inner: Arc<dyn PeerFactory>) -> Self {
        Self {
            inner,
            names: Arc::new(DashSet::new()),
        }
    }

    /// Names of the peers currently connected through this factory
    pub fn connected(&self) -> Vec<String> {
        self.names.iter().map(|name| name.clone()).collect()
    }
}

#[async_trait]
impl PeerFactory for UniquePeerFactory {
    async fn peers(&self) -> PeerResult<PeerStream> {
        let source = self.inner.peers().await?;
        let (publisher, peers) = channel(DEFAULT_CHANNEL_CAPACITY);
        let names = self.names.clone();

        tokio::spawn(async move {
            while let Some(peer) = source.recv().await {
                let name = peer.name().to_string();
                if !names.insert(name.clone()) {
                    warn!(peer = %name, "Peer with this name is already connected, closing");
                    if let Err(e) = peer.close().await {
                        debug!(peer = %name, "Failed to close duplicate peer: {}", e);
                    }
                    continue;
                }

                let registered = names.clone();
                let released = name.clone();
                peer.when_closed(Box::new(move || {
                    registered.remove(&released);
                }));

                if !publisher.publish(peer.clone()).await {
                    let _ = peer.close().await;
                    break;
                }
                info!(peer = %name, "Peer connected");
            }
        });

        Ok(peers)
    }
}

/// Closes a peer's frames and app event streams once the peer closes
pub struct AutoCloseStreams {
    inner: Arc<dyn PeerFactory>,
}

impl AutoCloseStreams {
    pub fn new(inner: Arc<dyn PeerFactory>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PeerFactory for AutoCloseStreams {
    async fn peers(&self) -> PeerResult<PeerStream> {
        let source = self.inner.peers().await?;
        let (publisher, peers) = channel(DEFAULT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(peer) = source.recv().await {
                let frames = peer.frames();
                let app_events = peer.app_events();
                peer.when_closed(Box::new(move || {
                    frames.close();
                    app_events.close();
                }));

                if !publisher.publish(peer.clone()).await {
                    let _ = peer.close().await;
                    break;
                }
            }
        });

        Ok(peers)
    }
}
