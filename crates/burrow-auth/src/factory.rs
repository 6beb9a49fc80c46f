//! Responder-side decorator over a transport factory

use crate::acceptor::Acceptor;
use crate::transport::{accept_authenticated, HandshakeConfig};
use async_trait::async_trait;
use burrow_transport::{
    channel, Transport, TransportFactory, TransportResult, TransportStream,
    DEFAULT_CHANNEL_CAPACITY,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs the responder handshake on every transport produced by `child`
///
/// Handshakes run concurrently, so one slow or silent client cannot hold up
/// the others. Only authenticated transports are published.
pub struct AuthenticatedTransportFactory {
    child: Arc<dyn TransportFactory>,
    acceptor: Arc<dyn Acceptor>,
    config: HandshakeConfig,
}

impl AuthenticatedTransportFactory {
    pub fn new(child: Arc<dyn TransportFactory>, acceptor: Arc<dyn Acceptor>) -> Self {
        Self {
            child,
            acceptor,
            config: HandshakeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: HandshakeConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl TransportFactory for AuthenticatedTransportFactory {
    async fn transports(&self) -> TransportResult<TransportStream> {
        let incoming = self.child.transports().await?;
        let (publisher, authenticated) = channel(DEFAULT_CHANNEL_CAPACITY);
        let acceptor = self.acceptor.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            while let Some(transport) = incoming.recv().await {
                if publisher.is_closed() {
                    let _ = transport.close().await;
                    break;
                }

                let publisher = publisher.clone();
                let acceptor = acceptor.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    let id = transport.id().to_string();
                    match accept_authenticated(transport, acceptor.as_ref(), &config).await {
                        Ok(authenticated) => {
                            let authenticated: Arc<dyn Transport> = Arc::new(authenticated);
                            if !publisher.publish(authenticated.clone()).await {
                                let _ = authenticated.close().await;
                            }
                        }
                        Err(e) => {
                            warn!("[{}] Rejected connection: {}", id, e);
                        }
                    }
                });
            }
            debug!("Authenticated transport factory stopped");
        });

        Ok(authenticated)
    }
}
