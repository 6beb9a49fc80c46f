//! WebSocket listener and connector implementations

use async_trait::async_trait;
use burrow_transport::{
    channel, Transport, TransportError, TransportFactory, TransportResult, TransportStream,
    DEFAULT_CHANNEL_CAPACITY,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::WebSocketConfig;
use crate::connection::WebSocketTransport;

/// WebSocket listener accepting upgrades on the configured path
pub struct WebSocketListener {
    tcp_listener: TcpListener,
    config: Arc<WebSocketConfig>,
}

impl std::fmt::Debug for WebSocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketListener")
            .field("local_addr", &self.tcp_listener.local_addr())
            .field("path", &self.config.path)
            .finish()
    }
}

impl WebSocketListener {
    pub async fn bind(bind_addr: SocketAddr, config: Arc<WebSocketConfig>) -> TransportResult<Self> {
        config.validate()?;

        let tcp_listener =
            TcpListener::bind(bind_addr)
                .await
                .map_err(|e| TransportError::BindError {
                    address: bind_addr.ip().to_string(),
                    port: bind_addr.port(),
                    reason: e.to_string(),
                })?;

        let local_addr = tcp_listener.local_addr().map_err(TransportError::IoError)?;
        info!("WebSocket listener bound to ws://{}{}", local_addr, config.path);

        Ok(Self {
            tcp_listener,
            config,
        })
    }

    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        self.tcp_listener
            .local_addr()
            .map_err(TransportError::IoError)
    }

    /// Accept the next connection that completes the WebSocket upgrade
    ///
    /// Connections failing the upgrade (wrong path, not WebSocket) are
    /// logged and skipped.
    pub async fn accept(&self) -> TransportResult<(WebSocketTransport, SocketAddr)> {
        loop {
            let (tcp_stream, remote_addr) = self
                .tcp_listener
                .accept()
                .await
                .map_err(TransportError::IoError)?;

            debug!("Incoming TCP connection from {}", remote_addr);

            let config = self.config.clone();
            let callback = |req: &Request, response: Response| {
                let path = req.uri().path();
                if config.matches_path(path) {
                    Ok(response)
                } else {
                    debug!("Rejecting WebSocket upgrade for path {}", path);
                    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    Err(response)
                }
            };

            let ws_stream = match tokio_tungstenite::accept_hdr_async_with_config(
                tcp_stream,
                callback,
                Some(self.config.protocol_config()),
            )
            .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("WebSocket handshake failed from {}: {}", remote_addr, e);
                    continue;
                }
            };

            info!("WebSocket connection established from {}", remote_addr);

            let transport =
                WebSocketTransport::new(ws_stream, remote_addr.to_string(), &self.config);
            return Ok((transport, remote_addr));
        }
    }
}

/// Publishes every accepted WebSocket connection as a transport
pub struct WebSocketTransportFactory {
    listener: Mutex<Option<WebSocketListener>>,
}

impl WebSocketTransportFactory {
    pub fn new(listener: WebSocketListener) -> Self {
        Self {
            listener: Mutex::new(Some(listener)),
        }
    }
}

#[async_trait]
impl TransportFactory for WebSocketTransportFactory {
    async fn transports(&self) -> TransportResult<TransportStream> {
        let listener = self
            .listener
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(TransportError::AlreadySubscribed)?;

        let (publisher, transports) = channel(DEFAULT_CHANNEL_CAPACITY);
        let accept_error_delay = listener.config.accept_error_delay;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((transport, _)) => {
                        let transport: Arc<dyn Transport> = Arc::new(transport);
                        if !publisher.publish(transport.clone()).await {
                            let _ = transport.close().await;
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                        if publisher.is_closed() {
                            break;
                        }
                        tokio::time::sleep(accept_error_delay).await;
                    }
                }
            }
            debug!("WebSocket accept loop ended");
        });

        Ok(transports)
    }
}

/// WebSocket connector for establishing outgoing connections
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: Arc<WebSocketConfig>,
}

impl WebSocketConnector {
    pub fn new(config: Arc<WebSocketConfig>) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Full endpoint URL: the server URL with the data path appended
    pub fn endpoint(&self, server: &str) -> TransportResult<Url> {
        let mut url = Url::parse(server)
            .map_err(|e| TransportError::ConfigurationError(format!("Invalid URL: {}", e)))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::ConfigurationError(format!(
                    "Unsupported scheme {}, expected ws or wss",
                    other
                )))
            }
        }

        let path = format!("{}{}", url.path().trim_end_matches('/'), self.config.path);
        url.set_path(&path);
        Ok(url)
    }

    pub async fn connect(&self, server: &str) -> TransportResult<WebSocketTransport> {
        let url = self.endpoint(server)?;
        debug!("Connecting to WebSocket server: {}", url);

        let (ws_stream, _response) = tokio_tungstenite::connect_async_with_config(
            url.as_str(),
            Some(self.config.protocol_config()),
            false,
        )
        .await
        .map_err(|e| {
            TransportError::ConnectionError(format!("WebSocket handshake failed: {}", e))
        })?;

        info!("WebSocket connection established to {}", url);

        let remote = url
            .host_str()
            .map(|host| match url.port() {
                Some(port) => format!("{}:{}", host, port),
                None => host.to_string(),
            })
            .unwrap_or_else(|| url.to_string());
        Ok(WebSocketTransport::new(ws_stream, remote, &self.config))
    }
}
