//! WebSocket transport configuration

use burrow_proto::DATA_EXCHANGE_PATH;
use burrow_transport::{TransportError, TransportResult, DEFAULT_CHANNEL_CAPACITY};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as ProtocolConfig;

/// WebSocket-specific configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Upgrade path served by the listener and requested by the connector
    pub path: String,

    /// Maximum size of one WebSocket message
    pub max_message_size: usize,

    /// Number of sends queued for the writer task before `send` waits
    pub write_queue_capacity: usize,

    /// Number of decoded messages buffered for the receive stream
    pub inbound_capacity: usize,

    /// Pause after a failed TCP `accept` before the listener tries again
    pub accept_error_delay: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: DATA_EXCHANGE_PATH.to_string(),
            max_message_size: 16 * 1024 * 1024, // 16MB
            write_queue_capacity: DEFAULT_CHANNEL_CAPACITY,
            inbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            accept_error_delay: Duration::from_millis(100),
        }
    }
}

impl WebSocketConfig {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_accept_error_delay(mut self, delay: Duration) -> Self {
        self.accept_error_delay = delay;
        self
    }

    pub fn validate(&self) -> TransportResult<()> {
        if !self.path.starts_with('/') {
            return Err(TransportError::ConfigurationError(format!(
                "WebSocket path must start with '/': {}",
                self.path
            )));
        }
        if self.max_message_size == 0 {
            return Err(TransportError::ConfigurationError(
                "max_message_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a request path targets the data endpoint
    pub fn matches_path(&self, path: &str) -> bool {
        path == self.path || path.strip_suffix('/') == Some(self.path.as_str())
    }

    pub(crate) fn protocol_config(&self) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}
