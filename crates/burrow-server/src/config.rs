use burrow_peer::DEFAULT_READ_BUFFER_SIZE;
use std::time::Duration;

/// Settings for the per-app listeners the server opens
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface app listeners bind to
    pub bind_host: String,
    /// Ports tried before giving up on an app
    pub bind_attempts: u32,
    pub bind_retry_delay: Duration,
    pub read_buffer_size: usize,
    /// Pause after a failed `accept` on an app listener
    pub accept_error_delay: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_attempts: 20,
            bind_retry_delay: Duration::from_millis(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            accept_error_delay: Duration::from_millis(100),
        }
    }
}

impl ServerConfig {
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_bind_attempts(mut self, attempts: u32) -> Self {
        self.bind_attempts = attempts;
        self
    }

    pub fn with_bind_retry_delay(mut self, delay: Duration) -> Self {
        self.bind_retry_delay = delay;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_accept_error_delay(mut self, delay: Duration) -> Self {
        self.accept_error_delay = delay;
        self
    }
}
