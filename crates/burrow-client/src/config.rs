use burrow_peer::DEFAULT_READ_BUFFER_SIZE;
use burrow_transport::DEFAULT_CHANNEL_CAPACITY;
use std::time::Duration;

/// Client exposer settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Lookups of a frame's session before the session is given up
    pub session_lookup_attempts: u32,
    pub session_lookup_delay: Duration,
    /// Bound on connecting to a local app
    pub dial_timeout: Duration,
    pub read_buffer_size: usize,
    /// Frames buffered per session
    pub session_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_lookup_attempts: 20,
            session_lookup_delay: Duration::from_millis(10),
            dial_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            session_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn with_session_lookup(mut self, attempts: u32, delay: Duration) -> Self {
        self.session_lookup_attempts = attempts;
        self.session_lookup_delay = delay;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}
