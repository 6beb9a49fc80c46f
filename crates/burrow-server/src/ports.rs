//! Port selection and listener binding for exposed apps

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use rand::Rng;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Chooses the port an app should listen on
pub trait PortAllocator: Send + Sync {
    fn get_free_port(&self) -> ServerResult<u16>;
}

/// Lets the OS pick a currently free port
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomPortAllocator;

impl PortAllocator for RandomPortAllocator {
    fn get_free_port(&self) -> ServerResult<u16> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        Ok(listener.local_addr()?.port())
    }
}

/// Picks uniformly from an inclusive port range
///
/// The port is not checked up front; a taken port surfaces as a bind failure and
/// [`PortOpener`] draws again.
#[derive(Debug, Clone, Copy)]
pub struct RangePortAllocator {
    min: u16,
    max: u16,
}

impl RangePortAllocator {
    pub fn new(min: u16, max: u16) -> ServerResult<Self> {
        if min == 0 || min > max {
            return Err(ServerError::PortAllocation(format!(
                "Invalid port range {}-{}",
                min, max
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u16 {
        self.min
    }

    pub fn max(&self) -> u16 {
        self.max
    }
}

impl Default for RangePortAllocator {
    fn default() -> Self {
        Self {
            min: 30000,
            max: 30499,
        }
    }
}

impl PortAllocator for RangePortAllocator {
    fn get_free_port(&self) -> ServerResult<u16> {
        Ok(rand::thread_rng().gen_range(self.min..=self.max))
    }
}

/// Always hands out the same port
#[derive(Debug, Clone, Copy)]
pub struct PredefinedPortAllocator {
    port: u16,
}

impl PredefinedPortAllocator {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl PortAllocator for PredefinedPortAllocator {
    fn get_free_port(&self) -> ServerResult<u16> {
        Ok(self.port)
    }
}

/// Listener opened for one app
#[derive(Debug)]
pub struct PortOpener {
    app_name: String,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl PortOpener {
    /// Bind a listener for `app_name` on a port drawn from `allocator`
    ///
    /// A failed bind (typically a port taken between allocation and bind)
    /// is retried with a freshly drawn port.
    pub async fn open(
        app_name: &str,
        allocator: &dyn PortAllocator,
        config: &ServerConfig,
    ) -> ServerResult<Self> {
        let attempts = config.bind_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=attempts {
            let port = allocator.get_free_port()?;
            let address = format!("{}:{}", config.bind_host, port);

            match TcpListener::bind(&address).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    info!(app = %app_name, "Listening on {} for app {}", local_addr, app_name);
                    return Ok(Self {
                        app_name: app_name.to_string(),
                        listener,
                        local_addr,
                    });
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        warn!(
                            app = %app_name,
                            "Could not bind {} (attempt {}/{}): {}, retrying in {:?}",
                            address, attempt, attempts, e, config.bind_retry_delay
                        );
                        tokio::time::sleep(config.bind_retry_delay).await;
                    }
                }
            }
        }

        Err(ServerError::BindError {
            address: config.bind_host.clone(),
            reason: format!("no free port after {} attempts: {}", attempts, last_error),
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn into_listener(self) -> TcpListener {
        self.listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_range_allocator_stays_in_bounds() {
        let allocator = RangePortAllocator::new(40000, 40009).unwrap();
        for _ in 0..200 {
            let port = allocator.get_free_port().unwrap();
            assert!((40000..=40009).contains(&port));
        }
    }

    #[test]
    fn test_range_allocator_rejects_bad_ranges() {
        assert!(RangePortAllocator::new(500, 100).is_err());
        assert!(RangePortAllocator::new(0, 100).is_err());
        assert!(RangePortAllocator::new(100, 100).is_ok());

        let default = RangePortAllocator::default();
        assert_eq!((default.min(), default.max()), (30000, 30499));
    }

    #[test]
    fn test_random_allocator_returns_usable_port() {
        let port = RandomPortAllocator.get_free_port().unwrap();
        assert_ne!(port, 0);
    }

    #[tokio::test]
    async fn test_opener_binds_allocated_port() {
        let port = RandomPortAllocator.get_free_port().unwrap();
        let opener = PortOpener::open(
            "web",
            &PredefinedPortAllocator::new(port),
            &ServerConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(opener.port(), port);
        assert_eq!(opener.app_name(), "web");
        assert!(tokio::net::TcpStream::connect(opener.local_addr()).await.is_ok());
    }

    #[tokio::test]
    async fn test_opener_gives_up_after_configured_attempts() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig::default()
            .with_bind_attempts(3)
            .with_bind_retry_delay(Duration::from_millis(1));

        let result = PortOpener::open("web", &PredefinedPortAllocator::new(port), &config).await;
        match result {
            Err(ServerError::BindError { reason, .. }) => {
                assert!(reason.contains("3 attempts"));
            }
            other => panic!("expected bind error, got {:?}", other.map(|o| o.port())),
        }
    }

    #[tokio::test]
    async fn test_opener_retries_with_new_port() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct TakenThenFree {
            taken: u16,
            calls: AtomicUsize,
        }

        impl PortAllocator for TakenThenFree {
            fn get_free_port(&self) -> ServerResult<u16> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(self.taken)
                } else {
                    Ok(0)
                }
            }
        }

        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let allocator = TakenThenFree {
            taken: taken.local_addr().unwrap().port(),
            calls: AtomicUsize::new(0),
        };
        let opener = PortOpener::open("web", &allocator, &ServerConfig::default())
            .await
            .unwrap();

        assert_ne!(opener.port(), allocator.taken);
        assert_eq!(allocator.calls.load(Ordering::SeqCst), 2);
    }
}
