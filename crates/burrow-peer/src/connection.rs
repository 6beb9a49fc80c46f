//! Peer over a single transport

use crate::error::{PeerError, PeerResult};
use crate::peer::{AppEvent, CloseCallback, Peer};
use async_trait::async_trait;
use burrow_proto::{Message, MessageType};
use burrow_transport::{
    channel, MessageStream, Publisher, Subscription, Transport, DEFAULT_CHANNEL_CAPACITY,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Peer connection settings
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Interval between keepalive pings; zero disables the pinger
    pub ping_interval: Duration,
    pub introduction_timeout: Duration,
    /// Capacity of the frames and app event streams
    pub channel_capacity: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            introduction_timeout: Duration::from_secs(30),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PeerConfig {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_introduction_timeout(mut self, timeout: Duration) -> Self {
        self.introduction_timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

/// Introduced peer wrapping one transport
pub struct PeerConnection {
    name: String,
    transport: Arc<dyn Transport>,
    frames: MessageStream,
    app_events: Subscription<AppEvent>,
    closed: CancellationToken,
    shutting_down: AtomicBool,
    callbacks: Mutex<Option<Vec<CloseCallback>>>,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("name", &self.name)
            .field("transport", &self.transport.id())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl PeerConnection {
    /// Introduce ourselves as `local_name` and wait for the remote's introduction
    ///
    /// The transport is closed when the remote does not introduce itself.
    pub async fn connect(
        local_name: &str,
        transport: Arc<dyn Transport>,
        config: PeerConfig,
    ) -> PeerResult<Arc<Self>> {
        match Self::introduce(local_name, transport.as_ref(), &config).await {
            Ok((name, inbound)) => Ok(Self::start(name, transport, inbound, config)),
            Err(e) => {
                if let Err(close_err) = transport.close().await {
                    warn!(transport = %transport.id(), "Failed to close transport: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn introduce(
        local_name: &str,
        transport: &dyn Transport,
        config: &PeerConfig,
    ) -> PeerResult<(String, MessageStream)> {
        let inbound = transport.receive().await?;
        transport.send(Message::introduction(local_name)).await?;

        debug!(transport = %transport.id(), "Waiting for introduction");
        let first = tokio::time::timeout(config.introduction_timeout, inbound.recv())
            .await
            .map_err(|_| PeerError::IntroductionTimeout)?
            .ok_or(PeerError::ConnectionClosed)?;

        if !first.is_introduction() {
            error!(
                transport = %transport.id(),
                "No introduction received, got {}", first.message_type
            );
            return Err(PeerError::MissingIntroduction {
                got: first.message_type,
            });
        }

        let name = String::from_utf8(first.body).map_err(|_| PeerError::InvalidName)?;
        if name.trim().is_empty() {
            return Err(PeerError::InvalidName);
        }
        Ok((name, inbound))
    }

    fn start(
        name: String,
        transport: Arc<dyn Transport>,
        inbound: MessageStream,
        config: PeerConfig,
    ) -> Arc<Self> {
        let (frames_tx, frames) = channel(config.channel_capacity);
        let (events_tx, app_events) = channel(config.channel_capacity);

        let peer = Arc::new(Self {
            name,
            transport,
            frames,
            app_events,
            closed: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
            callbacks: Mutex::new(Some(Vec::new())),
        });
        info!(peer = %peer.name, transport = %peer.transport.id(), "Peer introduced");

        tokio::spawn(peer.clone().classify(inbound, frames_tx, events_tx));
        if !config.ping_interval.is_zero() {
            tokio::spawn(peer.clone().ping(config.ping_interval));
        }
        peer
    }

    async fn classify(
        self: Arc<Self>,
        inbound: MessageStream,
        frames: Publisher<Message>,
        app_events: Publisher<AppEvent>,
    ) {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            match message.message_type {
                MessageType::Frame | MessageType::SessionOpened | MessageType::SessionClosed => {
                    if !frames.publish(message).await {
                        trace!(peer = %self.name, "Frames stream closed, dropping message");
                    }
                }
                MessageType::AppAdded | MessageType::AppWithdrawn | MessageType::AppConfirmed => {
                    match AppEvent::from_message(&message, &self.name) {
                        Ok(Some(event)) => {
                            if !app_events.publish(event).await {
                                trace!(peer = %self.name, "App events stream closed, dropping event");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(peer = %self.name, "Dropping malformed {}: {}", message.message_type, e);
                        }
                    }
                }
                MessageType::Ping => {
                    trace!(peer = %self.name, "Received ping");
                }
                MessageType::Disconnect => {
                    info!(peer = %self.name, "Peer requested disconnect");
                    break;
                }
                MessageType::Introduction | MessageType::RsaPing | MessageType::RsaPong => {
                    warn!(
                        peer = %self.name,
                        "Dropping unexpected {} message", message.message_type
                    );
                }
            }
        }

        debug!(peer = %self.name, "Receive loop ended");
        self.shutdown().await;
    }

    async fn ping(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.transport.send(Message::ping()).await {
                        warn!(peer = %self.name, "Ping failed, closing peer: {}", e);
                        self.shutdown().await;
                        break;
                    }
                }
            }
        }
        debug!(peer = %self.name, "Pinger stopped");
    }

    async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.frames.close();
        self.app_events.close();
        if let Err(e) = self.transport.close().await {
            debug!(peer = %self.name, "Transport close failed: {}", e);
        }

        let callbacks = self
            .callbacks
            .lock()
            .ok()
            .and_then(|mut callbacks| callbacks.take())
            .unwrap_or_default();
        for callback in callbacks {
            callback();
        }
        self.closed.cancel();
        info!(peer = %self.name, "Peer closed");
    }
}

#[async_trait]
impl Peer for PeerConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> PeerResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PeerError::Closed(self.name.clone()));
        }
        self.transport.send(message).await?;
        Ok(())
    }

    fn frames(&self) -> MessageStream {
        self.frames.clone()
    }

    fn app_events(&self) -> Subscription<AppEvent> {
        self.app_events.clone()
    }

    fn when_closed(&self, callback: CloseCallback) {
        let pending = match self.callbacks.lock() {
            Ok(mut callbacks) => match callbacks.as_mut() {
                Some(callbacks) => {
                    callbacks.push(callback);
                    None
                }
                None => Some(callback),
            },
            Err(_) => Some(callback),
        };
        if let Some(callback) = pending {
            callback();
        }
    }

    fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    async fn close(&self) -> PeerResult<()> {
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::AppEventKind;
    use burrow_transport::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    async fn connected() -> (Arc<PeerConnection>, Arc<PeerConnection>) {
        let (left, right) = MemoryTransport::pair();
        let (a, b) = tokio::join!(
            PeerConnection::connect("client", left, PeerConfig::default()),
            PeerConnection::connect("server", right, PeerConfig::default()),
        );
        (a.unwrap(), b.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_introduction_exchanges_names() {
        init_tracing();
        let (client, server) = connected().await;
        assert_eq!(client.name(), "server");
        assert_eq!(server.name(), "client");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_introduction_fails_and_closes_transport() {
        init_tracing();
        let (left, right) = MemoryTransport::pair();
        right.send(Message::ping()).await.unwrap();

        let result = PeerConnection::connect("client", left.clone(), PeerConfig::default()).await;
        assert!(matches!(
            result,
            Err(PeerError::MissingIntroduction {
                got: MessageType::Ping
            })
        ));
        assert!(left.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_introduction_timeout() {
        let (left, _right) = MemoryTransport::pair();
        let config = PeerConfig::default().with_introduction_timeout(Duration::from_secs(1));
        let result = PeerConnection::connect("client", left.clone(), config).await;
        assert!(matches!(result, Err(PeerError::IntroductionTimeout)));
        assert!(left.is_closed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_messages_are_classified() {
        init_tracing();
        let (client, server) = connected().await;

        client.send(Message::ping()).await.unwrap();
        client.send(Message::app_added("web", "10.0.0.5:80")).await.unwrap();
        client
            .send(Message::session_opened("abc", "web"))
            .await
            .unwrap();
        client
            .send(Message::frame("abc", b"hello".to_vec()).with_app_name("web"))
            .await
            .unwrap();
        client
            .send(Message::session_closed("abc", "web"))
            .await
            .unwrap();

        let frames = server.frames();
        let opened = timeout(Duration::from_secs(5), frames.recv()).await.unwrap().unwrap();
        assert!(opened.is_session_opened());
        let data = timeout(Duration::from_secs(5), frames.recv()).await.unwrap().unwrap();
        assert_eq!(data.body, b"hello");
        let closed = timeout(Duration::from_secs(5), frames.recv()).await.unwrap().unwrap();
        assert!(closed.is_session_closed());

        let event = timeout(Duration::from_secs(5), server.app_events().recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, AppEventKind::Added);
        assert_eq!(event.app.peer, "client");
        assert_eq!(event.app.address, "10.0.0.5:80");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disconnect_closes_streams_and_fires_callbacks_once() {
        init_tracing();
        let (client, server) = connected().await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        server.when_closed(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        client.send(Message::disconnect()).await.unwrap();

        let ended = timeout(Duration::from_secs(5), server.frames().recv())
            .await
            .unwrap();
        assert!(ended.is_none());
        assert!(timeout(Duration::from_secs(5), server.app_events().recv())
            .await
            .unwrap()
            .is_none());
        timeout(Duration::from_secs(5), server.closed().cancelled())
            .await
            .unwrap();

        server.close().await.unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let late = Arc::new(AtomicUsize::new(0));
        let late_counter = late.clone();
        server.when_closed(Box::new(move || {
            late_counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(late.load(Ordering::SeqCst), 1);
        assert!(server.send(Message::ping()).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_close_cascades() {
        init_tracing();
        let (client, server) = connected().await;
        client.close().await.unwrap();

        timeout(Duration::from_secs(5), server.closed().cancelled())
            .await
            .expect("server side should observe the closed transport");
        assert!(server.frames().recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pinger_sends_pings() {
        init_tracing();
        let (left, right) = MemoryTransport::pair();
        let mut wire = left.observe();
        let config = PeerConfig::default().with_ping_interval(Duration::from_millis(20));
        let (client, _server) = tokio::join!(
            PeerConnection::connect("client", left, config),
            PeerConnection::connect("server", right, PeerConfig::default()),
        );
        let _client = client.unwrap();

        let pinged = timeout(Duration::from_secs(5), async {
            while let Some(message) = wire.recv().await {
                if message.is_ping() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap();
        assert!(pinged);
    }
}
