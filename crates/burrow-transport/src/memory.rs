//! In-process transports
//!
//! Used to wire components back-to-back without sockets, and to observe
//! exactly what a transport puts on the "wire".

use crate::{
    channel, Publisher, Subscription, Transport, TransportError, TransportFactory,
    TransportResult, TransportStream, MessageStream, DEFAULT_CHANNEL_CAPACITY,
};
use async_trait::async_trait;
use burrow_proto::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One end of an in-process transport pair
pub struct MemoryTransport {
    id: String,
    outbound: Publisher<Message>,
    inbound: MessageStream,
    remote_inbound: MessageStream,
    observers: Mutex<Vec<mpsc::UnboundedSender<Message>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl MemoryTransport {
    /// Two transports connected back-to-back
    pub fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        Self::pair_with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn pair_with_capacity(capacity: usize) -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        let (to_left, left_inbound) = channel(capacity);
        let (to_right, right_inbound) = channel(capacity);
        let pair_id = uuid::Uuid::new_v4().simple().to_string();

        let left = MemoryTransport {
            id: format!("mem-{}-l", &pair_id[..8]),
            outbound: to_right,
            inbound: left_inbound.clone(),
            remote_inbound: right_inbound.clone(),
            observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        let right = MemoryTransport {
            id: format!("mem-{}-r", &pair_id[..8]),
            outbound: to_left,
            inbound: right_inbound,
            remote_inbound: left_inbound,
            observers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        (Arc::new(left), Arc::new(right))
    }

    /// Tap every message this transport sends, before delivery
    pub fn observe(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut observers) = self.observers.lock() {
            observers.push(tx);
        }
        rx
    }

    /// Closed locally, or hung up by the other end
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.inbound.is_closed()
    }

    fn notify_observers(&self, message: &Message) {
        if let Ok(mut observers) = self.observers.lock() {
            observers.retain(|observer| observer.send(message.clone()).is_ok());
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Message) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        trace!("[{}] Sending {}", self.id, message.message_type);
        self.notify_observers(&message);
        if self.outbound.publish(message).await {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    async fn receive(&self) -> TransportResult<MessageStream> {
        Ok(self.inbound.clone())
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("[{}] Memory transport closed", self.id);
        self.inbound.close();
        self.remote_inbound.close();
        Ok(())
    }

    fn id(&self) -> &str {
        &self.id
    }
}

/// Factory publishing transports handed to it through a [`Publisher`]
pub struct ChannelTransportFactory {
    transports: Mutex<Option<TransportStream>>,
}

impl ChannelTransportFactory {
    pub fn with_publisher() -> (Publisher<Arc<dyn Transport>>, Self) {
        let (publisher, subscription) = channel(DEFAULT_CHANNEL_CAPACITY);
        (
            publisher,
            Self {
                transports: Mutex::new(Some(subscription)),
            },
        )
    }
}

#[async_trait]
impl TransportFactory for ChannelTransportFactory {
    async fn transports(&self) -> TransportResult<Subscription<Arc<dyn Transport>>> {
        self.transports
            .lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(TransportError::AlreadySubscribed)
    }
}
