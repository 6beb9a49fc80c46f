//! Transport abstraction layer for peer connections
//!
//! A transport is a duplex channel of [`Message`]s between two peers. The
//! data plane only relies on the three operations of [`Transport`], so the
//! concrete medium (WebSocket, in-process channels) and decorators such as
//! the authenticated transport are interchangeable.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │          Peers, router, server and client exposers       │
//! └─────────────────────────────────────────────────────────┘
//!                           │ Transport / TransportFactory
//!                           ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │     burrow-auth: AuthenticatedTransport (decorator)      │
//! └─────────────────────────────────────────────────────────┘
//!                           │ Transport
//!                           ↓
//! ┌────────────────────────────┬────────────────────────────┐
//! │ burrow-transport-websocket │ MemoryTransport (in-proc)  │
//! └────────────────────────────┴────────────────────────────┘
//! ```

use async_trait::async_trait;
use burrow_proto::{CodecError, Message};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod subscription;

pub use memory::{ChannelTransportFactory, MemoryTransport};
pub use subscription::{channel, Publisher, Subscription};

/// Default capacity of message queues between tasks
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Stream of inbound messages returned by [`Transport::receive`]
pub type MessageStream = Subscription<Message>;

/// Stream of freshly connected transports
pub type TransportStream = Subscription<Arc<dyn Transport>>;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Failed to bind to {address}:{port}: {reason}")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Transport stream already subscribed")]
    AlreadySubscribed,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Duplex channel of messages between two peers
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message. Sends from concurrent callers are serialized.
    async fn send(&self, message: Message) -> TransportResult<()>;

    /// Inbound message stream
    ///
    /// Idempotent: every call returns a handle to the same logical stream.
    /// The receive loop starts on the first call.
    async fn receive(&self) -> TransportResult<MessageStream>;

    /// Close the transport and every receive stream. Idempotent.
    async fn close(&self) -> TransportResult<()>;

    /// Identifier used in logs
    fn id(&self) -> &str;
}

/// Produces newly connected transports, e.g. from a listening socket
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Start producing transports. May only be called once per factory.
    async fn transports(&self) -> TransportResult<TransportStream>;
}
