//! WebSocket transport implementation using tokio-tungstenite
//!
//! Every binary WebSocket frame carries exactly one serialized
//! [`burrow_proto::Message`] (JSON envelope, base64 body). The server side
//! accepts upgrades on a single path, `/data` by default, and answers any
//! other path with 404.
//!
//! Each connection runs one writer task, which serializes all sends, and
//! one reader task, started lazily by the first `receive()`, which decodes
//! inbound frames into the receive stream.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::WebSocketConfig;
pub use connection::WebSocketTransport;
pub use listener::{WebSocketConnector, WebSocketListener, WebSocketTransportFactory};
