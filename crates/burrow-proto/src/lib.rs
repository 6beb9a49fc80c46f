//! Burrow Protocol Definitions
//!
//! This crate defines the wire envelope exchanged between peers, the
//! closed set of message types, the JSON codec used on the wire and the
//! `App` value describing an exposed network endpoint.

pub mod app;
pub mod codec;
pub mod messages;

pub use app::App;
pub use codec::{decode_app_declaration, CodecError, MessageCodec};
pub use messages::{Message, MessageType};

/// Path of the WebSocket endpoint carrying the data plane
pub const DATA_EXCHANGE_PATH: &str = "/data";
