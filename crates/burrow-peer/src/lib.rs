//! Peers: named endpoints of one transport
//!
//! A [`PeerConnection`] wraps a transport with the introduction handshake
//! (both sides send their name first) and then classifies every inbound
//! message into one of two streams:
//!
//! - **frames**: session payload and session lifecycle messages
//! - **app events**: apps added, withdrawn or confirmed by the remote peer
//!
//! [`PeerFactory`] implementations produce connected peers and compose as
//! adapters: [`UniquePeerFactory`] rejects duplicate names and
//! [`AutoCloseStreams`] closes a peer's streams when it goes away.

pub mod bridge;
pub mod connection;
pub mod error;
pub mod factory;
pub mod mock;
pub mod peer;

pub use bridge::{bridge, BridgeOutcome, DEFAULT_READ_BUFFER_SIZE};
pub use connection::{PeerConfig, PeerConnection};
pub use error::{PeerError, PeerResult};
pub use factory::{AutoCloseStreams, DefaultPeerFactory, UniquePeerFactory};
pub use mock::MockPeer;
pub use peer::{AppEvent, AppEventKind, CloseCallback, Peer, PeerFactory, PeerStream};
