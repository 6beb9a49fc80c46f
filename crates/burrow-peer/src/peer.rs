//! The `Peer` capability set and the app events it produces

use crate::error::PeerResult;
use async_trait::async_trait;
use burrow_proto::{decode_app_declaration, App, CodecError, Message, MessageType};
use burrow_transport::{MessageStream, Subscription};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Cleanup registered with [`Peer::when_closed`]
pub type CloseCallback = Box<dyn FnOnce() + Send + 'static>;

/// Stream of connected peers produced by a [`PeerFactory`]
pub type PeerStream = Subscription<Arc<dyn Peer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEventKind {
    Added,
    Withdrawn,
    /// The remote side started serving an app we added
    Confirmed,
}

/// App declaration received from a remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEvent {
    pub kind: AppEventKind,
    /// `peer` is set to the remote peer name
    pub app: App,
}

impl AppEvent {
    /// Decode an app message. Returns `Ok(None)` for other message types.
    pub fn from_message(message: &Message, peer: &str) -> Result<Option<AppEvent>, CodecError> {
        let (kind, app) = match message.message_type {
            MessageType::AppAdded => {
                let (name, address) = decode_app_declaration(&message.body)?;
                (AppEventKind::Added, App::new(name, address))
            }
            MessageType::AppConfirmed => {
                let (name, address) = decode_app_declaration(&message.body)?;
                (AppEventKind::Confirmed, App::new(name, address))
            }
            MessageType::AppWithdrawn => {
                let name = std::str::from_utf8(&message.body)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                if name.is_empty() {
                    return Err(CodecError::MalformedAppDeclaration(String::new()));
                }
                (AppEventKind::Withdrawn, App::new(name, ""))
            }
            _ => return Ok(None),
        };
        Ok(Some(AppEvent {
            kind,
            app: app.with_peer(peer),
        }))
    }
}

/// A connected, introduced remote peer
#[async_trait]
pub trait Peer: Send + Sync {
    /// Remote peer name, as announced in its introduction
    fn name(&self) -> &str;

    async fn send(&self, message: Message) -> PeerResult<()>;

    /// Frames, `session-opened` and `session-closed` messages
    fn frames(&self) -> MessageStream;

    fn app_events(&self) -> Subscription<AppEvent>;

    /// Run `callback` once the peer is closed; immediately if it already is
    fn when_closed(&self, callback: CloseCallback);

    /// Cancelled once the peer is closed
    fn closed(&self) -> CancellationToken;

    async fn close(&self) -> PeerResult<()>;
}

/// Produces connected peers
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Start producing peers. May only be called once per factory.
    async fn peers(&self) -> PeerResult<PeerStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_events_from_messages() {
        let added = AppEvent::from_message(&Message::app_added("web", "10.0.0.5:80"), "edge")
            .unwrap()
            .unwrap();
        assert_eq!(added.kind, AppEventKind::Added);
        assert_eq!(added.app.name, "web");
        assert_eq!(added.app.address, "10.0.0.5:80");
        assert_eq!(added.app.peer, "edge");

        let withdrawn = AppEvent::from_message(&Message::app_withdrawn("web"), "edge")
            .unwrap()
            .unwrap();
        assert_eq!(withdrawn.kind, AppEventKind::Withdrawn);
        assert_eq!(withdrawn.app.name, "web");

        let confirmed =
            AppEvent::from_message(&Message::app_confirmed("web", "127.0.0.1:30001"), "srv")
                .unwrap()
                .unwrap();
        assert_eq!(confirmed.kind, AppEventKind::Confirmed);

        assert!(AppEvent::from_message(&Message::ping(), "edge")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_app_added_is_error() {
        let bad = Message::new(MessageType::AppAdded).with_body(b"no-comma".to_vec());
        assert!(AppEvent::from_message(&bad, "edge").is_err());
        let empty = Message::new(MessageType::AppWithdrawn);
        assert!(AppEvent::from_message(&empty, "edge").is_err());
    }
}
