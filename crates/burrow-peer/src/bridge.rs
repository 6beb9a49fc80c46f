//! Socket to peer bridging for one session
//!
//! Both the server (accepted connections) and the client (dialed app
//! connections) run the same loop pair: frames from the session mailbox are
//! written to the socket, bytes read from the socket are sent to the peer as
//! frames tagged with the session id and app name. The session is torn down
//! as a whole; a local EOF ends it even if the remote still has data.

use crate::peer::Peer;
use burrow_proto::{Message, MessageType};
use burrow_transport::MessageStream;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// How a bridged session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The local socket reached EOF
    LocalClosed,
    /// The session mailbox closed (remote `session-closed` or peer gone)
    RemoteClosed,
    /// Reading or writing the local socket failed
    LocalError,
    /// Sending to the peer failed
    PeerError,
}

impl BridgeOutcome {
    /// Whether the remote side still needs a `session-closed`
    pub fn notifies_remote(&self) -> bool {
        matches!(self, BridgeOutcome::LocalClosed | BridgeOutcome::LocalError)
    }
}

/// Bridge `socket` and `peer` until either side ends the session
pub async fn bridge<S>(
    peer: &dyn Peer,
    session_id: &str,
    app_name: &str,
    inbound: MessageStream,
    socket: S,
    read_buffer_size: usize,
) -> BridgeOutcome
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(socket);
    let stop = CancellationToken::new();

    let to_socket = async {
        let mut outcome = None;
        while let Some(message) = inbound.recv().await {
            match message.message_type {
                MessageType::Frame => {
                    if let Err(e) = writer.write_all(&message.body).await {
                        debug!(session_id = %session_id, "Failed to write to socket: {}", e);
                        outcome = Some(BridgeOutcome::LocalError);
                        break;
                    }
                }
                MessageType::Ping => {}
                other => {
                    warn!(session_id = %session_id, "Ignoring {} in session mailbox", other);
                }
            }
        }
        let _ = writer.shutdown().await;
        stop.cancel();
        outcome
    };

    let from_socket = async {
        let mut buffer = vec![0u8; read_buffer_size.max(1)];
        let outcome = loop {
            let read = tokio::select! {
                _ = stop.cancelled() => break None,
                read = reader.read(&mut buffer) => read,
            };
            match read {
                Ok(0) => break Some(BridgeOutcome::LocalClosed),
                Ok(n) => {
                    trace!(session_id = %session_id, "Read {} bytes from socket", n);
                    let frame =
                        Message::frame(session_id, buffer[..n].to_vec()).with_app_name(app_name);
                    if let Err(e) = peer.send(frame).await {
                        debug!(session_id = %session_id, "Failed to send frame to peer: {}", e);
                        break Some(BridgeOutcome::PeerError);
                    }
                }
                Err(e) => {
                    debug!(session_id = %session_id, "Failed to read from socket: {}", e);
                    break Some(BridgeOutcome::LocalError);
                }
            }
        };
        inbound.close();
        outcome
    };

    let (written, read) = tokio::join!(to_socket, from_socket);
    let outcome = read.or(written).unwrap_or(BridgeOutcome::RemoteClosed);

    if outcome.notifies_remote() {
        if let Err(e) = peer.send(Message::session_closed(session_id, app_name)).await {
            debug!(session_id = %session_id, "Failed to notify session close: {}", e);
        }
    }
    debug!(
        session_id = %session_id,
        app = %app_name,
        peer = %peer.name(),
        "Session ended: {:?}", outcome
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPeer;
    use burrow_transport::channel;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways_until_local_eof() {
        init_tracing();
        let peer = Arc::new(MockPeer::new("remote"));
        let (mailbox, inbound) = channel(16);
        let (socket, mut local) = tokio::io::duplex(1024);

        let session = {
            let peer = peer.clone();
            tokio::spawn(async move {
                bridge(peer.as_ref(), "s1", "web", inbound, socket, 8).await
            })
        };

        mailbox.publish(Message::ping()).await;
        mailbox
            .publish(Message::frame("s1", b"HTTP/1.1 200 OK\r\n".to_vec()))
            .await;
        let mut response = vec![0u8; 17];
        local.read_exact(&mut response).await.unwrap();
        assert_eq!(&response, b"HTTP/1.1 200 OK\r\n");

        local.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        local.shutdown().await.unwrap();
        drop(local);

        let outcome = timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::LocalClosed);

        let sent = peer.sent();
        let mut forwarded = Vec::new();
        loop {
            let message = sent.recv().await.unwrap();
            if message.is_session_closed() {
                assert_eq!(message.session_id, "s1");
                assert_eq!(message.app_name, "web");
                break;
            }
            assert_eq!(message.app_name, "web");
            forwarded.extend_from_slice(&message.body);
        }
        assert_eq!(forwarded, b"GET / HTTP/1.1\r\n");
    }

    #[tokio::test]
    async fn test_mailbox_close_ends_session_without_notification() {
        init_tracing();
        let peer = Arc::new(MockPeer::new("remote"));
        let (mailbox, inbound) = channel(16);
        let (socket, mut local) = tokio::io::duplex(1024);

        let session = {
            let peer = peer.clone();
            tokio::spawn(async move {
                bridge(
                    peer.as_ref(),
                    "s2",
                    "db",
                    inbound,
                    socket,
                    DEFAULT_READ_BUFFER_SIZE,
                )
                .await
            })
        };

        mailbox.close();
        let outcome = timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::RemoteClosed);

        let mut rest = Vec::new();
        local.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(timeout(Duration::from_millis(50), peer.sent().recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_peer_failure_is_reported() {
        init_tracing();
        let peer = Arc::new(MockPeer::new("remote"));
        peer.close().await.unwrap();
        let (_mailbox, inbound) = channel(16);
        let (socket, mut local) = tokio::io::duplex(1024);

        let session = {
            let peer = peer.clone();
            tokio::spawn(async move {
                bridge(peer.as_ref(), "s3", "web", inbound, socket, 1024).await
            })
        };
        local.write_all(b"data").await.unwrap();

        let outcome = timeout(Duration::from_secs(5), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::PeerError);
    }
}
