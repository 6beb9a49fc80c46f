//! Per-session demultiplexing of a peer's frame stream
//!
//! One [`PacketRouter`] serves one peer. A background task reads the peer's
//! frames and drops every `data` message into the mailbox of its session.
//! Mailboxes are opened by session handlers through [`PacketRouter::get`],
//! before the remote side learns the session id. Frames for a session that
//! has no open mailbox are logged and dropped, so a remote cannot make the
//! router hold buffers nobody reads.
//!
//! When the upstream frame stream ends, every remaining mailbox is closed and
//! removed; this is how session handlers learn that the tunnel is gone.

use burrow_proto::{Message, MessageType};
use burrow_transport::{channel, MessageStream, Publisher, DEFAULT_CHANNEL_CAPACITY};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Inbound frames of one session
pub type Mailbox = MessageStream;

/// Finished session ids remembered so late frames are not routed
const TOMBSTONE_LIMIT: usize = 4096;

#[derive(Default)]
struct Tombstones {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Tombstones {
    fn insert(&mut self, session_id: &str) {
        if !self.ids.insert(session_id.to_string()) {
            return;
        }
        self.order.push_back(session_id.to_string());
        while self.order.len() > TOMBSTONE_LIMIT {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, session_id: &str) -> bool {
        self.ids.contains(session_id)
    }
}

/// Routes one peer's frames into per-session mailboxes
pub struct PacketRouter {
    mailboxes: DashMap<String, (Publisher<Message>, Mailbox)>,
    tombstones: Mutex<Tombstones>,
    capacity: usize,
    closed: CancellationToken,
}

impl std::fmt::Debug for PacketRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRouter")
            .field("mailboxes", &self.mailboxes.len())
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl PacketRouter {
    /// Start routing `frames`
    pub fn new(frames: MessageStream) -> Arc<Self> {
        Self::with_capacity(frames, DEFAULT_CHANNEL_CAPACITY)
    }

    /// Start routing `frames` with `capacity` buffered frames per mailbox
    pub fn with_capacity(frames: MessageStream, capacity: usize) -> Arc<Self> {
        let router = Arc::new(Self {
            mailboxes: DashMap::new(),
            tombstones: Mutex::new(Tombstones::default()),
            capacity,
            closed: CancellationToken::new(),
        });
        tokio::spawn(router.clone().dispatch(frames));
        router
    }

    /// Mailbox of `session_id`, created on first access
    ///
    /// Once the upstream stream has ended this returns an already closed
    /// mailbox and registers nothing.
    pub fn get(&self, session_id: &str) -> Mailbox {
        self.entry(session_id)
            .map(|(_, mailbox)| mailbox)
            .unwrap_or_else(closed_mailbox)
    }

    /// Close and forget the mailbox of `session_id`. Safe to call repeatedly.
    pub fn done(&self, session_id: &str) {
        if let Ok(mut tombstones) = self.tombstones.lock() {
            tombstones.insert(session_id);
        }
        if let Some((_, (publisher, _))) = self.mailboxes.remove(session_id) {
            publisher.close();
            debug!(session_id = %session_id, "Session mailbox closed");
        }
    }

    /// Number of live mailboxes
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    /// Cancelled once the upstream frame stream has ended
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn entry(&self, session_id: &str) -> Option<(Publisher<Message>, Mailbox)> {
        if self.closed.is_cancelled() {
            return None;
        }

        let entry = self
            .mailboxes
            .entry(session_id.to_string())
            .or_insert_with(|| channel(self.capacity))
            .value()
            .clone();

        // Raced with the final purge
        if self.closed.is_cancelled() {
            if let Some((_, (publisher, _))) = self.mailboxes.remove(session_id) {
                publisher.close();
            }
            return None;
        }
        Some(entry)
    }

    fn is_finished(&self, session_id: &str) -> bool {
        self.tombstones
            .lock()
            .map(|tombstones| tombstones.contains(session_id))
            .unwrap_or(false)
    }

    async fn dispatch(self: Arc<Self>, frames: MessageStream) {
        while let Some(message) = frames.recv().await {
            match message.message_type {
                MessageType::Frame => self.route(message).await,
                MessageType::SessionClosed => {
                    debug!(session_id = %message.session_id, "Remote closed session");
                    self.done(&message.session_id);
                }
                MessageType::Ping => {}
                other => {
                    warn!(
                        session_id = %message.session_id,
                        "Protocol error: {} message reached the packet router", other
                    );
                }
            }
        }

        debug!("Frame stream ended, purging {} mailboxes", self.mailboxes.len());
        self.closed.cancel();
        let session_ids: Vec<String> = self
            .mailboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for session_id in session_ids {
            if let Some((_, (publisher, _))) = self.mailboxes.remove(&session_id) {
                publisher.close();
            }
        }
    }

    async fn route(&self, message: Message) {
        if message.session_id.is_empty() {
            warn!("Dropping frame without session id");
            return;
        }
        if self.is_finished(&message.session_id) {
            debug!(session_id = %message.session_id, "Dropping frame for finished session");
            return;
        }

        let session_id = message.session_id.clone();
        let publisher = self
            .mailboxes
            .get(&session_id)
            .map(|entry| entry.value().0.clone());
        match publisher {
            Some(publisher) => {
                if !publisher.publish(message).await {
                    trace!(session_id = %session_id, "Mailbox closed, dropping frame");
                }
            }
            None => warn!(session_id = %session_id, "Dropping frame for unknown session"),
        }
    }
}

fn closed_mailbox() -> Mailbox {
    let (_, mailbox) = channel(1);
    mailbox.close();
    mailbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn test_frames_are_routed_in_order() {
        init_tracing();
        let (upstream, frames) = channel(64);
        let router = PacketRouter::new(frames);
        let a = router.get("a");
        let b = router.get("b");

        for i in 0..10u8 {
            upstream.publish(Message::frame("a", vec![i])).await;
            upstream.publish(Message::frame("b", vec![100 + i])).await;
        }

        for i in 0..10u8 {
            let frame = timeout(Duration::from_secs(5), a.recv()).await.unwrap().unwrap();
            assert_eq!(frame.body, vec![i]);
            let frame = timeout(Duration::from_secs(5), b.recv()).await.unwrap().unwrap();
            assert_eq!(frame.body, vec![100 + i]);
        }
        assert_eq!(router.len(), 2);
    }

    #[tokio::test]
    async fn test_get_is_idempotent() {
        let (_upstream, frames) = channel(8);
        let router = PacketRouter::new(frames);

        let first = router.get("s1");
        let second = router.get("s1");
        assert_eq!(router.len(), 1);

        router.done("s1");
        assert!(first.is_closed());
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn test_upstream_close_purges_every_mailbox() {
        init_tracing();
        let (upstream, frames) = channel(8);
        let router = PacketRouter::new(frames);
        let mailboxes: Vec<Mailbox> = (0..5).map(|i| router.get(&format!("s{}", i))).collect();
        assert_eq!(router.len(), 5);

        upstream.close();

        wait_until(|| mailboxes.iter().all(|m| m.is_closed())).await;
        wait_until(|| router.is_empty()).await;
        assert!(router.closed().is_cancelled());

        let late = router.get("s9");
        assert!(late.is_closed());
        assert!(late.recv().await.is_none());
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_done_twice_is_a_noop() {
        let (_upstream, frames) = channel(8);
        let router = PacketRouter::new(frames);
        let mailbox = router.get("s1");

        router.done("s1");
        router.done("s1");
        router.done("never-existed");

        assert!(mailbox.is_closed());
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_remote_session_close_tears_down_and_late_frames_are_dropped() {
        init_tracing();
        let (upstream, frames) = channel(8);
        let router = PacketRouter::new(frames);
        let mailbox = router.get("s1");
        let other = router.get("s2");

        upstream.publish(Message::frame("s1", b"one".to_vec())).await;
        upstream.publish(Message::session_closed("s1", "web")).await;
        upstream.publish(Message::frame("s1", b"late".to_vec())).await;
        upstream.publish(Message::frame("s2", b"other".to_vec())).await;

        let frame = timeout(Duration::from_secs(5), other.recv()).await.unwrap().unwrap();
        assert_eq!(frame.body, b"other");

        assert_eq!(mailbox.recv().await.unwrap().body, b"one");
        assert!(mailbox.recv().await.is_none());
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn test_non_frame_messages_are_not_routed() {
        init_tracing();
        let (upstream, frames) = channel(8);
        let router = PacketRouter::new(frames);
        let mailbox = router.get("s1");

        upstream.publish(Message::ping()).await;
        upstream.publish(Message::app_added("web", "1.2.3.4:80")).await;
        upstream.publish(Message::frame("", b"orphan".to_vec())).await;
        upstream.publish(Message::frame("s1", b"real".to_vec())).await;

        let frame = timeout(Duration::from_secs(5), mailbox.recv()).await.unwrap().unwrap();
        assert_eq!(frame.body, b"real");
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn test_frames_for_unknown_sessions_do_not_open_mailboxes() {
        init_tracing();
        let (upstream, frames) = channel(64);
        let router = PacketRouter::new(frames);
        let real = router.get("real");

        for i in 0..500 {
            upstream
                .publish(Message::frame(format!("ghost-{}", i), b"x".to_vec()))
                .await;
        }
        upstream.publish(Message::frame("real", b"ok".to_vec())).await;

        let frame = timeout(Duration::from_secs(5), real.recv()).await.unwrap().unwrap();
        assert_eq!(frame.body, b"ok");
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn test_flood_for_one_unknown_session_does_not_stall_others() {
        init_tracing();
        let (upstream, frames) = channel(64);
        let router = PacketRouter::with_capacity(frames, 4);
        let real = router.get("real");

        for _ in 0..300 {
            upstream.publish(Message::frame("ghost", b"x".to_vec())).await;
        }
        upstream.publish(Message::frame("real", b"ok".to_vec())).await;

        let frame = timeout(Duration::from_secs(5), real.recv()).await.unwrap().unwrap();
        assert_eq!(frame.body, b"ok");
        assert_eq!(router.len(), 1);
    }
}
