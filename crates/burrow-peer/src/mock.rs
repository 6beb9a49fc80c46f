//! In-process peer for tests of the layers above

use crate::error::{PeerError, PeerResult};
use crate::peer::{AppEvent, CloseCallback, Peer};
use async_trait::async_trait;
use burrow_proto::Message;
use burrow_transport::{channel, MessageStream, Publisher, Subscription, DEFAULT_CHANNEL_CAPACITY};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

const OUTBOX_CAPACITY: usize = 4096;

/// Peer that records what is sent to it and replays injected traffic
pub struct MockPeer {
    name: String,
    outbox: Publisher<Message>,
    sent: MessageStream,
    frames_tx: Publisher<Message>,
    frames: MessageStream,
    app_events_tx: Publisher<AppEvent>,
    app_events: Subscription<AppEvent>,
    closed: CancellationToken,
    callbacks: Mutex<Option<Vec<CloseCallback>>>,
}

impl std::fmt::Debug for MockPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPeer")
            .field("name", &self.name)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl MockPeer {
    pub fn new(name: impl Into<String>) -> Self {
        let (outbox, sent) = channel(OUTBOX_CAPACITY);
        let (frames_tx, frames) = channel(DEFAULT_CHANNEL_CAPACITY);
        let (app_events_tx, app_events) = channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            outbox,
            sent,
            frames_tx,
            frames,
            app_events_tx,
            app_events,
            closed: CancellationToken::new(),
            callbacks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Messages passed to [`Peer::send`], in order
    pub fn sent(&self) -> MessageStream {
        self.sent.clone()
    }

    /// Deliver a message as if the remote side had sent a frame
    pub async fn push_frame(&self, message: Message) -> bool {
        self.frames_tx.publish(message).await
    }

    pub async fn push_app_event(&self, event: AppEvent) -> bool {
        self.app_events_tx.publish(event).await
    }

    /// End the frames stream, as a remote disconnect would
    pub fn end_frames(&self) {
        self.frames.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message) -> PeerResult<()> {
        if self.closed.is_cancelled() {
            return Err(PeerError::Closed(self.name.clone()));
        }
        if self.outbox.publish(message).await {
            Ok(())
        } else {
            Err(PeerError::Closed(self.name.clone()))
        }
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
        let callbacks = self
            .callbacks
            .lock()
            .ok()
            .and_then(|mut callbacks| callbacks.take());
        let Some(callbacks) = callbacks else {
            return Ok(());
        };

        self.frames.close();
        self.app_events.close();
        for callback in callbacks {
            callback();
        }
        self.closed.cancel();
        Ok(())
    }
}
