//! Shared, closable receive streams
//!
//! A [`Subscription`] is a cloneable handle over a single bounded queue.
//! All clones observe the same logical stream, each item is delivered to
//! exactly one `recv` caller. Closing a subscription releases every task
//! blocked in `recv` once the items already buffered are drained, and makes
//! publishers give up instead of waiting for capacity that will never free.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Create a bounded publisher/subscription pair
pub fn channel<T>(capacity: usize) -> (Publisher<T>, Subscription<T>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    (
        Publisher {
            sender,
            closed: closed.clone(),
        },
        Subscription {
            receiver: Arc::new(Mutex::new(receiver)),
            closed,
        },
    )
}

/// Receiving side of a [`channel`]
pub struct Subscription<T> {
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    closed: CancellationToken,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the stream is closed and drained or every
    /// publisher is gone.
    pub async fn recv(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            item = receiver.recv() => return item,
            _ = self.closed.cancelled() => {}
        }
        receiver.try_recv().ok()
    }

    /// Close the stream. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`Subscription::close`] was called on any clone
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the stream is closed
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Sending side of a [`channel`]
pub struct Publisher<T> {
    sender: mpsc::Sender<T>,
    closed: CancellationToken,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            closed: self.closed.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Publisher<T> {
    /// Deliver an item, waiting for capacity.
    ///
    /// Returns `false` when the subscription was closed or dropped; the item
    /// is discarded in that case.
    pub async fn publish(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.sender.send(item) => sent.is_ok(),
        }
    }

    /// Deliver an item without waiting. Returns `false` when the queue is
    /// full or the subscription is gone.
    pub fn try_publish(&self, item: T) -> bool {
        !self.is_closed() && self.sender.try_send(item).is_ok()
    }

    /// Close the paired subscription
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.sender.is_closed()
    }
}
