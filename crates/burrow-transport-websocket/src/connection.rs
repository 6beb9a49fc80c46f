//! WebSocket transport carrying one message per binary frame

use async_trait::async_trait;
use burrow_proto::{Message, MessageCodec};
use burrow_transport::{
    channel, MessageStream, Publisher, Transport, TransportError, TransportResult,
};
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::WebSocketConfig;

type WsSource = BoxStream<'static, Result<WsMessage, WsError>>;

struct WriteRequest {
    message: Message,
    done: oneshot::Sender<TransportResult<()>>,
}

/// Transport over an established WebSocket connection
pub struct WebSocketTransport {
    inner: Arc<Inner>,
}

struct Inner {
    connection_id: String,
    remote: String,
    inbound_capacity: usize,
    write_tx: mpsc::Sender<WriteRequest>,
    /// Read half, handed to the reader task on the first `receive()`
    source: Mutex<Option<WsSource>>,
    inbound: Mutex<Option<MessageStream>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connection_id", &self.inner.connection_id)
            .field("remote", &self.inner.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WebSocketTransport {
    /// Wrap an established WebSocket stream and spawn its writer task
    pub fn new<S>(
        ws_stream: WebSocketStream<S>,
        remote: impl Into<String>,
        config: &WebSocketConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection_id = format!("ws-{}", uuid::Uuid::new_v4());
        let (sink, source) = ws_stream.split();
        let (write_tx, write_rx) = mpsc::channel(config.write_queue_capacity.max(1));

        let inner = Arc::new(Inner {
            connection_id,
            remote: remote.into(),
            inbound_capacity: config.inbound_capacity,
            write_tx,
            source: Mutex::new(Some(source.boxed())),
            inbound: Mutex::new(None),
            reader: Mutex::new(None),
            shutdown: CancellationToken::new(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        });

        let writer_inner = inner.clone();
        tokio::spawn(async move {
            Self::writer_task(sink, write_rx, writer_inner).await;
        });

        debug!(
            "[{}] WebSocket transport established with {}",
            inner.connection_id, inner.remote
        );
        Self { inner }
    }

    pub fn remote(&self) -> &str {
        &self.inner.remote
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Total bytes written and read on the socket, in that order
    pub fn traffic(&self) -> (u64, u64) {
        (
            self.inner.bytes_sent.load(Ordering::Relaxed),
            self.inner.bytes_received.load(Ordering::Relaxed),
        )
    }

    /// Writer task - the only task that touches the sink
    async fn writer_task<S>(
        mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
        mut rx: mpsc::Receiver<WriteRequest>,
        inner: Arc<Inner>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        loop {
            let request = tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let frame = match MessageCodec::encode(&request.message) {
                Ok(frame) => frame,
                Err(e) => {
                    let _ = request.done.send(Err(e.into()));
                    continue;
                }
            };

            let len = frame.len() as u64;
            match sink.send(WsMessage::Binary(frame)).await {
                Ok(()) => {
                    inner.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    let _ = request.done.send(Ok(()));
                }
                Err(e) => {
                    error!("[{}] WebSocket send error: {}", inner.connection_id, e);
                    let _ = request
                        .done
                        .send(Err(TransportError::ConnectionError(e.to_string())));
                    inner.shutdown();
                    break;
                }
            }
        }

        debug!("[{}] WebSocket writer task ended", inner.connection_id);
        let _ = sink.close().await;
    }

    /// Reader task - decodes frames into the receive stream
    async fn reader_task(inner: Arc<Inner>, mut source: WsSource, publisher: Publisher<Message>) {
        loop {
            let next = tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                next = source.next() => next,
            };

            let data = match next {
                Some(Ok(WsMessage::Binary(data))) => data,
                Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                Some(Ok(WsMessage::Ping(_))) => {
                    // Pong is automatically handled by tungstenite
                    trace!("[{}] Received ping", inner.connection_id);
                    continue;
                }
                Some(Ok(WsMessage::Pong(_))) => {
                    trace!("[{}] Received pong", inner.connection_id);
                    continue;
                }
                Some(Ok(WsMessage::Close(_))) => {
                    debug!("[{}] WebSocket close received", inner.connection_id);
                    break;
                }
                Some(Ok(WsMessage::Frame(_))) => continue,
                Some(Err(e)) => {
                    error!("[{}] WebSocket read error: {}", inner.connection_id, e);
                    break;
                }
                None => {
                    debug!("[{}] WebSocket stream ended", inner.connection_id);
                    break;
                }
            };

            inner
                .bytes_received
                .fetch_add(data.len() as u64, Ordering::Relaxed);

            match MessageCodec::decode(&data) {
                Ok(message) => {
                    trace!(
                        "[{}] Received {} ({} bytes)",
                        inner.connection_id,
                        message.message_type,
                        data.len()
                    );
                    if !publisher.publish(message).await {
                        debug!("[{}] Receive stream closed", inner.connection_id);
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        "[{}] Dropping undecodable message: {}",
                        inner.connection_id, e
                    );
                }
            }
        }

        debug!("[{}] WebSocket reader task ended", inner.connection_id);
        inner.shutdown();
    }
}

impl Inner {
    /// Stop both tasks and close the receive stream
    fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(inbound) = self.inbound.lock() {
            if let Some(stream) = inbound.as_ref() {
                stream.close();
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: Message) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }

        let (done, result) = oneshot::channel();
        self.inner
            .write_tx
            .send(WriteRequest { message, done })
            .await
            .map_err(|_| TransportError::ConnectionClosed)?;

        result.await.map_err(|_| TransportError::ConnectionClosed)?
    }

    async fn receive(&self) -> TransportResult<MessageStream> {
        let mut inbound = self
            .inner
            .inbound
            .lock()
            .map_err(|_| TransportError::ProtocolError("inbound lock poisoned".to_string()))?;
        if let Some(stream) = inbound.as_ref() {
            return Ok(stream.clone());
        }

        let (publisher, stream) = channel(self.inner.inbound_capacity);
        let source = self.inner.source.lock().ok().and_then(|mut s| s.take());
        match source {
            Some(source) if !self.is_closed() => {
                let reader_inner = self.inner.clone();
                let handle = tokio::spawn(async move {
                    Self::reader_task(reader_inner, source, publisher).await;
                });
                if let Ok(mut reader) = self.inner.reader.lock() {
                    *reader = Some(handle);
                }
            }
            _ => stream.close(),
        }

        *inbound = Some(stream.clone());
        Ok(stream)
    }

    async fn close(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        debug!("[{}] Closing WebSocket transport", self.inner.connection_id);
        self.inner.shutdown();
        if let Ok(mut reader) = self.inner.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
        Ok(())
    }

    fn id(&self) -> &str {
        &self.inner.connection_id
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}
