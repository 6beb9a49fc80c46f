//! Integration tests for the WebSocket transport
//!
//! Both ends run over real TCP sockets on the loopback interface.

use burrow_proto::{Message, MessageCodec};
use burrow_transport::{Transport, TransportFactory};
use burrow_transport_websocket::{
    WebSocketConfig, WebSocketConnector, WebSocketListener, WebSocketTransportFactory,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

async fn connected_pair() -> (Arc<dyn Transport>, Arc<dyn Transport>) {
    let config = Arc::new(WebSocketConfig::default());
    let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), config.clone())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let factory = WebSocketTransportFactory::new(listener);
    let accepted = factory.transports().await.unwrap();

    let connector = WebSocketConnector::new(config).unwrap();
    let client = connector
        .connect(&format!("ws://{}", addr))
        .await
        .expect("client should connect");

    let server = timeout(Duration::from_secs(5), accepted.recv())
        .await
        .expect("server should accept in time")
        .expect("accept stream should stay open");

    (server, Arc::new(client))
}

#[tokio::test(flavor = "multi_thread")]
async fn test_messages_flow_both_ways() {
    init_tracing();
    let (server, client) = connected_pair().await;

    client.send(Message::introduction("client")).await.unwrap();
    server.send(Message::introduction("server")).await.unwrap();

    let at_server = timeout(Duration::from_secs(5), server.receive().await.unwrap().recv())
        .await
        .unwrap()
        .unwrap();
    let at_client = timeout(Duration::from_secs(5), client.receive().await.unwrap().recv())
        .await
        .unwrap()
        .unwrap();

    assert!(at_server.is_introduction());
    assert_eq!(at_server.body_string(), "client");
    assert_eq!(at_client.body_string(), "server");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_payload_and_order_preserved() {
    init_tracing();
    let (server, client) = connected_pair().await;
    let stream = server.receive().await.unwrap();

    let big: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
    client
        .send(Message::frame("s1", big.clone()).with_app_name("web"))
        .await
        .unwrap();
    for i in 0..50u32 {
        client
            .send(Message::frame("s1", i.to_be_bytes().to_vec()))
            .await
            .unwrap();
    }

    let first = timeout(Duration::from_secs(10), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.app_name, "web");
    assert_eq!(first.body, big);

    for i in 0..50u32 {
        let msg = timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.body, i.to_be_bytes().to_vec());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_ends_remote_stream() {
    init_tracing();
    let (server, client) = connected_pair().await;
    let server_stream = server.receive().await.unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap();

    let ended = timeout(Duration::from_secs(5), server_stream.recv())
        .await
        .expect("server stream should end after client close");
    assert!(ended.is_none());
    assert!(client.send(Message::ping()).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_path_is_rejected() {
    init_tracing();
    let config = Arc::new(WebSocketConfig::default());
    let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let factory = WebSocketTransportFactory::new(listener);
    let accepted = factory.transports().await.unwrap();

    let wrong = WebSocketConnector::new(Arc::new(WebSocketConfig::default().with_path("/admin")))
        .unwrap();
    let result = wrong.connect(&format!("ws://{}", addr)).await;
    assert!(result.is_err());

    let nothing = timeout(Duration::from_millis(200), accepted.recv()).await;
    assert!(nothing.is_err(), "rejected upgrade must not surface a transport");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undecodable_frames_are_dropped_and_text_frames_accepted() {
    init_tracing();
    let listener = WebSocketListener::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(WebSocketConfig::default()),
    )
    .await
    .unwrap();
    let url = format!("ws://{}/data", listener.local_addr().unwrap());

    let (accepted, connected) =
        tokio::join!(listener.accept(), tokio_tungstenite::connect_async(url));
    let (server, _) = accepted.unwrap();
    let (mut raw, _) = connected.unwrap();
    let stream = server.receive().await.unwrap();

    raw.send(WsMessage::Binary(br#"{"type":"teleport"}"#.to_vec()))
        .await
        .unwrap();
    raw.send(WsMessage::Binary(b"not json at all".to_vec()))
        .await
        .unwrap();
    let valid = MessageCodec::encode(&Message::frame("s1", b"after".to_vec())).unwrap();
    raw.send(WsMessage::Text(String::from_utf8(valid).unwrap()))
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(5), stream.recv())
        .await
        .expect("valid message should arrive")
        .expect("stream should stay open");
    assert!(received.is_frame());
    assert_eq!(received.body, b"after");
    assert!(!server.is_closed());

    server.send(Message::ping()).await.unwrap();
    let reply = timeout(Duration::from_secs(5), raw.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let decoded = MessageCodec::decode(&reply.into_data()).unwrap();
    assert!(decoded.is_ping());
}
