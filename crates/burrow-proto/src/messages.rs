//! Protocol message types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of message types understood by peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Application payload for one session
    #[serde(rename = "data")]
    Frame,
    #[serde(rename = "introduction")]
    Introduction,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "app-added")]
    AppAdded,
    #[serde(rename = "app-withdrawn")]
    AppWithdrawn,
    #[serde(rename = "app-confirmed")]
    AppConfirmed,
    #[serde(rename = "session-opened")]
    SessionOpened,
    #[serde(rename = "session-closed")]
    SessionClosed,
    #[serde(rename = "disconnect")]
    Disconnect,
    /// Handshake: initiator's public key
    #[serde(rename = "RSA-PING")]
    RsaPing,
    /// Handshake: encrypted session secret
    #[serde(rename = "RSA-PONG")]
    RsaPong,
}

impl MessageType {
    /// Tag used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Frame => "data",
            MessageType::Introduction => "introduction",
            MessageType::Ping => "ping",
            MessageType::AppAdded => "app-added",
            MessageType::AppWithdrawn => "app-withdrawn",
            MessageType::AppConfirmed => "app-confirmed",
            MessageType::SessionOpened => "session-opened",
            MessageType::SessionClosed => "session-closed",
            MessageType::Disconnect => "disconnect",
            MessageType::RsaPing => "RSA-PING",
            MessageType::RsaPong => "RSA-PONG",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire-level envelope exchanged between peers
///
/// Frames always carry a non-empty `session_id`. Control messages use `body`
/// for a type-specific payload and usually leave `session_id` empty.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("session_id", &self.session_id)
            .field("app_name", &self.app_name)
            .field("type", &self.message_type)
            .field("body_len", &self.body.len())
            .finish()
    }
}

impl Message {
    pub fn new(message_type: MessageType) -> Self {
        Self {
            session_id: String::new(),
            app_name: String::new(),
            message_type,
            body: Vec::new(),
        }
    }

    /// Announces the local peer name, first message on every connection
    pub fn introduction(name: impl Into<String>) -> Self {
        Self::new(MessageType::Introduction).with_body(name.into().into_bytes())
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping)
    }

    /// Application payload for `session_id`
    pub fn frame(session_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::new(MessageType::Frame)
        }
        .with_body(data)
    }

    pub fn app_added(name: &str, address: &str) -> Self {
        Self::new(MessageType::AppAdded).with_body(encode_app_declaration(name, address))
    }

    pub fn app_withdrawn(name: impl Into<String>) -> Self {
        Self::new(MessageType::AppWithdrawn).with_body(name.into().into_bytes())
    }

    /// Server's answer to `app-added`, carrying the address it listens on
    pub fn app_confirmed(name: &str, address: &str) -> Self {
        Self::new(MessageType::AppConfirmed).with_body(encode_app_declaration(name, address))
    }

    pub fn session_opened(session_id: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::new(MessageType::SessionOpened)
        }
        .with_app_name(app_name)
    }

    pub fn session_closed(session_id: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::new(MessageType::SessionClosed)
        }
        .with_app_name(app_name)
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }

    /// Handshake opener, `encoded_key` is the textual public key encoding
    pub fn rsa_ping(encoded_key: impl Into<String>) -> Self {
        Self::new(MessageType::RsaPing).with_body(encoded_key.into().into_bytes())
    }

    /// Handshake reply, `encoded_ciphertext` is the textual encrypted secret
    pub fn rsa_pong(encoded_ciphertext: impl Into<String>) -> Self {
        Self::new(MessageType::RsaPong).with_body(encoded_ciphertext.into().into_bytes())
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Body interpreted as UTF-8 text, lossy
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_frame(&self) -> bool {
        self.message_type == MessageType::Frame
    }

    pub fn is_introduction(&self) -> bool {
        self.message_type == MessageType::Introduction
    }

    pub fn is_ping(&self) -> bool {
        self.message_type == MessageType::Ping
    }

    pub fn is_app_added(&self) -> bool {
        self.message_type == MessageType::AppAdded
    }

    pub fn is_app_withdrawn(&self) -> bool {
        self.message_type == MessageType::AppWithdrawn
    }

    pub fn is_app_confirmed(&self) -> bool {
        self.message_type == MessageType::AppConfirmed
    }

    pub fn is_session_opened(&self) -> bool {
        self.message_type == MessageType::SessionOpened
    }

    pub fn is_session_closed(&self) -> bool {
        self.message_type == MessageType::SessionClosed
    }

    pub fn is_disconnect(&self) -> bool {
        self.message_type == MessageType::Disconnect
    }

    pub fn is_rsa_ping(&self) -> bool {
        self.message_type == MessageType::RsaPing
    }

    pub fn is_rsa_pong(&self) -> bool {
        self.message_type == MessageType::RsaPong
    }

    /// Frames and session lifecycle notifications
    pub fn is_session_scoped(&self) -> bool {
        self.is_frame() || self.is_session_opened() || self.is_session_closed()
    }
}

fn encode_app_declaration(name: &str, address: &str) -> Vec<u8> {
    format!("{},{}", name, address).into_bytes()
}

mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [MessageType; 11] = [
        MessageType::Frame,
        MessageType::Introduction,
        MessageType::Ping,
        MessageType::AppAdded,
        MessageType::AppWithdrawn,
        MessageType::AppConfirmed,
        MessageType::SessionOpened,
        MessageType::SessionClosed,
        MessageType::Disconnect,
        MessageType::RsaPing,
        MessageType::RsaPong,
    ];

    fn predicates(msg: &Message) -> [bool; 11] {
        [
            msg.is_frame(),
            msg.is_introduction(),
            msg.is_ping(),
            msg.is_app_added(),
            msg.is_app_withdrawn(),
            msg.is_app_confirmed(),
            msg.is_session_opened(),
            msg.is_session_closed(),
            msg.is_disconnect(),
            msg.is_rsa_ping(),
            msg.is_rsa_pong(),
        ]
    }

    #[test]
    fn test_predicates_are_exclusive_and_total() {
        for message_type in ALL_TYPES {
            let msg = Message::new(message_type);
            let matched = predicates(&msg).iter().filter(|p| **p).count();
            assert_eq!(matched, 1, "{} matched {} predicates", message_type, matched);
        }
    }

    #[test]
    fn test_frame_carries_session_id() {
        let msg = Message::frame("abc123", b"payload".to_vec());
        assert!(msg.is_frame());
        assert!(msg.is_session_scoped());
        assert_eq!(msg.session_id, "abc123");
        assert_eq!(msg.body, b"payload");
    }

    #[test]
    fn test_control_constructors() {
        assert_eq!(Message::introduction("peer-a").body_string(), "peer-a");
        assert_eq!(
            Message::app_added("web", "10.0.0.5:80").body_string(),
            "web,10.0.0.5:80"
        );
        assert_eq!(Message::app_withdrawn("web").body_string(), "web");
        assert!(Message::ping().body.is_empty());

        let opened = Message::session_opened("s1", "web");
        assert_eq!(opened.session_id, "s1");
        assert_eq!(opened.app_name, "web");
        assert!(opened.body.is_empty());
        assert!(opened.is_session_scoped());
        assert!(!Message::app_withdrawn("web").is_session_scoped());
    }

    #[test]
    fn test_wire_tags() {
        let json = serde_json::to_string(&Message::rsa_ping("key")).unwrap();
        assert!(json.contains("\"type\":\"RSA-PING\""));

        let json = serde_json::to_string(&Message::frame("s", vec![0xff, 0x00])).unwrap();
        assert!(json.contains("\"type\":\"data\""));
        assert!(json.contains("\"body\":\"/wA=\""));
    }

    #[test]
    fn test_debug_hides_body() {
        let msg = Message::frame("s", vec![1, 2, 3]);
        let debug = format!("{:?}", msg);
        assert!(debug.contains("body_len: 3"));
    }
}
