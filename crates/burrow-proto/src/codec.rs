//! JSON envelope codec used on the wire

use crate::messages::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed message envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Malformed app declaration: {0:?}")]
    MalformedAppDeclaration(String),

    #[error("Body is not valid UTF-8")]
    InvalidUtf8,
}

/// Serializes messages as a JSON envelope with a base64 body
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Decode one envelope. Malformed JSON, bad base64 and unknown
    /// message types all surface as `CodecError::Envelope`.
    pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Split an `app-added`/`app-confirmed` body into `(name, address)`
///
/// The address may itself contain commas; only the first one separates.
pub fn decode_app_declaration(body: &[u8]) -> Result<(String, String), CodecError> {
    let text = std::str::from_utf8(body).map_err(|_| CodecError::InvalidUtf8)?;
    match text.split_once(',') {
        Some((name, address)) if !name.is_empty() => Ok((name.to_string(), address.to_string())),
        _ => Err(CodecError::MalformedAppDeclaration(text.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageType;

    #[test]
    fn test_encode_decode_binary_frame() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let msg = Message::frame("sess01", payload.clone()).with_app_name("web");

        let encoded = MessageCodec::encode(&msg).unwrap();
        let decoded = MessageCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.body, payload);
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let result = MessageCodec::decode(b"{not json");
        assert!(matches!(result, Err(CodecError::Envelope(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_base64() {
        let raw = br#"{"session_id":"s","app_name":"","type":"data","body":"!!!not-base64"}"#;
        assert!(MessageCodec::decode(raw).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = br#"{"session_id":"","app_name":"","type":"teleport","body":""}"#;
        assert!(MessageCodec::decode(raw).is_err());
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let decoded = MessageCodec::decode(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(decoded.message_type, MessageType::Ping);
        assert!(decoded.session_id.is_empty());
        assert!(decoded.body.is_empty());
    }

    #[test]
    fn test_app_declaration() {
        let msg = Message::app_added("web", "10.0.0.5:80");
        let (name, address) = decode_app_declaration(&msg.body).unwrap();
        assert_eq!(name, "web");
        assert_eq!(address, "10.0.0.5:80");
    }

    #[test]
    fn test_app_declaration_without_comma_is_error() {
        assert!(matches!(
            decode_app_declaration(b"web"),
            Err(CodecError::MalformedAppDeclaration(_))
        ));
        assert!(decode_app_declaration(&[0xff, 0xfe]).is_err());
    }
}
