//! Authentication errors

use burrow_proto::MessageType;
use burrow_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Expected {expected} during handshake, got {got}")]
    UnexpectedMessage {
        expected: MessageType,
        got: MessageType,
    },

    #[error("Connection closed during handshake")]
    ConnectionClosed,

    #[error("Handshake timed out")]
    Timeout,

    #[error("Invalid base64 payload: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("Key encoding error: {0}")]
    KeyEncoding(String),

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("Public key {fingerprint} is not trusted")]
    Untrusted { fingerprint: String },

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl From<AuthError> for TransportError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Transport(inner) => inner,
            other => TransportError::Encryption(other.to_string()),
        }
    }
}
