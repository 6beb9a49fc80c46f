use burrow_proto::MessageType;
use burrow_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Expected introduction as first message, got {got}")]
    MissingIntroduction { got: MessageType },

    #[error("Remote peer sent an invalid name")]
    InvalidName,

    #[error("Timed out waiting for introduction")]
    IntroductionTimeout,

    #[error("Connection closed before introduction")]
    ConnectionClosed,

    #[error("Peer {0} is closed")]
    Closed(String),
}

pub type PeerResult<T> = Result<T, PeerError>;
