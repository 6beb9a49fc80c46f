use burrow_peer::PeerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid app definition `{definition}`: {reason}")]
    InvalidAppDefinition { definition: String, reason: String },
}

pub type ClientResult<T> = Result<T, ClientError>;
