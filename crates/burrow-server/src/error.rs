use burrow_peer::PeerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Peer error: {0}")]
    Peer(#[from] PeerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port allocation failed: {0}")]
    PortAllocation(String),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using the port range\n  • Try a different app host or port range")]
    BindError { address: String, reason: String },
}

pub type ServerResult<T> = Result<T, ServerError>;
