use thiserror::Error;

/// Errors that can occur on a peer connection.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Transport I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Received an unknown opcode.
    #[error("invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// The transport was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// The outbound command queue was closed or full.
    #[error("send queue unavailable")]
    QueueClosed,
}
