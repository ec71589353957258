use thiserror::Error;

use crate::peer::PeerError;
use crate::storage::StorageError;

/// Errors surfaced by the public channel interface.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport failure on a peer link.
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),

    /// Local storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A precondition on the call was violated; nothing was started.
    #[error("configuration error: {0}")]
    Config(String),

    /// A peer link failed while a distribution depended on it.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The completion wait exceeded the configured liveness timeout.
    #[error("distribution did not complete within the liveness timeout")]
    Timeout,

    /// The channel has been closed.
    #[error("channel closed")]
    Closed,
}
