use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::rate::RateEstimator;
use super::sender::Command;
use crate::config::Backpressure;
use crate::pool::PeerId;

/// Protocol state of one peer session.
///
/// The choke, interest, done and stop handshakes are truly independent, so
/// they are kept as orthogonal booleans rather than one state enum.
#[derive(Debug, Clone)]
pub struct ConnState {
    /// The peer refuses to serve us.
    pub am_choked: bool,
    /// We want pieces the peer has.
    pub am_interested: bool,
    /// We refuse to serve the peer.
    pub peer_choked: bool,
    /// The peer wants pieces we have.
    pub peer_interested: bool,
    /// The peer has advertised at least one piece.
    pub peer_has_pieces: bool,
    /// We announced local completion on this connection.
    pub done_sent: bool,
    /// The peer announced completion.
    pub peer_done: bool,
    /// We sent our half of the final stop exchange.
    pub stop_sent: bool,
    /// The peer sent its half of the final stop exchange.
    pub peer_stopped: bool,
    /// The link failed; the connection no longer participates.
    pub dead: bool,
    pub pieces_sent: u64,
    pub pieces_received: u64,
}

impl Default for ConnState {
    fn default() -> Self {
        Self {
            am_choked: true,
            am_interested: false,
            peer_choked: true,
            peer_interested: false,
            peer_has_pieces: false,
            done_sent: false,
            peer_done: false,
            stop_sent: false,
            peer_stopped: false,
            dead: false,
            pieces_sent: 0,
            pieces_received: 0,
        }
    }
}

impl ConnState {
    /// Both stop halves have been exchanged (or the link died).
    pub fn drained(&self) -> bool {
        self.dead || (self.stop_sent && self.peer_stopped)
    }
}

/// Shared handle to one peer connection: its protocol flags, transfer-rate
/// estimators, cancelled-piece set and outbound command queue.
pub struct PeerHandle {
    pub id: PeerId,
    pub state: Mutex<ConnState>,
    /// Piece sends to silently drop if still queued.
    pub cancelled: Mutex<HashSet<u32>>,
    /// Bytes received from the peer.
    pub down_rate: Mutex<RateEstimator>,
    /// Bytes sent to the peer.
    pub up_rate: Mutex<RateEstimator>,
    outbound: mpsc::Sender<Command>,
}

impl PeerHandle {
    pub fn new(id: PeerId, outbound: mpsc::Sender<Command>, rate_window: Duration) -> Self {
        Self {
            id,
            state: Mutex::new(ConnState::default()),
            cancelled: Mutex::new(HashSet::new()),
            down_rate: Mutex::new(RateEstimator::new(rate_window)),
            up_rate: Mutex::new(RateEstimator::new(rate_window)),
            outbound,
        }
    }

    /// Resets all per-operation state at the start of a distribution.
    pub fn reset(&self) {
        *self.state.lock() = ConnState::default();
        self.cancelled.lock().clear();
        self.down_rate.lock().reset();
        self.up_rate.lock().reset();
    }

    /// Queues an outbound command, honoring the backpressure policy: piece
    /// payloads may be dropped under `Drop`, everything else waits for room.
    pub async fn enqueue(&self, cmd: Command, policy: Backpressure) {
        match (policy, &cmd) {
            (Backpressure::Drop, Command::SendPiece(_)) => {
                if self.outbound.try_send(cmd).is_err() {
                    warn!(peer = %self.id, "send queue full, dropping piece payload");
                }
            }
            _ => {
                if self.outbound.send(cmd).await.is_err() {
                    debug!(peer = %self.id, "send queue closed");
                }
            }
        }
    }
}
