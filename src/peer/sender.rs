use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::connection::PeerHandle;
use super::message::Message;
use super::transport::MessageWriter;
use crate::storage::SharedStorage;

/// Commands drained by a connection's sender worker.
pub enum Command {
    /// Encode and send a protocol message as-is.
    Send(Message),
    /// Read the piece payload from storage at drain time and send it;
    /// silently skipped if the index was cancelled first.
    SendPiece(u32),
    /// Barrier: acknowledge once every earlier command has been drained.
    Flush(oneshot::Sender<()>),
    /// Stop the worker.
    Close,
}

/// Drains one connection's outbound command queue into its writer.
///
/// Single consumer; protocol logic, the choking scheduler and arrival
/// callbacks all produce into the same queue.
pub async fn run_sender<W: AsyncWrite + Unpin>(
    peer: Arc<PeerHandle>,
    mut queue: mpsc::Receiver<Command>,
    mut writer: MessageWriter<W>,
    storage: SharedStorage,
) {
    while let Some(cmd) = queue.recv().await {
        match cmd {
            Command::Send(message) => {
                if let Err(e) = writer.send(&message).await {
                    debug!(peer = %peer.id, error = %e, "send failed, sender stopping");
                    peer.state.lock().dead = true;
                    break;
                }
            }
            Command::SendPiece(index) => {
                if peer.cancelled.lock().remove(&index) {
                    trace!(peer = %peer.id, index, "piece send cancelled before drain");
                    continue;
                }
                let Some(storage) = storage.lock().clone() else {
                    continue;
                };
                let payload = match storage.read_piece(index) {
                    Ok(payload) => payload,
                    Err(e) => {
                        // Expected when a cancel raced the request.
                        warn!(peer = %peer.id, index, error = %e, "piece unavailable, request unserviced");
                        continue;
                    }
                };
                let bytes = payload.len();
                if let Err(e) = writer.send(&Message::Piece { index, payload }).await {
                    debug!(peer = %peer.id, error = %e, "piece send failed, sender stopping");
                    peer.state.lock().dead = true;
                    break;
                }
                peer.up_rate.lock().record(bytes);
                peer.state.lock().pieces_sent += 1;
            }
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Close => break,
        }
    }
}
