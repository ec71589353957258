//! The public distribution façade.
//!
//! A [`Channel`] owns one [`Admin`] per operation plus the set of peer
//! connections, and exposes `multicast_storage`/`flush`/`close`. Each
//! connection runs two tasks (one receiver, one sender-queue worker) and a
//! channel-wide timer task drives the choking scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::admin::{Admin, Mob, Outbox, Plain, Robber, Strategy};
use crate::config::{Backpressure, Config};
use crate::error::ChannelError;
use crate::peer::{
    plan_unchokes, run_sender, Command, Link, Message, MessageReader, MessageWriter, PeerError,
    PeerHandle, PeerView,
};
use crate::piece::PieceIndexSet;
use crate::pool::{PeerId, Pool};
use crate::storage::{SharedStorage, Storage};

/// Which interest-selection strategy a channel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Flat piece exchange across the whole pool.
    #[default]
    Plain,
    /// Cross-cluster work stealing with explicit desire messages.
    Robber,
    /// Statically-partitioned cross-cluster shares.
    Mob,
}

#[derive(Debug, Clone, PartialEq)]
enum OpStatus {
    Idle,
    Running,
    Complete,
    Failed(String),
}

struct Shared {
    local: PeerId,
    pool: Pool,
    config: Config,
    kind: StrategyKind,
    peers: HashMap<PeerId, Arc<PeerHandle>>,
    admin: Mutex<Option<Admin>>,
    storage: SharedStorage,
    status_tx: watch::Sender<OpStatus>,
    /// Wakes the choking scheduler out of turn when interest flips.
    choke_kick: Notify,
    /// Signals done/stop progress to flush waiters.
    conn_changed: Notify,
    first_round: AtomicBool,
}

impl Shared {
    fn set_status(&self, status: OpStatus) {
        self.status_tx.send_replace(status);
    }

    fn fail(&self, reason: String) {
        if matches!(&*self.status_tx.borrow(), OpStatus::Running) {
            warn!(local = %self.local, %reason, "distribution failed");
            self.set_status(OpStatus::Failed(reason));
        }
    }

    fn make_strategy(&self) -> Box<dyn Strategy> {
        match self.kind {
            StrategyKind::Plain => Box::new(Plain),
            StrategyKind::Robber => Box::new(Robber::new(
                self.config.steal_fraction,
                self.config.balance_booty,
            )),
            StrategyKind::Mob => Box::new(Mob::default()),
        }
    }

    /// Parks until an operation is active, so a faster peer's opening
    /// traffic is held rather than dropped.
    async fn wait_not_idle(&self) {
        let mut rx = self.status_tx.subscribe();
        while matches!(*rx.borrow_and_update(), OpStatus::Idle) {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A distribution channel over one set of peer links.
///
/// At most one distribution is in flight per channel; a second call
/// implicitly flushes the first. Must be created inside a tokio runtime.
pub struct Channel {
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
    /// Serializes multicast/flush/close against each other.
    op_gate: tokio::sync::Mutex<()>,
    closed: bool,
}

impl Channel {
    /// Builds a channel from established links, one per distribution-capable
    /// peer pair. Fails fast on topology errors before any traffic moves.
    pub fn new<L: Link>(
        local: impl Into<PeerId>,
        pool: Pool,
        kind: StrategyKind,
        links: Vec<(PeerId, L)>,
        config: Config,
    ) -> Result<Self, ChannelError> {
        let local = local.into();
        if !pool.contains(&local) {
            return Err(ChannelError::Config(format!(
                "local node {local} is not a pool member"
            )));
        }

        let mut peers = HashMap::new();
        let mut pending = Vec::new();
        for (id, link) in links {
            if id == local {
                return Err(ChannelError::Config("link to self".into()));
            }
            if !pool.contains(&id) {
                return Err(ChannelError::Config(format!(
                    "linked peer {id} is not a pool member"
                )));
            }
            let (queue_tx, queue_rx) = mpsc::channel(config.send_queue_capacity.max(1));
            let handle = Arc::new(PeerHandle::new(id.clone(), queue_tx, config.rate_window));
            if peers.insert(id, handle.clone()).is_some() {
                return Err(ChannelError::Config(format!(
                    "duplicate link to {}",
                    handle.id
                )));
            }
            let (read_half, write_half) = tokio::io::split(link);
            pending.push((handle, queue_rx, read_half, write_half));
        }

        let (status_tx, _) = watch::channel(OpStatus::Idle);
        let shared = Arc::new(Shared {
            local,
            pool,
            config,
            kind,
            peers,
            admin: Mutex::new(None),
            storage: Arc::new(Mutex::new(None)),
            status_tx,
            choke_kick: Notify::new(),
            conn_changed: Notify::new(),
            first_round: AtomicBool::new(true),
        });

        let mut tasks = Vec::new();
        for (handle, queue_rx, read_half, write_half) in pending {
            tasks.push(tokio::spawn(run_sender(
                handle.clone(),
                queue_rx,
                MessageWriter::new(write_half),
                shared.storage.clone(),
            )));
            tasks.push(tokio::spawn(run_receiver(
                shared.clone(),
                handle,
                MessageReader::new(read_half),
            )));
        }
        tasks.push(tokio::spawn(run_choker(shared.clone())));

        Ok(Self {
            shared,
            tasks,
            op_gate: tokio::sync::Mutex::new(()),
            closed: false,
        })
    }

    /// Distributes `storage` from the given roots to every linked peer,
    /// returning once this node's possession covers the full piece range.
    ///
    /// The local possession starts full when this node is a root and empty
    /// otherwise. A fresh admin is created per call, so a retried call never
    /// inherits partial state.
    pub async fn multicast_storage(
        &self,
        storage: Arc<dyn Storage>,
        roots: &[PeerId],
    ) -> Result<(), ChannelError> {
        let _gate = self.op_gate.lock().await;
        if self.closed {
            return Err(ChannelError::Closed);
        }
        if !matches!(&*self.shared.status_tx.borrow(), OpStatus::Idle) {
            self.flush_inner().await?;
        }

        if roots.is_empty() {
            return Err(ChannelError::Config("empty root set".into()));
        }
        for root in roots {
            if !self.shared.pool.contains(root) {
                return Err(ChannelError::Config(format!(
                    "root {root} is not a pool member"
                )));
            }
        }
        let total = storage.piece_count();
        if total == 0 {
            return Err(ChannelError::Config("storage has no pieces".into()));
        }

        let possession = if roots.contains(&self.shared.local) {
            PieceIndexSet::full(total)
        } else {
            PieceIndexSet::new()
        };
        *self.shared.storage.lock() = Some(storage);
        for handle in self.shared.peers.values() {
            handle.reset();
        }
        self.shared.first_round.store(true, Ordering::Relaxed);

        let mut admin = Admin::new(
            self.shared.local.clone(),
            self.shared.pool.clone(),
            self.shared.peers.keys().cloned().collect(),
            total,
            possession,
            self.shared.make_strategy(),
            self.shared.config.endgame,
        );
        let complete_at_start = admin.is_complete();
        let mut greetings = Vec::new();
        for id in self.shared.peers.keys() {
            greetings.push((id.clone(), admin.greeting(id)));
        }
        *self.shared.admin.lock() = Some(admin);
        self.shared.set_status(OpStatus::Running);

        let policy = self.shared.config.backpressure;
        for (id, messages) in greetings {
            let handle = &self.shared.peers[&id];
            for message in messages {
                handle.enqueue(Command::Send(message), policy).await;
            }
            if complete_at_start {
                handle.state.lock().done_sent = true;
                handle.enqueue(Command::Send(Message::Done), policy).await;
            }
        }
        self.shared.choke_kick.notify_one();

        if complete_at_start {
            self.shared.set_status(OpStatus::Complete);
            return Ok(());
        }
        self.wait_complete().await
    }

    async fn wait_complete(&self) -> Result<(), ChannelError> {
        let mut rx = self.shared.status_tx.subscribe();
        let deadline = self
            .shared
            .config
            .completion_timeout
            .map(|t| tokio::time::Instant::now() + t);
        loop {
            match rx.borrow_and_update().clone() {
                OpStatus::Complete => return Ok(()),
                OpStatus::Failed(reason) => return Err(ChannelError::Transport(reason)),
                _ => {}
            }
            let changed = match deadline {
                Some(at) => match tokio::time::timeout_at(at, rx.changed()).await {
                    Ok(changed) => changed,
                    Err(_) => return Err(ChannelError::Timeout),
                },
                None => rx.changed().await,
            };
            if changed.is_err() {
                return Err(ChannelError::Closed);
            }
        }
    }

    /// Blocks until every peer finished receiving and all connections of the
    /// current round are fully drained.
    pub async fn flush(&self) -> Result<(), ChannelError> {
        let _gate = self.op_gate.lock().await;
        self.flush_inner().await
    }

    async fn flush_inner(&self) -> Result<(), ChannelError> {
        if matches!(&*self.shared.status_tx.borrow(), OpStatus::Idle) {
            return Ok(());
        }
        let deadline = self
            .shared
            .config
            .completion_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            let changed = self.shared.conn_changed.notified();
            if self
                .shared
                .peers
                .values()
                .all(|handle| handle.state.lock().drained())
            {
                break;
            }
            match deadline {
                Some(at) => {
                    if tokio::time::timeout_at(at, changed).await.is_err() {
                        return Err(ChannelError::Timeout);
                    }
                }
                None => changed.await,
            }
        }

        // One in-flight barrier per queue: a no-op command acknowledged once
        // everything queued before it has drained.
        for handle in self.shared.peers.values() {
            let (ack_tx, ack_rx) = oneshot::channel();
            handle
                .enqueue(Command::Flush(ack_tx), Backpressure::Block)
                .await;
            let _ = ack_rx.await;
        }

        *self.shared.storage.lock() = None;
        self.shared.set_status(OpStatus::Idle);
        Ok(())
    }

    /// Flushes if needed, then terminates the channel's tasks.
    pub async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush().await;
        for handle in self.shared.peers.values() {
            handle.enqueue(Command::Close, Backpressure::Block).await;
        }
        for task in &self.tasks {
            task.abort();
        }
        self.closed = true;
        flushed
    }

    /// Snapshot of the current possession set.
    pub fn possession(&self) -> PieceIndexSet {
        self.shared
            .admin
            .lock()
            .as_ref()
            .map(|admin| admin.core().possession.clone())
            .unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        self.shared
            .admin
            .lock()
            .as_ref()
            .map(Admin::is_complete)
            .unwrap_or(false)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_receiver<R>(shared: Arc<Shared>, peer: Arc<PeerHandle>, mut reader: MessageReader<R>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        match reader.receive().await {
            Ok(message) => handle_message(&shared, &peer, message).await,
            // The frame was consumed whole, so skipping it is safe.
            Err(PeerError::InvalidOpcode(opcode)) => {
                warn!(peer = %peer.id, opcode, "ignoring message with unknown opcode");
            }
            Err(error) => {
                let drained = peer.state.lock().drained();
                peer.state.lock().dead = true;
                shared.conn_changed.notify_waiters();
                if drained {
                    debug!(peer = %peer.id, "connection closed");
                } else {
                    if let Some(admin) = shared.admin.lock().as_mut() {
                        admin.drop_peer(&peer.id);
                    }
                    shared.fail(format!("link to {} failed: {error}", peer.id));
                }
                return;
            }
        }
    }
}

async fn handle_message(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, message: Message) {
    shared.wait_not_idle().await;
    let policy = shared.config.backpressure;

    match message {
        Message::Choke => {
            peer.state.lock().am_choked = true;
        }
        Message::Unchoke => {
            peer.state.lock().am_choked = false;
            request_pass(shared, peer).await;
        }
        Message::Interested => {
            peer.state.lock().peer_interested = true;
            shared.choke_kick.notify_one();
        }
        Message::NotInterested => {
            peer.state.lock().peer_interested = false;
            shared.choke_kick.notify_one();
        }
        Message::Have { index } => {
            let mut set = PieceIndexSet::new();
            set.insert(index);
            existence_update(shared, peer, set).await;
        }
        Message::Bitfield(set) => {
            if !set.is_empty() {
                peer.state.lock().peer_has_pieces = true;
            }
            existence_update(shared, peer, set).await;
        }
        Message::Request { index } => {
            let serving = !peer.state.lock().peer_choked;
            if !serving {
                debug!(peer = %peer.id, index, "request while choked, ignoring");
                return;
            }
            let owned = shared
                .admin
                .lock()
                .as_ref()
                .map(|admin| admin.owns(index))
                .unwrap_or(false);
            if !owned {
                warn!(peer = %peer.id, index, "request for unowned piece, unserviced");
                return;
            }
            peer.cancelled.lock().remove(&index);
            peer.enqueue(Command::SendPiece(index), policy).await;
        }
        Message::Piece { index, payload } => {
            handle_piece(shared, peer, index, payload).await;
        }
        Message::Cancel { index } => {
            peer.cancelled.lock().insert(index);
        }
        Message::Done => {
            let send_stop = {
                let mut state = peer.state.lock();
                state.peer_done = true;
                if state.done_sent && !state.stop_sent {
                    state.stop_sent = true;
                    true
                } else {
                    false
                }
            };
            if send_stop {
                peer.enqueue(Command::Send(Message::Stop), policy).await;
            }
            shared.conn_changed.notify_waiters();
        }
        Message::Stop => {
            peer.state.lock().peer_stopped = true;
            shared.conn_changed.notify_waiters();
        }
        control @ (Message::Desire(_)
        | Message::Steal { .. }
        | Message::Work(_)
        | Message::FoundWork) => {
            let outbox = {
                let mut guard = shared.admin.lock();
                let Some(admin) = guard.as_mut() else { return };
                admin.control(&peer.id, control)
            };
            dispatch(shared, outbox).await;
            // Control traffic can change what is requestable anywhere, and
            // won booty can restore wants at peers that hold us choked.
            for handle in shared.peers.values() {
                sync_interest(shared, handle).await;
                let choked = handle.state.lock().am_choked;
                if !choked {
                    request_pass(shared, handle).await;
                }
            }
        }
    }
}

async fn existence_update(shared: &Arc<Shared>, peer: &Arc<PeerHandle>, set: PieceIndexSet) {
    let outbox = {
        let mut guard = shared.admin.lock();
        let Some(admin) = guard.as_mut() else { return };
        let (_, out) = admin.record_existence(&peer.id, &set);
        out
    };
    dispatch(shared, outbox).await;
    sync_interest(shared, peer).await;

    let choked = peer.state.lock().am_choked;
    if !choked {
        request_pass(shared, peer).await;
    }
}

/// Aligns the interested flag with what is still wanted from `peer`
/// (end-game re-request candidates included), emitting the flip on
/// transitions only. Runs even while the peer keeps us choked, since the
/// flip is what earns the unchoke.
async fn sync_interest(shared: &Arc<Shared>, peer: &Arc<PeerHandle>) {
    let wanted = {
        let guard = shared.admin.lock();
        let Some(admin) = guard.as_ref() else { return };
        admin.wants_anything_from(&peer.id)
    };
    let flip = {
        let mut state = peer.state.lock();
        if state.dead || state.stop_sent || state.am_interested == wanted {
            None
        } else {
            state.am_interested = wanted;
            Some(wanted)
        }
    };
    let message = match flip {
        Some(true) => Message::Interested,
        Some(false) => Message::NotInterested,
        None => return,
    };
    peer.enqueue(Command::Send(message), shared.config.backpressure)
        .await;
}

/// Issues requests to `peer` up to the credit window, or withdraws interest
/// when the window has room but nothing is requestable.
async fn request_pass(shared: &Arc<Shared>, peer: &Arc<PeerHandle>) {
    {
        let state = peer.state.lock();
        if state.am_choked || state.stop_sent || state.dead {
            return;
        }
    }
    let (picks, outbox, endgame_started) = {
        let mut guard = shared.admin.lock();
        let Some(admin) = guard.as_mut() else { return };
        let window = shared
            .config
            .max_pending_requests
            .saturating_sub(admin.pending_count(&peer.id));
        if window == 0 {
            return;
        }
        let was_endgame = admin.in_endgame();
        let (picks, outbox) = admin.pick_pieces(&peer.id, window);
        (picks, outbox, !was_endgame && admin.in_endgame())
    };
    dispatch(shared, outbox).await;

    if picks.is_empty() {
        let withdraw = {
            let mut state = peer.state.lock();
            if state.am_interested {
                state.am_interested = false;
                true
            } else {
                false
            }
        };
        if withdraw {
            peer.enqueue(
                Command::Send(Message::NotInterested),
                shared.config.backpressure,
            )
            .await;
        }
    } else {
        // Interest may have been withdrawn earlier; the flip must precede
        // the requests on the wire.
        let announce = {
            let mut state = peer.state.lock();
            if !state.am_interested {
                state.am_interested = true;
                true
            } else {
                false
            }
        };
        if announce {
            peer.enqueue(Command::Send(Message::Interested), shared.config.backpressure)
                .await;
        }
        for index in picks {
            peer.enqueue(
                Command::Send(Message::Request { index }),
                shared.config.backpressure,
            )
            .await;
        }
    }

    // End-game just opened re-request candidates at peers that never earned
    // a want edge; tell them, even the ones still choking us.
    if endgame_started {
        for handle in shared.peers.values() {
            if handle.id != peer.id {
                sync_interest(shared, handle).await;
            }
        }
    }
}

async fn handle_piece(
    shared: &Arc<Shared>,
    peer: &Arc<PeerHandle>,
    index: u32,
    payload: bytes::Bytes,
) {
    let bytes = payload.len();
    let Some(storage) = shared.storage.lock().clone() else {
        return;
    };
    if let Err(error) = storage.write_piece(index, payload) {
        shared.fail(format!("storing piece {index} failed: {error}"));
        return;
    }
    peer.down_rate.lock().record(bytes);
    peer.state.lock().pieces_received += 1;

    let (became_complete, outbox) = {
        let mut guard = shared.admin.lock();
        let Some(admin) = guard.as_mut() else { return };
        admin.piece_received(&peer.id, index)
    };
    dispatch(shared, outbox).await;

    if became_complete {
        announce_completion(shared).await;
    }
    request_pass(shared, peer).await;
}

/// Sends `done` (exactly once per connection) on local completion, plus
/// `stop` where the peer's own `done` already arrived.
async fn announce_completion(shared: &Arc<Shared>) {
    let policy = shared.config.backpressure;
    for handle in shared.peers.values() {
        let (send_done, send_stop) = {
            let mut state = handle.state.lock();
            if state.dead {
                (false, false)
            } else {
                let done = if !state.done_sent {
                    state.done_sent = true;
                    true
                } else {
                    false
                };
                let stop = if state.peer_done && !state.stop_sent {
                    state.stop_sent = true;
                    true
                } else {
                    false
                };
                (done, stop)
            }
        };
        if send_done {
            handle.enqueue(Command::Send(Message::Done), policy).await;
        }
        if send_stop {
            handle.enqueue(Command::Send(Message::Stop), policy).await;
        }
    }
    shared.conn_changed.notify_waiters();
    shared.set_status(OpStatus::Complete);
    // Rate policy switches to seeding.
    shared.choke_kick.notify_one();
}

/// Delivers admin fan-out, skipping drained or dead connections.
async fn dispatch(shared: &Arc<Shared>, outbox: Outbox) {
    let policy = shared.config.backpressure;
    for (to, message) in outbox {
        let Some(handle) = shared.peers.get(&to) else {
            continue;
        };
        let skip = {
            let state = handle.state.lock();
            state.dead || state.stop_sent
        };
        if skip {
            continue;
        }
        handle.enqueue(Command::Send(message), policy).await;
    }
}

async fn run_choker(shared: Arc<Shared>) {
    let mut timer = tokio::time::interval(shared.config.choke_interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = shared.choke_kick.notified() => {}
        }
        if matches!(&*shared.status_tx.borrow(), OpStatus::Idle) {
            continue;
        }
        run_choke_round(&shared).await;
    }
}

async fn run_choke_round(shared: &Arc<Shared>) {
    let bootstrap = shared.first_round.swap(false, Ordering::Relaxed);
    let (seeding, known_pieces) = {
        let guard = shared.admin.lock();
        let Some(admin) = guard.as_ref() else { return };
        let known: HashMap<PeerId, usize> = admin
            .core()
            .existence
            .iter()
            .map(|(id, set)| (id.clone(), set.len()))
            .collect();
        (admin.is_complete(), known)
    };

    let views: Vec<PeerView> = shared
        .peers
        .values()
        .filter(|handle| !handle.state.lock().dead)
        .map(|handle| {
            let interested = handle.state.lock().peer_interested;
            let rate = if seeding {
                handle.up_rate.lock().rate()
            } else {
                handle.down_rate.lock().rate()
            };
            PeerView {
                id: handle.id.clone(),
                interested,
                rate,
                known_pieces: known_pieces.get(&handle.id).copied().unwrap_or(0),
            }
        })
        .collect();

    let unchoked = plan_unchokes(
        &views,
        shared.config.tit_for_tat_slots,
        shared.config.optimistic_slots,
        shared.config.newcomer_weight,
        bootstrap,
    );

    let policy = shared.config.backpressure;
    for handle in shared.peers.values() {
        let should_unchoke = unchoked.contains(&handle.id);
        let flip = {
            let mut state = handle.state.lock();
            if state.dead || state.stop_sent {
                false
            } else if state.peer_choked == should_unchoke {
                state.peer_choked = !should_unchoke;
                true
            } else {
                false
            }
        };
        if flip {
            let message = if should_unchoke {
                Message::Unchoke
            } else {
                Message::Choke
            };
            handle.enqueue(Command::Send(message), policy).await;
        }
    }
}
