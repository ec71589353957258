use std::collections::HashMap;

use tracing::debug;

use crate::peer::Message;
use crate::piece::{PieceIndexSet, PieceInterest};
use crate::pool::{PeerId, Pool};

/// Messages produced while the admin lock is held, dispatched after release.
pub type Outbox = Vec<(PeerId, Message)>;

/// Shared distribution state: possession, interest, per-peer bookkeeping.
///
/// Owned by [`Admin`] and handed to the active [`Strategy`] by reference, so
/// variants mutate one state object instead of overriding it.
pub struct AdminCore {
    pub local: PeerId,
    pub pool: Pool,
    pub peers: Vec<PeerId>,
    pub total_pieces: u32,
    pub possession: PieceIndexSet,
    pub interest: PieceInterest,
    /// What each peer claims to have.
    pub existence: HashMap<PeerId, PieceIndexSet>,
    /// What this node has announced to each peer.
    pub advertised: HashMap<PeerId, PieceIndexSet>,
    /// Outstanding requests per peer.
    pub pending: HashMap<PeerId, PieceIndexSet>,
    pub endgame_enabled: bool,
    pub endgame: bool,
    pub complete: bool,
    pub pieces_received: u32,
}

impl AdminCore {
    pub fn is_local(&self, peer: &PeerId) -> bool {
        self.pool.is_local(&self.local, peer)
    }

    pub fn pending_count(&self, peer: &PeerId) -> usize {
        self.pending.get(peer).map(PieceIndexSet::len).unwrap_or(0)
    }

    /// Pieces requested from any peer other than `peer`.
    fn pending_elsewhere(&self, peer: &PeerId) -> PieceIndexSet {
        let mut union = PieceIndexSet::new();
        for (other, set) in &self.pending {
            if other != peer {
                union = union.or(set);
            }
        }
        union
    }

    /// End-game-eligible pieces for `peer`: advertised by the peer, pending
    /// somewhere else, not already pending here or possessed.
    pub fn endgame_candidates(&self, peer: &PeerId) -> PieceIndexSet {
        let known = match self.existence.get(peer) {
            Some(set) => set,
            None => return PieceIndexSet::new(),
        };
        let mut candidates = known.and(&self.pending_elsewhere(peer));
        if let Some(here) = self.pending.get(peer) {
            candidates = candidates.minus(here);
        }
        candidates.minus(&self.possession)
    }
}

/// The distribution policy seam between the shared connection driver and
/// the plain/work-stealing/static-share variants.
///
/// Every method operates on the one [`AdminCore`]; strategies add their own
/// bookkeeping but never duplicate possession or interest state.
pub trait Strategy: Send {
    /// Splits the not-yet-possessed piece range into initial gold/silver.
    fn split_interest(&mut self, core: &AdminCore) -> (PieceIndexSet, PieceIndexSet);

    /// Which possessed pieces the initial bitfield for `peer` carries.
    fn advertised(&self, core: &AdminCore, peer: &PeerId) -> PieceIndexSet {
        let _ = peer;
        core.possession.clone()
    }

    /// Extra connection-opening messages (after the bitfield).
    fn greeting(&mut self, core: &AdminCore, peer: &PeerId, out: &mut Outbox) {
        let _ = (core, peer, out);
    }

    /// Filters a peer's existence claim before it reaches the interest
    /// bookkeeping. Returns the accepted set and whether only gold pieces
    /// may be wanted from this peer.
    fn accept_claim(
        &self,
        core: &AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
    ) -> (PieceIndexSet, bool) {
        let _ = (core, peer);
        (set.clone(), false)
    }

    /// Whether a newly possessed `index` is announced to `peer`.
    fn announces(&self, core: &AdminCore, peer: &PeerId, index: u32) -> bool {
        let _ = (core, peer, index);
        true
    }

    /// Hook after a claim from `peer` was recorded.
    fn claim_recorded(
        &mut self,
        core: &mut AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
        out: &mut Outbox,
    ) {
        let _ = (core, peer, set, out);
    }

    /// Hook after a piece landed locally.
    fn piece_received(&mut self, core: &mut AdminCore, origin: &PeerId, index: u32, out: &mut Outbox) {
        let _ = (core, origin, index, out);
    }

    /// Called when a pick found zero gold anywhere. Returning true means the
    /// strategy took corrective action (work stealing) and end-game
    /// activation is deferred.
    fn gold_exhausted(&mut self, core: &mut AdminCore, out: &mut Outbox) -> bool {
        let _ = (core, out);
        false
    }

    /// Handles strategy opcodes (desire/steal/work/found_work).
    fn control(&mut self, core: &mut AdminCore, peer: &PeerId, message: Message, out: &mut Outbox) {
        let _ = (core, out);
        debug!(peer = %peer, opcode = ?message.opcode(), "ignoring control message");
    }
}

/// The distribution policy brain for one operation.
///
/// A fresh `Admin` is created per distribution call, so a retried call never
/// inherits partial state.
pub struct Admin {
    core: AdminCore,
    strategy: Box<dyn Strategy>,
}

impl Admin {
    pub fn new(
        local: PeerId,
        pool: Pool,
        peers: Vec<PeerId>,
        total_pieces: u32,
        possession: PieceIndexSet,
        mut strategy: Box<dyn Strategy>,
        endgame_enabled: bool,
    ) -> Self {
        let mut core = AdminCore {
            local,
            pool,
            peers,
            total_pieces,
            complete: possession.len() == total_pieces as usize,
            possession,
            interest: PieceInterest::default(),
            existence: HashMap::new(),
            advertised: HashMap::new(),
            pending: HashMap::new(),
            endgame_enabled,
            endgame: false,
            pieces_received: 0,
        };
        let (gold, silver) = strategy.split_interest(&core);
        core.interest = PieceInterest::new(gold, silver);
        Self { core, strategy }
    }

    pub fn core(&self) -> &AdminCore {
        &self.core
    }

    pub fn is_complete(&self) -> bool {
        self.core.complete
    }

    pub fn in_endgame(&self) -> bool {
        self.core.endgame
    }

    pub fn owns(&self, index: u32) -> bool {
        self.core.possession.contains(index)
    }

    pub fn pending_count(&self, peer: &PeerId) -> usize {
        self.core.pending_count(peer)
    }

    /// How many of `peer`'s advertised pieces are still wanted.
    pub fn wants_from(&self, peer: &PeerId) -> usize {
        self.core.interest.wants_from(peer)
    }

    /// Whether anything at all is still wanted from `peer`, counting
    /// end-game re-request candidates as wanted.
    pub fn wants_anything_from(&self, peer: &PeerId) -> bool {
        self.core.interest.wants_from(peer) > 0
            || (self.core.endgame && !self.core.endgame_candidates(peer).is_empty())
    }

    /// Connection-opening messages for `peer`: the strategy-filtered
    /// bitfield plus any strategy greeting.
    pub fn greeting(&mut self, peer: &PeerId) -> Vec<Message> {
        let shown = self.strategy.advertised(&self.core, peer);
        self.core.advertised.insert(peer.clone(), shown.clone());
        let mut out = Outbox::new();
        self.strategy.greeting(&self.core, peer, &mut out);
        let mut messages = vec![Message::Bitfield(shown)];
        messages.extend(
            out.into_iter()
                .filter(|(to, _)| to == peer)
                .map(|(_, msg)| msg),
        );
        messages
    }

    /// Records that `peer` claims to have `set`. Returns whether this node
    /// became newly interested in the peer, plus follow-up messages.
    ///
    /// Within end-game a claim can make the peer wanted through re-request
    /// candidates alone, so the flip is detected on overall wantability,
    /// not only on the gold/silver want lists.
    pub fn record_existence(&mut self, peer: &PeerId, set: &PieceIndexSet) -> (bool, Outbox) {
        let was_wanted = self.wants_anything_from(peer);
        let known = self.core.existence.entry(peer.clone()).or_default();
        for index in set.iter() {
            known.insert(index);
        }
        let (accepted, gold_only) = self.strategy.accept_claim(&self.core, peer, set);
        self.core.interest.tell_have(peer, &accepted, gold_only);
        let mut out = Outbox::new();
        self.strategy
            .claim_recorded(&mut self.core, peer, &accepted, &mut out);
        (!was_wanted && self.wants_anything_from(peer), out)
    }

    /// Picks up to `n` pieces to request from `peer`, marking them pending.
    ///
    /// The first pick that finds zero gold anywhere activates end-game (when
    /// enabled); within end-game, including on the activating call, pieces
    /// pending at other peers may be re-requested, still bounded by `n`.
    pub fn pick_pieces(&mut self, peer: &PeerId, n: usize) -> (Vec<u32>, Outbox) {
        let mut out = Outbox::new();
        let mut picks = self.core.interest.remove_gold_or_silver(peer, n);

        if !self.core.interest.has_gold() && !self.core.complete && !self.core.endgame {
            let handled = self.strategy.gold_exhausted(&mut self.core, &mut out);
            if !handled && self.core.endgame_enabled {
                debug!(local = %self.core.local, "no gold left anywhere, entering end-game");
                self.core.endgame = true;
            }
        }

        // Just-picked indices are not pending anywhere yet, so the fill can
        // never duplicate them within the same call.
        if self.core.endgame && picks.len() < n {
            let candidates = self.core.endgame_candidates(peer);
            picks.extend(candidates.iter().take(n - picks.len()));
        }

        if !picks.is_empty() {
            let pending = self.core.pending.entry(peer.clone()).or_default();
            for &index in &picks {
                pending.insert(index);
            }
        }
        (picks, out)
    }

    /// Registers a received piece. Returns whether possession just became
    /// complete, plus the have/cancel fan-out for the other peers.
    pub fn piece_received(&mut self, origin: &PeerId, index: u32) -> (bool, Outbox) {
        let mut out = Outbox::new();
        if !self.core.possession.insert(index) {
            // Redundant end-game copy that lost the race; nothing to do.
            return (false, out);
        }
        self.core.pieces_received += 1;
        self.core.interest.retire(index);
        if let Some(pending) = self.core.pending.get_mut(origin) {
            pending.remove(index);
        }

        for peer in self.core.peers.clone() {
            if &peer == origin {
                continue;
            }
            let was_pending = self
                .core
                .pending
                .get_mut(&peer)
                .map(|p| p.remove(index))
                .unwrap_or(false);
            if was_pending {
                out.push((peer, Message::Cancel { index }));
            } else if self.strategy.announces(&self.core, &peer, index) {
                let shown = self.core.advertised.entry(peer.clone()).or_default();
                if shown.insert(index) {
                    out.push((peer, Message::Have { index }));
                }
            }
        }

        self.strategy
            .piece_received(&mut self.core, origin, index, &mut out);

        let became_complete =
            !self.core.complete && self.core.possession.len() == self.core.total_pieces as usize;
        if became_complete {
            self.core.complete = true;
        }
        (became_complete, out)
    }

    /// Dispatches a strategy opcode.
    pub fn control(&mut self, peer: &PeerId, message: Message) -> Outbox {
        let mut out = Outbox::new();
        self.strategy
            .control(&mut self.core, peer, message, &mut out);
        out
    }

    /// Forgets a departed peer.
    pub fn drop_peer(&mut self, peer: &PeerId) {
        self.core.interest.drop_peer(peer);
        self.core.existence.remove(peer);
        self.core.advertised.remove(peer);
        self.core.pending.remove(peer);
        self.core.peers.retain(|p| p != peer);
    }
}
