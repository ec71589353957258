use std::collections::HashMap;

use rand::Rng as _;
use tracing::debug;

use super::state::{AdminCore, Outbox, Strategy};
use crate::peer::Message;
use crate::piece::PieceIndexSet;
use crate::pool::PeerId;

/// Explicit cross-cluster work stealing.
///
/// The full piece range is initially partitioned contiguously across the
/// local labour force; each member broadcasts its current desire (its gold
/// set) to cross-cluster peers, which advertise exactly the desired pieces.
/// A member whose gold runs dry steals a slice of a busy local peer's
/// remaining gold instead of going idle.
pub struct Robber {
    steal_fraction: f64,
    balance_booty: bool,
    /// Latest desire received from each cross-cluster peer.
    desire_of: HashMap<PeerId, PieceIndexSet>,
    /// Local labour force members believed to still hold gold.
    busy: HashMap<PeerId, bool>,
    steal_in_flight: Option<PeerId>,
    pub steals_attempted: u64,
    pub steals_won: u64,
}

impl Robber {
    pub fn new(steal_fraction: f64, balance_booty: bool) -> Self {
        Self {
            steal_fraction,
            balance_booty,
            desire_of: HashMap::new(),
            busy: HashMap::new(),
            steal_in_flight: None,
            steals_attempted: 0,
            steals_won: 0,
        }
    }

    fn broadcast_desire(&self, core: &AdminCore, out: &mut Outbox) {
        let desire = core.interest.gold().clone();
        for peer in &core.peers {
            if !core.is_local(peer) {
                out.push((peer.clone(), Message::Desire(desire.clone())));
            }
        }
    }

    fn launch_steal(&mut self, core: &AdminCore, out: &mut Outbox) -> bool {
        if self.steal_in_flight.is_some() {
            return true;
        }
        let victims: Vec<PeerId> = core
            .peers
            .iter()
            .filter(|p| core.is_local(p) && *self.busy.get(*p).unwrap_or(&true))
            .cloned()
            .collect();
        if victims.is_empty() {
            return false;
        }
        let victim = victims[rand::rng().random_range(0..victims.len())].clone();
        let pieces_received = self.balance_booty.then_some(core.pieces_received);
        debug!(local = %core.local, victim = %victim, "gold exhausted, stealing work");
        out.push((victim.clone(), Message::Steal { pieces_received }));
        self.steal_in_flight = Some(victim);
        self.steals_attempted += 1;
        true
    }

    fn booty_fraction(&self, core: &AdminCore, thief_received: Option<u32>) -> f64 {
        match thief_received {
            Some(theirs) if self.balance_booty => {
                let total = theirs as f64 + core.pieces_received as f64;
                if total == 0.0 {
                    self.steal_fraction
                } else {
                    (theirs as f64 / total).clamp(0.1, 0.9)
                }
            }
            _ => self.steal_fraction,
        }
    }
}

impl Strategy for Robber {
    fn split_interest(&mut self, core: &AdminCore) -> (PieceIndexSet, PieceIndexSet) {
        let force = core
            .pool
            .collective_of(&core.local)
            .map(|name| core.pool.members_of(name).to_vec())
            .unwrap_or_default();
        let size = force.len().max(1);
        let rank = core.pool.rank_of(&core.local).unwrap_or(0);

        for member in &force {
            if member != &core.local {
                self.busy.insert(member.clone(), true);
            }
        }

        let total = core.total_pieces as u64;
        let first = (rank as u64 * total / size as u64) as u32;
        let end = ((rank as u64 + 1) * total / size as u64) as u32;
        let mut work = PieceIndexSet::new();
        work.insert_range(first, end);

        let gold = work.minus(&core.possession);
        let silver = PieceIndexSet::full(core.total_pieces)
            .minus(&work)
            .minus(&core.possession);
        (gold, silver)
    }

    fn advertised(&self, core: &AdminCore, peer: &PeerId) -> PieceIndexSet {
        if core.is_local(peer) {
            core.possession.clone()
        } else {
            match self.desire_of.get(peer) {
                Some(desire) => core.possession.and(desire),
                None => PieceIndexSet::new(),
            }
        }
    }

    fn greeting(&mut self, core: &AdminCore, peer: &PeerId, out: &mut Outbox) {
        if !core.is_local(peer) {
            out.push((peer.clone(), Message::Desire(core.interest.gold().clone())));
        }
    }

    fn accept_claim(
        &self,
        core: &AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
    ) -> (PieceIndexSet, bool) {
        (set.clone(), !core.is_local(peer))
    }

    fn announces(&self, core: &AdminCore, peer: &PeerId, index: u32) -> bool {
        if core.is_local(peer) {
            return true;
        }
        self.desire_of
            .get(peer)
            .map(|desire| desire.contains(index))
            .unwrap_or(false)
    }

    fn claim_recorded(
        &mut self,
        core: &mut AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
        out: &mut Outbox,
    ) {
        if core.is_local(peer) {
            let now_local = set.and(core.interest.gold());
            if !now_local.is_empty() {
                core.interest.devaluate(&now_local);
                self.broadcast_desire(core, out);
            }
        }
    }

    fn gold_exhausted(&mut self, core: &mut AdminCore, out: &mut Outbox) -> bool {
        self.launch_steal(core, out)
    }

    fn control(&mut self, core: &mut AdminCore, peer: &PeerId, message: Message, out: &mut Outbox) {
        match message {
            Message::Desire(desire) => {
                // The peer now computes its wants from this exact set; show
                // it anything desired that we already hold.
                let desired_here = core.possession.and(&desire);
                let shown = core.advertised.entry(peer.clone()).or_default();
                for index in desired_here.iter() {
                    if shown.insert(index) {
                        out.push((peer.clone(), Message::Have { index }));
                    }
                }
                self.desire_of.insert(peer.clone(), desire);
            }
            Message::Steal { pieces_received } => {
                let fraction = self.booty_fraction(core, pieces_received);
                let booty = core.interest.devaluate_first(fraction);
                debug!(
                    local = %core.local,
                    thief = %peer,
                    booty = booty.len(),
                    "handing over stolen work"
                );
                if !booty.is_empty() {
                    self.broadcast_desire(core, out);
                }
                out.push((peer.clone(), Message::Work(booty)));
            }
            Message::Work(booty) => {
                if self.steal_in_flight.as_ref() == Some(peer) {
                    self.steal_in_flight = None;
                }
                if booty.is_empty() {
                    self.busy.insert(peer.clone(), false);
                    // Keep hunting while anyone local still looks busy.
                    if !core.interest.has_gold() && !core.endgame {
                        self.launch_steal(core, out);
                    }
                    return;
                }
                self.steals_won += 1;
                core.interest.revaluate(&booty);
                // Gold-only peers lost their edges when these pieces were
                // devaluated and left none while they sat in silver; replay
                // recorded claims now the pieces are gold again.
                let known: Vec<(PeerId, PieceIndexSet)> = core
                    .existence
                    .iter()
                    .map(|(p, ex)| (p.clone(), ex.and(&booty)))
                    .filter(|(_, overlap)| !overlap.is_empty())
                    .collect();
                for (p, overlap) in known {
                    let gold_only = !core.is_local(&p);
                    core.interest.tell_have(&p, &overlap, gold_only);
                }
                self.broadcast_desire(core, out);
                for p in &core.peers {
                    if core.is_local(p) {
                        out.push((p.clone(), Message::FoundWork));
                    }
                }
            }
            Message::FoundWork => {
                self.busy.insert(peer.clone(), true);
            }
            other => {
                debug!(peer = %peer, opcode = ?other.opcode(), "unexpected control message");
            }
        }
    }
}
