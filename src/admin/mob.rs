use super::state::{AdminCore, Strategy};
use crate::piece::PieceIndexSet;
use crate::pool::PeerId;

/// The contiguous cross-cluster piece range a node owns, derived purely
/// from its collective's size, its rank in it, and the piece total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MobShare {
    pub first: u32,
    pub last: u32,
}

impl MobShare {
    pub fn compute(cluster_size: usize, rank: usize, total_pieces: u32) -> Self {
        let size = cluster_size.max(1) as u64;
        let total = total_pieces as u64;
        let first = (rank as u64 * total / size) as u32;
        let end = ((rank as u64 + 1) * total / size) as u32;
        Self {
            first,
            last: end.saturating_sub(1),
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.first <= index && index <= self.last
    }

    pub fn as_set(&self) -> PieceIndexSet {
        let mut set = PieceIndexSet::new();
        if self.last >= self.first {
            set.insert_range(self.first, self.last + 1);
        }
        set
    }
}

/// Statically-partitioned cross-cluster sharing.
///
/// Cross-cluster advertisement is restricted to the *peer's* share and
/// acceptance to this node's own share, which removes the need for an
/// explicit desire protocol at the cost of load imbalance under uneven
/// cluster sizes.
#[derive(Debug, Default)]
pub struct Mob {
    own_share: PieceIndexSet,
}

impl Mob {
    fn share_of(core: &AdminCore, peer: &PeerId) -> MobShare {
        let size = core
            .pool
            .collective_of(peer)
            .map(|name| core.pool.members_of(name).len())
            .unwrap_or(1);
        let rank = core.pool.rank_of(peer).unwrap_or(0);
        MobShare::compute(size, rank, core.total_pieces)
    }
}

impl Strategy for Mob {
    fn split_interest(&mut self, core: &AdminCore) -> (PieceIndexSet, PieceIndexSet) {
        self.own_share = Self::share_of(core, &core.local).as_set();
        let gold = self.own_share.minus(&core.possession);
        let silver = PieceIndexSet::full(core.total_pieces)
            .minus(&self.own_share)
            .minus(&core.possession);
        (gold, silver)
    }

    fn advertised(&self, core: &AdminCore, peer: &PeerId) -> PieceIndexSet {
        if core.is_local(peer) {
            core.possession.clone()
        } else {
            core.possession.and(&Self::share_of(core, peer).as_set())
        }
    }

    fn accept_claim(
        &self,
        core: &AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
    ) -> (PieceIndexSet, bool) {
        if core.is_local(peer) {
            (set.clone(), false)
        } else {
            (set.and(&self.own_share), true)
        }
    }

    fn announces(&self, core: &AdminCore, peer: &PeerId, index: u32) -> bool {
        core.is_local(peer) || Self::share_of(core, peer).contains(index)
    }

    fn claim_recorded(
        &mut self,
        core: &mut AdminCore,
        peer: &PeerId,
        set: &PieceIndexSet,
        _out: &mut super::state::Outbox,
    ) {
        // A piece a local peer already holds will arrive locally; stop
        // pulling it cross-cluster.
        if core.is_local(peer) {
            let now_local = set.and(core.interest.gold());
            if !now_local.is_empty() {
                core.interest.devaluate(&now_local);
            }
        }
    }
}
