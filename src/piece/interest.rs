use std::collections::HashMap;

use rand::Rng as _;

use super::index_set::PieceIndexSet;
use crate::pool::PeerId;

#[derive(Debug, Default)]
struct PeerWants {
    gold: PieceIndexSet,
    silver: PieceIndexSet,
    gold_only: bool,
}

impl PeerWants {
    fn total(&self) -> usize {
        self.gold.len() + self.silver.len()
    }
}

/// Per-node want tracking over two priority classes.
///
/// **Gold** pieces are wanted and not yet requested from anyone; **silver**
/// pieces are wanted at lower priority. Each known peer carries two want
/// lists recording which of its advertised pieces are gold/silver from this
/// node's view. A piece index lives in at most one of the two global sets,
/// and in at most one list per peer.
#[derive(Debug, Default)]
pub struct PieceInterest {
    gold: PieceIndexSet,
    silver: PieceIndexSet,
    wants: HashMap<PeerId, PeerWants>,
}

impl PieceInterest {
    /// Builds interest from an initial gold/silver split.
    pub fn new(gold: PieceIndexSet, silver: PieceIndexSet) -> Self {
        Self {
            gold,
            silver,
            wants: HashMap::new(),
        }
    }

    /// Records that `peer` advertises the pieces in `set`.
    ///
    /// Only pieces currently classified gold or silver are recorded; with
    /// `want_only_gold` the peer's silver advertisements are ignored (such a
    /// peer is never asked for silver pieces). Returns true when this node
    /// becomes newly interested in the peer.
    pub fn tell_have(&mut self, peer: &PeerId, set: &PieceIndexSet, want_only_gold: bool) -> bool {
        let wants = self.wants.entry(peer.clone()).or_default();
        wants.gold_only = want_only_gold;
        let was_wanting = wants.total() > 0;
        for index in set.iter() {
            if self.gold.contains(index) {
                wants.gold.insert(index);
            } else if self.silver.contains(index) && !want_only_gold {
                wants.silver.insert(index);
            }
        }
        !was_wanting && wants.total() > 0
    }

    /// Single-index form of [`tell_have`](Self::tell_have).
    pub fn tell_have_one(&mut self, peer: &PeerId, index: u32, want_only_gold: bool) -> bool {
        let mut set = PieceIndexSet::new();
        set.insert(index);
        self.tell_have(peer, &set, want_only_gold)
    }

    /// Pops up to `n` of `peer`'s gold wants, uniformly at random, retiring
    /// each popped piece from every peer's lists and the global sets.
    pub fn remove_gold(&mut self, peer: &PeerId, n: usize) -> Vec<u32> {
        let mut picked = Vec::new();
        for _ in 0..n {
            let index = match self.wants.get(peer) {
                Some(w) if !w.gold.is_empty() => {
                    let k = rand::rng().random_range(0..w.gold.len());
                    match w.gold.nth(k) {
                        Some(i) => i,
                        None => break,
                    }
                }
                _ => break,
            };
            self.retire(index);
            picked.push(index);
        }
        picked
    }

    /// Like [`remove_gold`](Self::remove_gold), falling back to the peer's
    /// silver wants once its gold wants are exhausted.
    pub fn remove_gold_or_silver(&mut self, peer: &PeerId, n: usize) -> Vec<u32> {
        let mut picked = self.remove_gold(peer, n);
        while picked.len() < n {
            let index = match self.wants.get(peer) {
                Some(w) if !w.silver.is_empty() => {
                    let k = rand::rng().random_range(0..w.silver.len());
                    match w.silver.nth(k) {
                        Some(i) => i,
                        None => break,
                    }
                }
                _ => break,
            };
            self.retire(index);
            picked.push(index);
        }
        picked
    }

    /// Removes `index` from the global sets and from every peer's lists.
    ///
    /// Called when a piece is requested (so it is never requested twice
    /// outside end-game) or lands in possession.
    pub fn retire(&mut self, index: u32) {
        self.gold.remove(index);
        self.silver.remove(index);
        for wants in self.wants.values_mut() {
            wants.gold.remove(index);
            wants.silver.remove(index);
        }
    }

    /// Moves every piece of `set` that is gold down to silver.
    ///
    /// Peers registered gold-only lose their edge for the piece instead.
    pub fn devaluate(&mut self, set: &PieceIndexSet) {
        for index in set.iter() {
            self.devaluate_one(index);
        }
    }

    /// Single-index form of [`devaluate`](Self::devaluate).
    pub fn devaluate_one(&mut self, index: u32) {
        if !self.gold.remove(index) {
            return;
        }
        self.silver.insert(index);
        for wants in self.wants.values_mut() {
            if wants.gold.remove(index) && !wants.gold_only {
                wants.silver.insert(index);
            }
        }
    }

    /// Moves every piece of `set` that is silver back up to gold.
    pub fn revaluate(&mut self, set: &PieceIndexSet) {
        for index in set.iter() {
            if !self.silver.remove(index) {
                continue;
            }
            self.gold.insert(index);
            for wants in self.wants.values_mut() {
                if wants.silver.remove(index) {
                    wants.gold.insert(index);
                }
            }
        }
    }

    /// Atomically devaluates the numerically smallest `fraction` of the
    /// current gold pieces, remapping affected per-peer lists, and returns
    /// them. This is the deterministic "booty" slice.
    pub fn devaluate_first(&mut self, fraction: f64) -> PieceIndexSet {
        let booty = self.gold.remove_first(fraction);
        for index in booty.iter() {
            self.silver.insert(index);
            for wants in self.wants.values_mut() {
                if wants.gold.remove(index) && !wants.gold_only {
                    wants.silver.insert(index);
                }
            }
        }
        booty
    }

    /// True while any gold piece remains anywhere.
    pub fn has_gold(&self) -> bool {
        !self.gold.is_empty()
    }

    /// Snapshot of the current gold set.
    pub fn gold(&self) -> &PieceIndexSet {
        &self.gold
    }

    /// How many of `peer`'s advertised pieces this node still wants.
    pub fn wants_from(&self, peer: &PeerId) -> usize {
        self.wants.get(peer).map(PeerWants::total).unwrap_or(0)
    }

    /// Forgets a departed peer's want lists.
    pub fn drop_peer(&mut self, peer: &PeerId) {
        self.wants.remove(peer);
    }
}
