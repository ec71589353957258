use super::state::{AdminCore, Strategy};
use crate::piece::PieceIndexSet;

/// The flat single-cluster policy: every missing piece is gold, every peer
/// is advertised everything, and no control opcodes are used.
#[derive(Debug, Default)]
pub struct Plain;

impl Strategy for Plain {
    fn split_interest(&mut self, core: &AdminCore) -> (PieceIndexSet, PieceIndexSet) {
        let gold = PieceIndexSet::full(core.total_pieces).minus(&core.possession);
        (gold, PieceIndexSet::new())
    }
}
