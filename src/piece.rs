//! Piece bookkeeping primitives.
//!
//! - [`PieceIndexSet`] - Growable bit-set over piece indices with set algebra
//! - [`PieceInterest`] - Per-peer gold/silver want tracking
//!
//! A *piece* is the fixed-size addressable unit of the distributed storage,
//! identified by a `u32` index; its payload lives in [`Storage`]
//! (`crate::storage::Storage`) and only the index moves through these types.

mod index_set;
mod interest;

pub use index_set::PieceIndexSet;
pub use interest::PieceInterest;

#[cfg(test)]
mod tests;
