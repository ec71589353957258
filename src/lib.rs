//! Collective bulk-data distribution over peer links.
//!
//! `swarmcast` moves the content of a piece-addressed storage from a set of
//! root nodes to every node of a pool, BitTorrent style: peers advertise
//! what they have, request what they want from whoever is unchoked, and
//! re-advertise pieces as they land, so the roots never carry the whole
//! fan-out themselves.
//!
//! - [`Channel`] - the public façade; `multicast_storage`, `flush`, `close`
//! - [`admin`] - per-operation policy: interest, end-game, strategies
//! - [`peer`] - wire protocol, framing, per-peer session state, choking
//! - [`piece`] - piece index sets and gold/silver interest bookkeeping
//! - [`pool`] - pool and collective topology
//! - [`storage`] - the piece storage contract
//!
//! Hierarchical pools pick a [`StrategyKind`]: `Robber` steals work across
//! collectives on demand, `Mob` partitions the piece range statically.

pub mod admin;
pub mod channel;
pub mod config;
pub mod error;
pub mod peer;
pub mod piece;
pub mod pool;
pub mod storage;

pub use channel::{Channel, StrategyKind};
pub use config::{Backpressure, Config};
pub use error::ChannelError;
pub use pool::{PeerId, Pool};
pub use storage::{MemoryStorage, Storage, StorageError};
