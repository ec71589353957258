//! The per-peer protocol layer.
//!
//! - [`Message`] / [`Opcode`] - Wire encode/decode of protocol messages
//! - [`MessageReader`] / [`MessageWriter`] - Framing over a [`Link`]
//! - [`ConnState`] / [`PeerHandle`] - Per-peer session state
//! - [`Command`] / [`run_sender`] - The outbound queue worker
//! - [`plan_unchokes`] - The choking round planner
//! - [`RateEstimator`] - Windowed per-peer transfer rates

mod choking;
mod connection;
mod error;
mod message;
mod rate;
mod sender;
mod transport;

pub use choking::{plan_unchokes, PeerView};
pub use connection::{ConnState, PeerHandle};
pub use error::PeerError;
pub use message::{Message, Opcode};
pub use rate::RateEstimator;
pub use sender::{run_sender, Command};
pub use transport::{Link, MessageReader, MessageWriter};
