//! The distribution policy brain.
//!
//! [`Admin`] owns possession state, the gold/silver interest bookkeeping and
//! the end-game pending sets for one distribution operation. Policy variants
//! plug in through the [`Strategy`] capability interface:
//!
//! - [`Plain`] - flat single-cluster piece exchange
//! - [`Robber`] - explicit cross-cluster work stealing
//! - [`Mob`] - statically-partitioned cross-cluster shares

mod mob;
mod plain;
mod robber;
mod state;

pub use mob::{Mob, MobShare};
pub use plain::Plain;
pub use robber::Robber;
pub use state::{Admin, AdminCore, Outbox, Strategy};
