use std::time::Duration;

/// Policy for a full per-connection send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backpressure {
    /// Wait for queue room. Never loses traffic.
    #[default]
    Block,
    /// Drop queued-out piece payloads with a warning. Protocol control
    /// messages still block; dropped payloads can stall a transfer until
    /// end-game re-requests them.
    Drop,
}

/// Runtime tuning for a channel.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-peer credit window: outstanding requests never exceed this.
    pub max_pending_requests: usize,
    /// Bound of each connection's outbound command queue.
    pub send_queue_capacity: usize,
    /// What to do when a send queue is full.
    pub backpressure: Backpressure,
    /// Period of the choking scheduler.
    pub choke_interval: Duration,
    /// Tit-for-tat unchoke slots per round.
    pub tit_for_tat_slots: usize,
    /// Optimistic unchoke slots per round.
    pub optimistic_slots: usize,
    /// Optimistic-pick weight multiplier for peers with no known pieces.
    pub newcomer_weight: u32,
    /// Trailing window of the per-peer rate estimate.
    pub rate_window: Duration,
    /// Whether the end-game phase (bounded redundant requests) is enabled.
    pub endgame: bool,
    /// Fraction of a victim's remaining gold handed over per steal.
    pub steal_fraction: f64,
    /// Scale stolen booty by the thief's reported progress instead of
    /// `steal_fraction`.
    pub balance_booty: bool,
    /// Upper bound on the completion wait of a distribution call, so a
    /// partitioned pool surfaces as an error instead of hanging. `None`
    /// waits forever.
    pub completion_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_pending_requests: 8,
            send_queue_capacity: 64,
            backpressure: Backpressure::Block,
            choke_interval: Duration::from_secs(1),
            tit_for_tat_slots: 3,
            optimistic_slots: 1,
            newcomer_weight: 3,
            rate_window: Duration::from_secs(20),
            endgame: true,
            steal_fraction: 0.5,
            balance_booty: false,
            completion_timeout: Some(Duration::from_secs(300)),
        }
    }
}
