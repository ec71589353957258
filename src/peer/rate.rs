use std::time::{Duration, Instant};

/// Exponentially-windowed transfer-rate estimate.
///
/// Every transferred byte count is folded into a weight that decays over the
/// configured trailing window, so the reported rate tracks recent throughput
/// and forgets old bursts.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    window: Duration,
    weighted_bytes: f64,
    last_update: Instant,
}

impl RateEstimator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            weighted_bytes: 0.0,
            last_update: Instant::now(),
        }
    }

    fn decay(&self, at: Instant) -> f64 {
        let elapsed = at.duration_since(self.last_update).as_secs_f64();
        (-elapsed / self.window.as_secs_f64()).exp()
    }

    /// Records `bytes` transferred now.
    pub fn record(&mut self, bytes: usize) {
        let now = Instant::now();
        self.weighted_bytes = self.weighted_bytes * self.decay(now) + bytes as f64;
        self.last_update = now;
    }

    /// Current rate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.weighted_bytes * self.decay(Instant::now()) / self.window.as_secs_f64()
    }

    /// Drops all history, as at the start of a fresh operation.
    pub fn reset(&mut self) {
        self.weighted_bytes = 0.0;
        self.last_update = Instant::now();
    }
}
