use std::time::{Duration, Instant};

use crate::state::SampleBuffer;

/// Trailing window summed into one throughput point.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Reduces the samples of the trailing window to bytes observed in it.
#[derive(Copy, Clone, Debug)]
pub struct WindowedAggregator {
    window: Duration,
}

impl Default for WindowedAggregator {
    fn default() -> Self {
        Self { window: WINDOW }
    }
}

impl WindowedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of sizes with `now - at < window`. Samples stamped after `now` count as age zero.
    pub fn bytes_in_window(&self, samples: &SampleBuffer, now: Instant) -> u64 {
        samples.scan(|it| {
            it.filter(|s| now.saturating_duration_since(s.at) < self.window)
                .map(|s| s.size)
                .sum()
        })
    }
}
