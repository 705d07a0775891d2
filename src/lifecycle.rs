use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

/// Longest uninterrupted sleep a waiting loop does before re-checking the stop flag.
pub const POLL_SLICE: Duration = Duration::from_millis(50);

/// Shared run state. Any loop may trigger it; every loop polls it at the top of an iteration.
#[derive(Clone, Default, Debug)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Route Ctrl+C to this flag. Only the first installation per process succeeds.
    pub fn install_ctrlc_handler(&self) {
        let stop = self.clone();
        if let Err(e) = ctrlc::set_handler(move || stop.trigger()) {
            warn!(?e, "Could not install Ctrl+C handler");
        }
    }
}

/// Fixed-rate deadline ticker. The first tick is due immediately.
#[derive(Debug)]
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self { period, next: Instant::now() }
    }

    /// First tick is due one full period from now.
    pub fn delayed(period: Duration) -> Self {
        Self { period, next: Instant::now() + period }
    }

    /// Time left until the next tick, `None` once it is due.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.next.saturating_duration_since(Instant::now());
        if left.is_zero() {
            None
        } else {
            Some(left)
        }
    }

    /// Consume the due tick and schedule the following one.
    /// A late consumer skips missed ticks instead of bursting to catch up.
    pub fn advance(&mut self) {
        let now = Instant::now();
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
    }

    /// Sleep until the next tick, returning `false` if `stop` was observed first.
    pub fn wait(&mut self, stop: &StopFlag) -> bool {
        while let Some(left) = self.remaining() {
            if stop.is_set() {
                return false;
            }
            std::thread::sleep(left.min(POLL_SLICE));
        }
        self.advance();
        !stop.is_set()
    }
}
