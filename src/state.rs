use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

/// Samples older than this, relative to the newest one, are evicted on append.
pub const RETENTION: Duration = Duration::from_secs(2);

/// One observed transfer event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    pub at: Instant,
    pub size: u64,
}

impl Sample {
    pub fn now(size: u64) -> Self {
        Self { at: Instant::now(), size }
    }
}

/// Time-ordered samples shared between one producer and the aggregator.
#[derive(Debug)]
pub struct SampleBuffer {
    inner: Mutex<VecDeque<Sample>>,
    retention: Duration,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::with_retention(RETENTION)
    }
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(64)), retention }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Sample>> {
        // samples are Copy, a poisoned guard still only holds whole ones
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, sample: Sample) {
        let mut samples = self.lock();
        while let Some(front) = samples.front() {
            if sample.at.saturating_duration_since(front.at) > self.retention {
                samples.pop_front();
            } else {
                break;
            }
        }
        samples.push_back(sample);
    }

    pub fn record(&self, size: usize) {
        self.push(Sample::now(size as u64));
    }

    /// Run `f` over the retained samples while holding the lock.
    pub fn scan<R>(&self, f: impl FnOnce(&mut dyn Iterator<Item = &Sample>) -> R) -> R {
        let samples = self.lock();
        f(&mut samples.iter())
    }

    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.lock().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Status notifications from worker threads to the renderer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorEvent {
    PeerConnected(SocketAddr),
    PeerClosed,
    Announced(SystemTime),
}
