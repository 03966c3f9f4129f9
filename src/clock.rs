//! Time sources.
//!
//! Every time-dependent rule in the engine (timing decay, extinction, deadlines)
//! reads milliseconds from a [`Clock`]. Production code uses [`SystemClock`];
//! tests and the simulator drive a [`ManualClock`] forward explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch (or since simulation start).
pub type Timestamp = u64;

pub const SECOND_MS: Timestamp = 1_000;
pub const MINUTE_MS: Timestamp = 60 * SECOND_MS;
pub const HOUR_MS: Timestamp = 60 * MINUTE_MS;

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Timestamp;
}

/// Wall clock backed by chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Timestamp {
        chrono::Utc::now().timestamp_millis().max(0) as Timestamp
    }
}

/// Simulated clock. Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: Arc::new(AtomicU64::new(start)) }
    }

    pub fn set(&self, ts: Timestamp) {
        self.now.store(ts, Ordering::SeqCst);
    }

    /// Move time forward and return the new reading.
    pub fn advance(&self, delta_ms: Timestamp) -> Timestamp {
        self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}
