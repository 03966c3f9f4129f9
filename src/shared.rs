//! Thread-safe handle for hosts with several event sources.
//!
//! User-interaction callbacks and the periodic sweep may fire concurrently in
//! a multi-threaded host. `SharedEngine` serializes them behind a single mutex
//! guarding all three state stores. After `shutdown` the engine is gone and
//! every call returns `None`, so a late timer can never mutate torn-down state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::engine::{Engine, TickReport};
use crate::logging::{log, obj, v_num, Domain, Level};
use crate::snapshot::{EngineSnapshot, SnapshotError};

#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Option<Engine>>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(engine))) }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Engine>> {
        // A panic mid-request cannot leave a store half-clamped: every update
        // clamps before it writes, so the state behind a poisoned lock is usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one request to completion against the engine.
    pub fn with<T>(&self, f: impl FnOnce(&mut Engine) -> T) -> Option<T> {
        self.lock().as_mut().map(f)
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    pub fn tick(&self) -> Option<TickReport> {
        self.with(Engine::tick)
    }

    /// Take the engine out, cancel its deadlines and return its final state.
    pub fn shutdown(&self) -> Option<Result<EngineSnapshot, SnapshotError>> {
        let engine = self.lock().take()?;
        Some(engine.shutdown())
    }
}

/// Background task that drives `tick` on a fixed period.
pub struct Sweeper {
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Must be called from within a tokio runtime. The task ends on its own
    /// once the engine has been shut down.
    pub fn spawn(engine: SharedEngine, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(report) = engine.tick() else {
                    break;
                };
                if let Some(sweep) = report.sweep {
                    log(
                        Level::Debug,
                        Domain::Timer,
                        "sweep",
                        obj(&[
                            ("decayed", v_num(sweep.decayed as f64)),
                            ("pruned", v_num(sweep.pruned as f64)),
                        ]),
                    );
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the task. Safe to call before or after the engine shuts down.
    pub fn stop(self) {
        self.handle.abort();
    }
}
