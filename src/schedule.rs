//! Explicit deadlines for time-driven triggers.
//!
//! The decay sweep and the training-mode inactivity timeout are stored as
//! plain deadlines in the agent's state instead of platform timer handles.
//! Arming replaces any pending deadline, so a burst of qualifying events never
//! stacks duplicate timers; cancelling clears it. `Schedule::due` is polled by
//! `Engine::tick`.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deadline {
    at: Option<Timestamp>,
}

impl Deadline {
    pub fn at(&self) -> Option<Timestamp> {
        self.at
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Arm (or re-arm) for `at`, replacing any pending deadline.
    pub fn arm(&mut self, at: Timestamp) {
        self.at = Some(at);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    /// Consume the deadline if it has passed.
    pub fn fire(&mut self, now: Timestamp) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    DecaySweep,
    TrainingTimeout,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DecaySweep => "decay_sweep",
            Self::TrainingTimeout => "training_timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub decay_sweep: Deadline,
    pub training_timeout: Deadline,
}

impl Schedule {
    pub fn arm(&mut self, kind: TimerKind, at: Timestamp) {
        match kind {
            TimerKind::DecaySweep => self.decay_sweep.arm(at),
            TimerKind::TrainingTimeout => self.training_timeout.arm(at),
        }
        log(
            Level::Trace,
            Domain::Timer,
            "armed",
            obj(&[("timer", v_str(kind.as_str())), ("at", serde_json::json!(at))]),
        );
    }

    pub fn cancel_all(&mut self) {
        self.decay_sweep.cancel();
        self.training_timeout.cancel();
    }

    /// Fire every passed deadline, earliest first.
    pub fn due(&mut self, now: Timestamp) -> Vec<TimerKind> {
        let mut pending: Vec<(Timestamp, TimerKind)> = Vec::new();
        if let Some(at) = self.decay_sweep.at() {
            pending.push((at, TimerKind::DecaySweep));
        }
        if let Some(at) = self.training_timeout.at() {
            pending.push((at, TimerKind::TrainingTimeout));
        }
        pending.sort_by_key(|(at, _)| *at);

        let mut fired = Vec::new();
        for (_, kind) in pending {
            let hit = match kind {
                TimerKind::DecaySweep => self.decay_sweep.fire(now),
                TimerKind::TrainingTimeout => self.training_timeout.fire(now),
            };
            if hit {
                fired.push(kind);
            }
        }
        fired
    }
}
