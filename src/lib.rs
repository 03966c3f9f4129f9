//! Adaptive behavior & resource economy engine for a desktop companion.
//!
//! The companion learns which actions its user rewards (token reinforcement
//! gated by trust, timing decay and extinction) and decides whether it can
//! afford to attempt costly actions (a never-negative point balance plus an
//! expected-value risk gate). Rendering, chat, onboarding and persistence
//! wrappers live outside this crate and talk to [`engine::Engine`].

pub mod clock;
pub mod config;
pub mod economy;
pub mod engine;
pub mod logging;
pub mod matrix;
pub mod mood;
pub mod schedule;
pub mod shared;
pub mod snapshot;
pub mod storage;
pub mod trust;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::EngineConfig;
pub use economy::{AffordabilityVerdict, Decision, Denied, DenyReason, StrategyTier};
pub use engine::{Engine, OutcomeMetrics, OutcomeReport};
pub use matrix::{ManifestContext, ManifestDecision};
pub use shared::{SharedEngine, Sweeper};
pub use snapshot::EngineSnapshot;
pub use trust::{Phase, TokenEvent};
