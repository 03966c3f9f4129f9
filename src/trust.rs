//! Trust & phase controller.
//!
//! A single trust scalar plus a one-way, three-phase progression decides how
//! each incoming token is interpreted by the [`BehaviorMatrix`]:
//!
//! | Phase                | Mode           | Matrix effect                              |
//! |----------------------|----------------|--------------------------------------------|
//! | `TrustBuilding`      | Mimicry        | tentative, low-weight association          |
//! | `PatternRecognition` | Reinforcement  | standard single-action reinforcement       |
//! | `BehaviorShaping`    | Shaping        | reinforcement + short sequence learning    |

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::TrustConfig;
use crate::logging::{log_phase_change, log_token};
use crate::matrix::{signed_unit, unit, BehaviorMatrix, BehaviorUpdateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    TrustBuilding,
    PatternRecognition,
    BehaviorShaping,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrustBuilding => "trust_building",
            Self::PatternRecognition => "pattern_recognition",
            Self::BehaviorShaping => "behavior_shaping",
        }
    }

    pub fn mode(&self) -> LearningMode {
        match self {
            Self::TrustBuilding => LearningMode::Mimicry,
            Self::PatternRecognition => LearningMode::Reinforcement,
            Self::BehaviorShaping => LearningMode::Shaping,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningMode {
    Mimicry,
    Reinforcement,
    Shaping,
}

/// A signed reward/punishment tied to one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenEvent {
    pub action_id: String,
    pub value: f64,
    pub timestamp: Timestamp,
}

impl TokenEvent {
    pub fn new(action_id: impl Into<String>, value: f64, timestamp: Timestamp) -> Self {
        Self { action_id: action_id.into(), value, timestamp }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustState {
    pub trust: f64,
    pub phase: Phase,
    pub consecutive_positive: u32,
    pub last_token_at: Option<Timestamp>,
    /// Most recent action ids, oldest first, for sequence keys
    #[serde(default)]
    pub recent_actions: VecDeque<String>,
}

impl Default for TrustState {
    fn default() -> Self {
        Self {
            trust: 0.0,
            phase: Phase::TrustBuilding,
            consecutive_positive: 0,
            last_token_at: None,
            recent_actions: VecDeque::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustUpdateResult {
    pub trust_before: f64,
    pub trust: f64,
    pub timing_factor: f64,
    pub streak_bonus: f64,
    pub mode: LearningMode,
    pub phase: Phase,
    pub phase_changed: Option<(Phase, Phase)>,
    pub behavior: BehaviorUpdateResult,
    pub sequence: Option<BehaviorUpdateResult>,
}

#[derive(Debug, Clone)]
pub struct TrustController {
    cfg: TrustConfig,
    state: TrustState,
}

impl TrustController {
    pub fn new(cfg: TrustConfig) -> Self {
        Self { cfg, state: TrustState::default() }
    }

    pub fn state(&self) -> &TrustState {
        &self.state
    }

    pub fn trust(&self) -> f64 {
        self.state.trust
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn reset(&mut self) {
        self.state = TrustState::default();
    }

    /// Replace the state wholesale (snapshot import). Values are clamped.
    pub fn restore(&mut self, mut state: TrustState) {
        state.trust = unit(state.trust);
        while state.recent_actions.len() > self.cfg.sequence_length.max(1) {
            state.recent_actions.pop_front();
        }
        self.state = state;
    }

    /// Full impact inside the immediate window, exponential fall-off after.
    pub fn timing_factor(&self, ts: Timestamp) -> f64 {
        let Some(prev) = self.state.last_token_at else {
            return 1.0;
        };
        let elapsed = ts.saturating_sub(prev);
        if elapsed < self.cfg.immediate_window_ms {
            return 1.0;
        }
        if self.cfg.timing_decay_ms == 0 {
            return 0.0;
        }
        (-(elapsed as f64) / self.cfg.timing_decay_ms as f64).exp()
    }

    /// Ingest one token: update trust, forward it to the matrix in the mode
    /// selected by the current phase, then check for a phase transition.
    /// Never fails.
    pub fn ingest(&mut self, token: &TokenEvent, matrix: &mut BehaviorMatrix) -> TrustUpdateResult {
        let value = signed_unit(token.value);
        let ts = token.timestamp;
        let timing_factor = self.timing_factor(ts);

        let trust_before = self.state.trust;
        let mut trust = unit(trust_before + value * self.cfg.base_trust_rate * timing_factor);
        let mut streak_bonus = 0.0;
        if value > 0.0 {
            self.state.consecutive_positive = self.state.consecutive_positive.saturating_add(1);
            if self.state.consecutive_positive >= self.cfg.streak_threshold {
                streak_bonus = self.cfg.consistency_bonus;
                trust = unit(trust + streak_bonus);
            }
        } else {
            self.state.consecutive_positive = 0;
        }
        self.state.trust = trust;
        self.state.last_token_at = Some(ts);
        debug_assert!((0.0..=1.0).contains(&self.state.trust));

        let mode = self.state.phase.mode();
        let weight = match mode {
            LearningMode::Mimicry => self.cfg.mimicry_weight,
            LearningMode::Reinforcement | LearningMode::Shaping => 1.0,
        };
        let trust_multiplier = 0.5 + 0.5 * trust;
        let behavior = matrix.reinforce(
            &token.action_id,
            value,
            timing_factor,
            weight * trust_multiplier,
            ts,
        );

        self.state.recent_actions.push_back(token.action_id.clone());
        while self.state.recent_actions.len() > self.cfg.sequence_length.max(1) {
            self.state.recent_actions.pop_front();
        }
        let sequence = if mode == LearningMode::Shaping && self.state.recent_actions.len() >= 2 {
            let key = self
                .state
                .recent_actions
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(">");
            Some(matrix.reinforce_sequence(
                &key,
                value,
                timing_factor,
                trust_multiplier,
                self.cfg.sequence_rate,
                ts,
            ))
        } else {
            None
        };

        let phase_changed = self.advance_phase(matrix.learned_behaviors());
        log_token(&token.action_id, value, timing_factor, trust, self.state.phase.as_str());

        TrustUpdateResult {
            trust_before,
            trust,
            timing_factor,
            streak_bonus,
            mode,
            phase: self.state.phase,
            phase_changed,
            behavior,
            sequence,
        }
    }

    /// At most one forward step per call; there is no path backwards.
    fn advance_phase(&mut self, behaviors: usize) -> Option<(Phase, Phase)> {
        let from = self.state.phase;
        let trust = self.state.trust;
        let to = match from {
            Phase::TrustBuilding if trust >= self.cfg.pattern_threshold => Phase::PatternRecognition,
            Phase::PatternRecognition
                if trust >= self.cfg.shaping_threshold && behaviors >= self.cfg.shaping_min_behaviors =>
            {
                Phase::BehaviorShaping
            }
            other => other,
        };
        if to == from {
            return None;
        }
        self.state.phase = to;
        log_phase_change(from.as_str(), to.as_str(), trust, behaviors);
        Some((from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SECOND_MS;
    use crate::config::MatrixConfig;

    fn setup() -> (TrustController, BehaviorMatrix) {
        (
            TrustController::new(TrustConfig::default()),
            BehaviorMatrix::new(MatrixConfig::default()),
        )
    }

    #[test]
    fn first_token_has_full_timing() {
        let (mut tc, mut m) = setup();
        let r = tc.ingest(&TokenEvent::new("sit", 1.0, 50 * SECOND_MS), &mut m);
        assert_eq!(r.timing_factor, 1.0);
        assert!((r.trust - 0.1).abs() < 1e-12);
        assert_eq!(r.mode, LearningMode::Mimicry);
    }

    #[test]
    fn timing_factor_decays_after_window() {
        let (mut tc, mut m) = setup();
        tc.ingest(&TokenEvent::new("sit", 1.0, 0), &mut m);
        assert_eq!(tc.timing_factor(1_999), 1.0);
        let f = tc.timing_factor(10 * SECOND_MS);
        assert!((f - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn negative_token_resets_streak_and_lowers_trust() {
        let (mut tc, mut m) = setup();
        tc.ingest(&TokenEvent::new("sit", 1.0, 0), &mut m);
        tc.ingest(&TokenEvent::new("sit", 1.0, 100), &mut m);
        assert_eq!(tc.state().consecutive_positive, 2);
        let r = tc.ingest(&TokenEvent::new("sit", -1.0, 200), &mut m);
        assert_eq!(tc.state().consecutive_positive, 0);
        assert!(r.trust < r.trust_before);
    }

    #[test]
    fn streak_bonus_applies_from_fourth_positive() {
        let (mut tc, mut m) = setup();
        let mut bonuses = Vec::new();
        for i in 0..6 {
            let r = tc.ingest(&TokenEvent::new("sit", 0.5, i * 100), &mut m);
            bonuses.push(r.streak_bonus);
        }
        assert_eq!(bonuses, vec![0.0, 0.0, 0.0, 0.05, 0.05, 0.05]);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let (mut tc, mut m) = setup();
        let r = tc.ingest(&TokenEvent::new("sit", 50.0, 0), &mut m);
        assert!((r.trust - 0.1).abs() < 1e-12);
        let r = tc.ingest(&TokenEvent::new("sit", f64::NAN, 100), &mut m);
        assert_eq!(r.trust, r.trust_before);
    }

    #[test]
    fn mimicry_learns_at_reduced_weight() {
        let (mut tc, mut m) = setup();
        let r = tc.ingest(&TokenEvent::new("sit", 1.0, 0), &mut m);
        // 0.1 * 1.0 * 1.0 * 0.3 * (0.5 + 0.5 * 0.1)
        assert!((r.behavior.delta - 0.1 * 0.3 * 0.55).abs() < 1e-12);
    }

    #[test]
    fn shaping_requires_three_behaviors() {
        let (mut tc, mut m) = setup();
        tc.restore(TrustState {
            trust: 0.9,
            phase: Phase::PatternRecognition,
            ..Default::default()
        });
        tc.ingest(&TokenEvent::new("sit", 1.0, 0), &mut m);
        tc.ingest(&TokenEvent::new("stay", 1.0, 100), &mut m);
        assert_eq!(tc.phase(), Phase::PatternRecognition);
        let r = tc.ingest(&TokenEvent::new("roll", 1.0, 200), &mut m);
        assert_eq!(r.phase_changed, Some((Phase::PatternRecognition, Phase::BehaviorShaping)));
        assert!(r.sequence.is_none());

        let r = tc.ingest(&TokenEvent::new("sit", 1.0, 300), &mut m);
        assert_eq!(r.mode, LearningMode::Shaping);
        let seq = r.sequence.expect("sequence learned in shaping");
        assert_eq!(seq.action_id, "stay>roll>sit");
    }

    #[test]
    fn phase_never_regresses() {
        let (mut tc, mut m) = setup();
        tc.restore(TrustState {
            trust: 0.7,
            phase: Phase::BehaviorShaping,
            ..Default::default()
        });
        for i in 0..40 {
            tc.ingest(&TokenEvent::new("bite", -1.0, i * 100), &mut m);
        }
        assert_eq!(tc.trust(), 0.0);
        assert_eq!(tc.phase(), Phase::BehaviorShaping);
    }
}
