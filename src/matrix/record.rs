//! Per-action learned state.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::MatrixConfig;

/// One reinforcement applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: Timestamp,
    pub reward_value: f64,
    pub timing_factor: f64,
    pub delta: f64,
}

/// Innate tendency for an action, independent of learning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineInstinct {
    pub base_reliability: f64,
}

impl BaselineInstinct {
    pub fn new(base_reliability: f64) -> Self {
        Self { base_reliability: unit(base_reliability) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    /// Signed association, negative = learned aversion
    pub strength: f64,
    pub confidence: f64,
    pub extinction_level: f64,
    pub last_reinforced_at: Timestamp,
    /// Time up to which decay has already been applied
    pub last_decayed_at: Timestamp,
    pub history: VecDeque<HistoryEntry>,
    pub reinforcement_count: u32,
    /// Reinforcements plus observed paid outcomes, the denominator of success_rate
    pub observations: u32,
    /// Paid-action outcomes folded into success_rate; such records are
    /// never pruned
    #[serde(default)]
    pub outcome_count: u32,
    pub success_rate: f64,
    pub manifestation_count: u32,
    pub last_manifested_at: Option<Timestamp>,
    pub extinguished: bool,
}

impl BehaviorRecord {
    pub fn new(now: Timestamp) -> Self {
        Self {
            strength: 0.0,
            confidence: 0.0,
            extinction_level: 0.0,
            last_reinforced_at: now,
            last_decayed_at: now,
            history: VecDeque::new(),
            reinforcement_count: 0,
            observations: 0,
            outcome_count: 0,
            success_rate: 0.0,
            manifestation_count: 0,
            last_manifested_at: None,
            extinguished: false,
        }
    }

    /// Fraction of the last `window` history entries whose reward sign matches
    /// `reward_value`. Zero rewards match nothing.
    pub fn consistency(&self, reward_value: f64, window: usize) -> f64 {
        let recent: Vec<&HistoryEntry> = self.history.iter().rev().take(window).collect();
        if recent.is_empty() || reward_value == 0.0 {
            return 0.0;
        }
        let sign = reward_value.signum();
        let matching = recent
            .iter()
            .filter(|h| h.reward_value != 0.0 && h.reward_value.signum() == sign)
            .count();
        matching as f64 / recent.len() as f64
    }

    /// Apply one reinforcement delta. Any token revives an extinguished record;
    /// only positive rewards pull extinction back toward zero.
    pub(crate) fn apply(&mut self, entry: HistoryEntry, max_history: usize) {
        self.strength = signed_unit(self.strength + entry.delta);
        self.confidence = unit(self.confidence + entry.delta.abs() * 0.1);
        if entry.reward_value > 0.0 {
            self.extinction_level = unit(self.extinction_level * 0.5);
        }
        self.extinguished = false;
        self.last_reinforced_at = entry.ts;
        self.reinforcement_count = self.reinforcement_count.saturating_add(1);
        self.observe(entry.reward_value > 0.0);

        self.history.push_back(entry);
        while self.history.len() > max_history.max(1) {
            self.history.pop_front();
        }
        self.debug_check();
    }

    /// Fold one success/failure into the incremental success-rate mean.
    pub(crate) fn observe(&mut self, success: bool) {
        self.observations = self.observations.saturating_add(1);
        let x = if success { 1.0 } else { 0.0 };
        self.success_rate = unit(self.success_rate + (x - self.success_rate) / self.observations as f64);
    }

    /// Bring decay up to `now`. Returns true when this call extinguished the
    /// record.
    ///
    /// Decay is applied incrementally from `last_decayed_at`, so any mix of
    /// lazy reads and periodic sweeps composes to exp(-elapsed / half_life).
    /// Extinction pressure accrues `extinction_rate` per
    /// `extinction_period_ms` of idle time past the threshold, for the same
    /// reason.
    pub(crate) fn decay_to(&mut self, now: Timestamp, cfg: &MatrixConfig) -> bool {
        if now <= self.last_decayed_at {
            return false;
        }
        let from = self.last_decayed_at;
        let elapsed = (now - from) as f64;
        let factor = if cfg.half_life_ms == 0 {
            0.0
        } else {
            (-elapsed / cfg.half_life_ms as f64).exp()
        };
        self.strength = signed_unit(self.strength * factor);
        self.confidence = unit(self.confidence * factor);
        self.last_decayed_at = now;

        // Extinction ends learned associations only; an untrained record
        // keeps carrying its instinct.
        let extinct_from = self.last_reinforced_at.saturating_add(cfg.extinction_threshold_ms);
        if self.reinforcement_count == 0 || now <= extinct_from {
            self.debug_check();
            return false;
        }
        let overlap = (now - from.max(extinct_from)) as f64;
        let pressure = cfg.extinction_rate * overlap / cfg.extinction_period_ms.max(1) as f64;
        self.strength = toward_zero(self.strength, pressure);
        self.extinction_level = unit(self.extinction_level + pressure);

        let newly = !self.extinguished && self.strength.abs() <= cfg.extinction_epsilon;
        if newly {
            self.extinguished = true;
            self.strength = 0.0;
        }
        self.debug_check();
        newly
    }

    fn debug_check(&self) {
        debug_assert!((-1.0..=1.0).contains(&self.strength), "strength out of range");
        debug_assert!((0.0..=1.0).contains(&self.confidence), "confidence out of range");
        debug_assert!((0.0..=1.0).contains(&self.extinction_level), "extinction out of range");
    }
}

/// Clamp to [0,1], mapping NaN to 0.
pub fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Clamp to [-1,1], mapping NaN to 0.
pub fn signed_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(-1.0, 1.0)
    }
}

fn toward_zero(x: f64, amount: f64) -> f64 {
    if x > 0.0 {
        (x - amount).max(0.0)
    } else {
        (x + amount).min(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: Timestamp, reward: f64, delta: f64) -> HistoryEntry {
        HistoryEntry { ts, reward_value: reward, timing_factor: 1.0, delta }
    }

    #[test]
    fn consistency_counts_matching_signs_in_window() {
        let mut r = BehaviorRecord::new(0);
        for (i, reward) in [1.0, -1.0, 1.0, 1.0, 1.0, 1.0].iter().enumerate() {
            r.apply(entry(i as u64, *reward, 0.01), 20);
        }
        // Last five: -1, 1, 1, 1, 1
        assert!((r.consistency(1.0, 5) - 0.8).abs() < 1e-12);
        assert!((r.consistency(-1.0, 5) - 0.2).abs() < 1e-12);
        assert_eq!(BehaviorRecord::new(0).consistency(1.0, 5), 0.0);
    }

    #[test]
    fn apply_clamps_and_bounds_history() {
        let mut r = BehaviorRecord::new(0);
        for i in 0..30 {
            r.apply(entry(i, 1.0, 0.5), 20);
        }
        assert_eq!(r.strength, 1.0);
        assert!(r.confidence <= 1.0);
        assert_eq!(r.history.len(), 20);
        assert_eq!(r.reinforcement_count, 30);
        assert!((r.success_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn success_rate_is_incremental_mean() {
        let mut r = BehaviorRecord::new(0);
        r.observe(true);
        r.observe(false);
        r.observe(true);
        r.observe(true);
        assert!((r.success_rate - 0.75).abs() < 1e-12);
    }

    #[test]
    fn decay_composes_across_reads() {
        let cfg = MatrixConfig {
            extinction_threshold_ms: u64::MAX / 2,
            ..Default::default()
        };
        let mut a = BehaviorRecord::new(0);
        a.strength = 0.8;
        a.confidence = 0.5;
        let mut b = a.clone();

        a.decay_to(cfg.half_life_ms, &cfg);
        for step in 1..=10 {
            b.decay_to(cfg.half_life_ms * step / 10, &cfg);
        }
        assert!((a.strength - b.strength).abs() < 1e-9);
        assert!((a.strength - 0.8 * (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn long_idle_extinguishes() {
        let cfg = MatrixConfig::default();
        let mut r = BehaviorRecord::new(0);
        r.strength = 0.9;
        r.reinforcement_count = 1;
        assert!(!r.decay_to(cfg.extinction_threshold_ms, &cfg));
        assert!(r.decay_to(10 * cfg.half_life_ms, &cfg));
        assert!(r.extinguished);
        assert_eq!(r.strength, 0.0);
        assert_eq!(r.extinction_level, 1.0);
        // Already extinguished, no second transition
        assert!(!r.decay_to(20 * cfg.half_life_ms, &cfg));
    }

    #[test]
    fn negative_strength_decays_toward_zero() {
        let cfg = MatrixConfig::default();
        let mut r = BehaviorRecord::new(0);
        r.strength = -0.5;
        r.reinforcement_count = 1;
        r.decay_to(cfg.half_life_ms / 2, &cfg);
        assert!(r.strength < 0.0);
        assert!(r.strength > -0.5);
        assert!(!r.extinguished);
    }

    #[test]
    fn half_life_dominates_the_first_minutes() {
        let cfg = MatrixConfig::default();
        let mut r = BehaviorRecord::new(0);
        r.strength = 0.9;
        r.reinforcement_count = 1;
        r.decay_to(10 * 60 * 1_000, &cfg);
        assert!(!r.extinguished);
        assert!(r.strength > 0.5, "strength {}", r.strength);
    }

    #[test]
    fn untrained_record_never_goes_extinct() {
        let cfg = MatrixConfig::default();
        let mut r = BehaviorRecord::new(0);
        r.observe(true);
        assert!(!r.decay_to(10 * cfg.half_life_ms, &cfg));
        assert!(!r.extinguished);
        assert_eq!(r.extinction_level, 0.0);
    }

    #[test]
    fn positive_token_revives_and_halves_extinction() {
        let mut r = BehaviorRecord::new(0);
        r.extinguished = true;
        r.extinction_level = 0.8;
        r.apply(entry(10, 1.0, 0.1), 20);
        assert!(!r.extinguished);
        assert!((r.extinction_level - 0.4).abs() < 1e-12);
        r.apply(entry(11, -1.0, -0.1), 20);
        assert!((r.extinction_level - 0.4).abs() < 1e-12);
    }
}
