//! Behavior association matrix.
//!
//! Learns, per action id, how strongly the companion believes an action will be
//! rewarded:
//!
//! ```text
//! learning_delta = reward * learning_rate * timing_factor
//!                * (1 + consistency * consistency_bonus) * trust_multiplier
//! ```
//!
//! and turns that learned state into a manifestation probability blended with
//! an innate prior. Unknown ids are never an error; they are simply untrained.

pub mod record;

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::config::MatrixConfig;
use crate::logging::{log_extinction, log_manifest, log_reinforce};

pub use record::{signed_unit, unit, BaselineInstinct, BehaviorRecord, HistoryEntry};

/// Caller-supplied situational multiplier on the manifestation probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManifestContext {
    pub modifier: f64,
}

impl Default for ManifestContext {
    fn default() -> Self {
        Self { modifier: 1.0 }
    }
}

impl ManifestContext {
    pub fn new(modifier: f64) -> Self {
        Self { modifier: if modifier.is_nan() { 0.0 } else { modifier.max(0.0) } }
    }

    /// Build a modifier from the collaborator signals: a present user and a
    /// recent reward encourage behavior, stress (0..1) suppresses it.
    pub fn from_signals(user_present: bool, recent_reward: bool, stress: f64) -> Self {
        let mut m = 1.0;
        if user_present {
            m *= 1.2;
        }
        if recent_reward {
            m *= 1.1;
        }
        m *= 1.0 - 0.5 * unit(stress);
        Self::new(m)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManifestDecision {
    pub will_manifest: bool,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorUpdateResult {
    pub action_id: String,
    pub delta: f64,
    pub strength: f64,
    pub confidence: f64,
    pub consistency: f64,
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub decayed: usize,
    pub extinguished: Vec<String>,
    pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct BehaviorMatrix {
    cfg: MatrixConfig,
    records: BTreeMap<String, BehaviorRecord>,
    /// Composite `a>b>c` keys learned during BehaviorShaping
    sequences: BTreeMap<String, BehaviorRecord>,
    instincts: BTreeMap<String, BaselineInstinct>,
}

impl BehaviorMatrix {
    pub fn new(cfg: MatrixConfig) -> Self {
        Self {
            cfg,
            records: BTreeMap::new(),
            sequences: BTreeMap::new(),
            instincts: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.cfg
    }

    pub fn set_instinct(&mut self, action_id: &str, base_reliability: f64) {
        self.instincts
            .insert(action_id.to_string(), BaselineInstinct::new(base_reliability));
    }

    pub fn instinct(&self, action_id: &str) -> f64 {
        self.instincts.get(action_id).map(|i| i.base_reliability).unwrap_or(0.0)
    }

    pub fn record(&self, action_id: &str) -> Option<&BehaviorRecord> {
        self.records.get(action_id)
    }

    pub fn records(&self) -> &BTreeMap<String, BehaviorRecord> {
        &self.records
    }

    pub fn sequences(&self) -> &BTreeMap<String, BehaviorRecord> {
        &self.sequences
    }

    pub fn instincts(&self) -> &BTreeMap<String, BaselineInstinct> {
        &self.instincts
    }

    /// Actions that have received at least one token. Records created by
    /// probability queries or outcome observations do not count.
    pub fn learned_behaviors(&self) -> usize {
        self.records.values().filter(|r| r.reinforcement_count > 0).count()
    }

    pub fn insert_record(&mut self, action_id: &str, record: BehaviorRecord) {
        self.records.insert(action_id.to_string(), record);
    }

    pub fn insert_sequence(&mut self, key: &str, record: BehaviorRecord) {
        self.sequences.insert(key.to_string(), record);
    }

    pub fn clear_instincts(&mut self) {
        self.instincts.clear();
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.sequences.clear();
    }

    pub fn reinforce(
        &mut self,
        action_id: &str,
        reward_value: f64,
        timing_factor: f64,
        trust_multiplier: f64,
        now: Timestamp,
    ) -> BehaviorUpdateResult {
        let result = reinforce_in(
            &mut self.records,
            &self.cfg,
            action_id,
            reward_value,
            timing_factor,
            trust_multiplier,
            now,
        );
        log_reinforce(action_id, result.delta, result.strength, result.confidence);
        result
    }

    /// Reinforce a composite action sequence. `rate` scales the learning rate.
    pub fn reinforce_sequence(
        &mut self,
        key: &str,
        reward_value: f64,
        timing_factor: f64,
        trust_multiplier: f64,
        rate: f64,
        now: Timestamp,
    ) -> BehaviorUpdateResult {
        reinforce_in(
            &mut self.sequences,
            &self.cfg,
            key,
            reward_value,
            timing_factor,
            trust_multiplier * rate,
            now,
        )
    }

    /// Fold a paid action's outcome into its success rate without touching
    /// the learned strength.
    pub fn observe_outcome(&mut self, action_kind: &str, success: bool, now: Timestamp) {
        let record = self
            .records
            .entry(action_kind.to_string())
            .or_insert_with(|| BehaviorRecord::new(now));
        record.outcome_count = record.outcome_count.saturating_add(1);
        record.observe(success);
    }

    /// Learned success rate and observation count, if the kind has any history.
    pub fn success_signal(&self, action_kind: &str) -> Option<(f64, u32)> {
        self.records
            .get(action_kind)
            .filter(|r| r.observations > 0)
            .map(|r| (r.success_rate, r.observations))
    }

    pub fn probability(&mut self, action_id: &str, ctx: ManifestContext, now: Timestamp) -> f64 {
        let cfg = &self.cfg;
        let record = self
            .records
            .entry(action_id.to_string())
            .or_insert_with(|| BehaviorRecord::new(now));
        if record.decay_to(now, cfg) {
            log_extinction(action_id, now.saturating_sub(record.last_reinforced_at));
        }
        let baseline = self.instincts.get(action_id).map(|i| i.base_reliability).unwrap_or(0.0);
        manifestation_probability(record, baseline, ctx, cfg)
    }

    pub fn should_manifest<R: Rng + ?Sized>(
        &mut self,
        action_id: &str,
        ctx: ManifestContext,
        rng: &mut R,
        now: Timestamp,
    ) -> ManifestDecision {
        let probability = self.probability(action_id, ctx, now);
        let draw: f64 = rng.gen();
        let will_manifest = draw < probability;
        if will_manifest {
            if let Some(record) = self.records.get_mut(action_id) {
                record.manifestation_count = record.manifestation_count.saturating_add(1);
                record.last_manifested_at = Some(now);
            }
        }
        log_manifest(action_id, probability, draw, will_manifest);
        ManifestDecision { will_manifest, probability }
    }

    /// Decay every record up to `now` and drop the extinguished ones. Records
    /// holding paid-action outcomes stay (extinguished) so the economy keeps
    /// their success history.
    pub fn sweep(&mut self, now: Timestamp) -> SweepReport {
        let mut report = SweepReport::default();
        for (id, record) in self.records.iter_mut() {
            report.decayed += 1;
            if record.decay_to(now, &self.cfg) {
                log_extinction(id, now.saturating_sub(record.last_reinforced_at));
                report.extinguished.push(id.clone());
            }
        }
        for record in self.sequences.values_mut() {
            record.decay_to(now, &self.cfg);
        }
        let before = self.records.len() + self.sequences.len();
        self.records.retain(|_, r| !r.extinguished || r.outcome_count > 0);
        self.sequences.retain(|_, r| !r.extinguished);
        report.pruned = before - self.records.len() - self.sequences.len();
        report
    }
}

fn reinforce_in(
    table: &mut BTreeMap<String, BehaviorRecord>,
    cfg: &MatrixConfig,
    key: &str,
    reward_value: f64,
    timing_factor: f64,
    trust_multiplier: f64,
    now: Timestamp,
) -> BehaviorUpdateResult {
    let reward = signed_unit(reward_value);
    let timing = unit(timing_factor);
    let multiplier = if trust_multiplier.is_nan() { 0.0 } else { trust_multiplier.max(0.0) };

    let created = !table.contains_key(key);
    let record = table
        .entry(key.to_string())
        .or_insert_with(|| BehaviorRecord::new(now));
    record.decay_to(now, cfg);

    let consistency = record.consistency(reward, cfg.consistency_window);
    let delta = reward
        * cfg.learning_rate
        * timing
        * (1.0 + consistency * cfg.consistency_bonus)
        * multiplier;
    record.apply(
        HistoryEntry { ts: now, reward_value: reward, timing_factor: timing, delta },
        cfg.max_history,
    );

    BehaviorUpdateResult {
        action_id: key.to_string(),
        delta,
        strength: record.strength,
        confidence: record.confidence,
        consistency,
        created,
    }
}

/// Pure manifestation probability for an already-decayed record.
pub fn manifestation_probability(
    record: &BehaviorRecord,
    baseline: f64,
    ctx: ManifestContext,
    cfg: &MatrixConfig,
) -> f64 {
    if record.extinguished {
        return 0.0;
    }
    let learned = record.strength.max(0.0)
        * (0.5 + 0.5 * record.confidence)
        * (1.0 - record.extinction_level);
    let w = record.confidence;
    let blended = w * learned + (1.0 - w) * unit(baseline);
    if blended < cfg.reinforcement_threshold {
        return 0.0;
    }
    unit(blended * ctx.modifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::HOUR_MS;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn trained(strength: f64, confidence: f64) -> BehaviorRecord {
        let mut r = BehaviorRecord::new(0);
        r.strength = strength;
        r.confidence = confidence;
        r.reinforcement_count = 1;
        r
    }

    #[test]
    fn unknown_action_is_created_not_rejected() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        assert_eq!(m.probability("wave", ManifestContext::default(), 0), 0.0);
        assert!(m.record("wave").is_some());
        assert_eq!(m.learned_behaviors(), 0);
    }

    #[test]
    fn reinforce_applies_learning_formula() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        let first = m.reinforce("sit", 1.0, 1.0, 1.0, 0);
        assert!(first.created);
        assert!((first.delta - 0.1).abs() < 1e-12);
        assert_eq!(first.consistency, 0.0);

        // One matching history entry: consistency 1.0 -> bonus 1.5x
        let second = m.reinforce("sit", 1.0, 1.0, 1.0, 0);
        assert!(!second.created);
        assert!((second.consistency - 1.0).abs() < 1e-12);
        assert!((second.delta - 0.15).abs() < 1e-12);
        assert!((second.strength - 0.25).abs() < 1e-12);
        assert!((second.confidence - 0.025).abs() < 1e-12);
    }

    #[test]
    fn negative_rewards_build_aversion() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        for _ in 0..50 {
            m.reinforce("bite", -1.0, 1.0, 1.0, 0);
        }
        let r = m.record("bite").unwrap();
        assert_eq!(r.strength, -1.0);
        assert_eq!(r.success_rate, 0.0);
        assert_eq!(m.probability("bite", ManifestContext::default(), 0), 0.0);
    }

    #[test]
    fn strong_association_manifests_and_fades() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.insert_record("sit", trained(0.9, 0.9));
        let p = m.probability("sit", ManifestContext::default(), 0);
        assert!(p > m.config().reinforcement_threshold, "p={}", p);

        let later = 10 * HOUR_MS;
        assert_eq!(m.probability("sit", ManifestContext::default(), later), 0.0);
        assert!(m.record("sit").unwrap().extinguished);
    }

    #[test]
    fn baseline_carries_untrained_actions() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.set_instinct("sniff", 0.6);
        let p = m.probability("sniff", ManifestContext::default(), 0);
        assert!((p - 0.6).abs() < 1e-12);

        m.set_instinct("yawn", 0.2);
        assert_eq!(m.probability("yawn", ManifestContext::default(), 0), 0.0);
    }

    #[test]
    fn instinct_survives_idle_time_and_sweeps() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.set_instinct("sniff", 0.6);
        assert!((m.probability("sniff", ManifestContext::default(), 0) - 0.6).abs() < 1e-12);

        let minute = 60 * 1_000;
        let p = m.probability("sniff", ManifestContext::default(), minute);
        assert!((p - 0.6).abs() < 1e-12, "p={}", p);
        assert!(!m.record("sniff").unwrap().extinguished);

        let report = m.sweep(10 * HOUR_MS);
        assert!(report.extinguished.is_empty());
        let p = m.probability("sniff", ManifestContext::default(), 10 * HOUR_MS);
        assert!((p - 0.6).abs() < 1e-12, "p={}", p);
    }

    #[test]
    fn context_modifier_scales_and_clamps() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.set_instinct("sniff", 0.6);
        let p = m.probability("sniff", ManifestContext::new(0.5), 0);
        assert!((p - 0.3).abs() < 1e-12);
        let p = m.probability("sniff", ManifestContext::new(3.0), 0);
        assert_eq!(p, 1.0);
    }

    #[test]
    fn context_from_signals() {
        let calm = ManifestContext::from_signals(true, true, 0.0);
        assert!((calm.modifier - 1.32).abs() < 1e-12);
        let stressed = ManifestContext::from_signals(false, false, 1.0);
        assert!((stressed.modifier - 0.5).abs() < 1e-12);
    }

    #[test]
    fn should_manifest_counts_with_seeded_rng() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.set_instinct("sniff", 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let d = m.should_manifest("sniff", ManifestContext::default(), &mut rng, 0);
        assert!(d.will_manifest);
        assert_eq!(d.probability, 1.0);
        assert_eq!(m.record("sniff").unwrap().manifestation_count, 1);

        let d = m.should_manifest("never", ManifestContext::default(), &mut rng, 0);
        assert!(!d.will_manifest);
        assert_eq!(m.record("never").unwrap().manifestation_count, 0);
    }

    #[test]
    fn sequences_do_not_count_as_behaviors() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.reinforce("sit", 1.0, 1.0, 1.0, 0);
        let seq = m.reinforce_sequence("sit>stay", 1.0, 1.0, 1.0, 0.5, 0);
        assert!((seq.delta - 0.05).abs() < 1e-12);
        assert_eq!(m.learned_behaviors(), 1);
        assert_eq!(m.sequences().len(), 1);
    }

    #[test]
    fn observe_outcome_leaves_strength_alone() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.observe_outcome("basic", true, 0);
        m.observe_outcome("basic", false, 0);
        let r = m.record("basic").unwrap();
        assert_eq!(r.strength, 0.0);
        assert_eq!(m.success_signal("basic"), Some((0.5, 2)));
        assert_eq!(m.success_signal("unknown"), None);
    }

    #[test]
    fn outcome_history_survives_sweeps() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        for _ in 0..10 {
            m.observe_outcome("generate_content", false, 0);
        }
        let report = m.sweep(2 * 60 * 1_000);
        assert_eq!(report.pruned, 0);
        assert_eq!(m.success_signal("generate_content"), Some((0.0, 10)));

        // A learned habit that also carries outcomes is extinguished but kept
        m.insert_record("animation", trained(0.4, 0.2));
        m.observe_outcome("animation", true, 0);
        let report = m.sweep(10 * HOUR_MS);
        assert_eq!(report.extinguished, vec!["animation".to_string()]);
        assert_eq!(report.pruned, 0);
        assert!(m.record("animation").unwrap().extinguished);
        assert!(m.success_signal("animation").is_some());
        assert_eq!(m.probability("animation", ManifestContext::default(), 10 * HOUR_MS), 0.0);
        assert_eq!(m.success_signal("generate_content"), Some((0.0, 10)));
    }

    #[test]
    fn sweep_prunes_extinguished_records() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        m.insert_record("old", trained(0.4, 0.2));
        m.reinforce("fresh", 1.0, 1.0, 1.0, 10 * HOUR_MS);
        let report = m.sweep(10 * HOUR_MS);
        assert_eq!(report.extinguished, vec!["old".to_string()]);
        assert_eq!(report.pruned, 1);
        assert!(m.record("old").is_none());
        assert!(m.record("fresh").is_some());
    }

    #[test]
    fn nan_inputs_are_neutralized() {
        let mut m = BehaviorMatrix::new(MatrixConfig::default());
        let r = m.reinforce("sit", f64::NAN, f64::NAN, f64::NAN, 0);
        assert_eq!(r.delta, 0.0);
        assert_eq!(r.strength, 0.0);
    }
}
