//! Engine parameters.
//!
//! Every constant in the trust, matrix and economy math lives here so hosts can
//! tune the companion's temperament without touching the algorithms.
//! `Default` gives the canonical parameter set; `from_env` overrides fields from
//! environment variables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::clock::{Timestamp, HOUR_MS, MINUTE_MS, SECOND_MS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Tokens arriving within this window of the previous one keep full impact
    pub immediate_window_ms: Timestamp,
    /// Time constant for exp(-elapsed / timing_decay_ms)
    pub timing_decay_ms: Timestamp,
    pub base_trust_rate: f64,
    /// Streak length at which the consistency bonus starts to apply
    pub streak_threshold: u32,
    pub consistency_bonus: f64,
    pub pattern_threshold: f64,
    pub shaping_threshold: f64,
    /// Distinct learned actions required before BehaviorShaping
    pub shaping_min_behaviors: usize,
    pub mimicry_weight: f64,
    /// Actions per composite sequence key
    pub sequence_length: usize,
    /// Learning-rate factor for sequence records
    pub sequence_rate: f64,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            immediate_window_ms: 2 * SECOND_MS,
            timing_decay_ms: 10 * SECOND_MS,
            base_trust_rate: 0.1,
            streak_threshold: 4,
            consistency_bonus: 0.05,
            pattern_threshold: 0.3,
            shaping_threshold: 0.6,
            shaping_min_behaviors: 3,
            mimicry_weight: 0.3,
            sequence_length: 3,
            sequence_rate: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub learning_rate: f64,
    /// History entries inspected for the consistency factor
    pub consistency_window: usize,
    pub consistency_bonus: f64,
    pub max_history: usize,
    /// Time constant of the strength/confidence decay
    pub half_life_ms: Timestamp,
    /// Unreinforced time after which extinction kicks in
    pub extinction_threshold_ms: Timestamp,
    /// Idle time past the threshold over which `extinction_rate` accrues once
    pub extinction_period_ms: Timestamp,
    pub extinction_rate: f64,
    pub extinction_epsilon: f64,
    pub reinforcement_threshold: f64,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            consistency_window: 5,
            consistency_bonus: 0.5,
            max_history: 20,
            half_life_ms: HOUR_MS,
            extinction_threshold_ms: 30 * SECOND_MS,
            extinction_period_ms: 10 * MINUTE_MS,
            extinction_rate: 0.05,
            extinction_epsilon: 1e-3,
            reinforcement_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub starting_balance: u64,
    pub risk_threshold: u64,
    pub cost_table: BTreeMap<String, u64>,
    pub reward_table: BTreeMap<String, u64>,
    /// Static prior success rate per action kind
    pub base_success_rates: BTreeMap<String, f64>,
    pub default_cost: u64,
    pub default_reward: u64,
    pub default_success_rate: f64,
    pub failure_penalty: f64,
    pub min_success_probability: f64,
    pub max_success_probability: f64,
    pub min_risk_probability: f64,
    /// Observations at which the learned success rate fully replaces the prior
    pub history_saturation: u32,
    pub efficiency_threshold: f64,
    pub efficiency_bonus: f64,
    /// Abundant, Comfortable, Cautious, Survival lower bounds
    pub tier_thresholds: [u64; 4],
    pub diagnostic_ladder: Vec<String>,
    pub emergency_action: String,
    pub safe_fallback: String,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        let cost_table = table(&[
            ("basic", 15),
            ("animation", 10),
            ("generate_content", 25),
            ("hypothesize", 8),
            ("experiment", 5),
            ("emergency_analysis", 2),
            ("idle", 0),
        ]);
        let reward_table = table(&[
            ("success", 20),
            ("milestone", 20),
            ("partial", 8),
            ("breakthrough", 50),
            ("generate_content", 40),
        ]);
        let base_success_rates = [
            ("basic", 0.7),
            ("animation", 0.8),
            ("generate_content", 0.6),
            ("hypothesize", 0.75),
            ("experiment", 0.7),
            ("emergency_analysis", 0.9),
            ("idle", 0.95),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect();

        Self {
            starting_balance: 100,
            risk_threshold: 20,
            cost_table,
            reward_table,
            base_success_rates,
            default_cost: 10,
            default_reward: 20,
            default_success_rate: 0.5,
            failure_penalty: 0.1,
            min_success_probability: 0.1,
            max_success_probability: 0.95,
            min_risk_probability: 0.6,
            history_saturation: 10,
            efficiency_threshold: 0.8,
            efficiency_bonus: 0.3,
            tier_thresholds: [80, 50, 30, 0],
            diagnostic_ladder: vec!["hypothesize".to_string(), "experiment".to_string()],
            emergency_action: "emergency_analysis".to_string(),
            safe_fallback: "idle".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    pub sweep_interval_ms: Timestamp,
    pub training_timeout_ms: Timestamp,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: MINUTE_MS,
            training_timeout_ms: 30 * SECOND_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub agent_id: String,
    pub rng_seed: Option<u64>,
    pub trust: TrustConfig,
    pub matrix: MatrixConfig,
    pub economy: EconomyConfig,
    pub timers: TimerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_id: "companion".to_string(),
            rng_seed: None,
            trust: TrustConfig::default(),
            matrix: MatrixConfig::default(),
            economy: EconomyConfig::default(),
            timers: TimerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let t = d.trust;
        let m = d.matrix;
        let e = d.economy;
        let tm = d.timers;
        Self {
            agent_id: std::env::var("AGENT_ID").unwrap_or(d.agent_id),
            rng_seed: std::env::var("RNG_SEED").ok().and_then(|v| v.parse().ok()),
            trust: TrustConfig {
                immediate_window_ms: env_or("IMMEDIATE_WINDOW_MS", t.immediate_window_ms),
                timing_decay_ms: env_or("TIMING_DECAY_MS", t.timing_decay_ms),
                base_trust_rate: env_or("TRUST_RATE", t.base_trust_rate),
                streak_threshold: env_or("STREAK_THRESHOLD", t.streak_threshold),
                consistency_bonus: env_or("TRUST_STREAK_BONUS", t.consistency_bonus),
                pattern_threshold: env_or("PATTERN_TH", t.pattern_threshold),
                shaping_threshold: env_or("SHAPING_TH", t.shaping_threshold),
                shaping_min_behaviors: env_or("SHAPING_MIN_BEHAVIORS", t.shaping_min_behaviors),
                mimicry_weight: env_or("MIMICRY_WEIGHT", t.mimicry_weight),
                sequence_length: env_or("SEQUENCE_LEN", t.sequence_length),
                sequence_rate: env_or("SEQUENCE_RATE", t.sequence_rate),
            },
            matrix: MatrixConfig {
                learning_rate: env_or("LEARNING_RATE", m.learning_rate),
                consistency_window: env_or("CONSISTENCY_WINDOW", m.consistency_window),
                consistency_bonus: env_or("CONSISTENCY_BONUS", m.consistency_bonus),
                max_history: env_or("MAX_HISTORY", m.max_history),
                half_life_ms: env_or("HALF_LIFE_MS", m.half_life_ms),
                extinction_threshold_ms: env_or("EXTINCTION_MS", m.extinction_threshold_ms),
                extinction_period_ms: env_or("EXTINCTION_PERIOD_MS", m.extinction_period_ms),
                extinction_rate: env_or("EXTINCTION_RATE", m.extinction_rate),
                extinction_epsilon: env_or("EXTINCTION_EPS", m.extinction_epsilon),
                reinforcement_threshold: env_or("REINFORCEMENT_TH", m.reinforcement_threshold),
            },
            economy: EconomyConfig {
                starting_balance: env_or("START_BALANCE", e.starting_balance),
                risk_threshold: env_or("RISK_THRESHOLD", e.risk_threshold),
                cost_table: env_table("COST_TABLE").unwrap_or(e.cost_table),
                reward_table: env_table("REWARD_TABLE").unwrap_or(e.reward_table),
                base_success_rates: env_table("SUCCESS_RATES").unwrap_or(e.base_success_rates),
                default_cost: env_or("DEFAULT_COST", e.default_cost),
                default_reward: env_or("DEFAULT_REWARD", e.default_reward),
                efficiency_threshold: env_or("EFFICIENCY_TH", e.efficiency_threshold),
                efficiency_bonus: env_or("EFFICIENCY_BONUS", e.efficiency_bonus),
                ..e
            },
            timers: TimerConfig {
                sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", tm.sweep_interval_ms),
                training_timeout_ms: env_or("TRAINING_TIMEOUT_MS", tm.training_timeout_ms),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Parse `"basic=15,animation=10"`. Malformed pairs are skipped; an empty
/// result falls back to the default table.
fn env_table<T: std::str::FromStr>(key: &str) -> Option<BTreeMap<String, T>> {
    let raw = std::env::var(key).ok()?;
    let parsed = parse_table(&raw);
    if parsed.is_empty() {
        None
    } else {
        Some(parsed)
    }
}

pub fn parse_table<T: std::str::FromStr>(raw: &str) -> BTreeMap<String, T> {
    raw.split(',')
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().parse().ok()?))
        })
        .collect()
}

fn table(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_canonical_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.trust.immediate_window_ms, 2_000);
        assert_eq!(cfg.trust.timing_decay_ms, 10_000);
        assert!((cfg.trust.base_trust_rate - 0.1).abs() < 1e-12);
        assert_eq!(cfg.matrix.consistency_window, 5);
        assert_eq!(cfg.matrix.half_life_ms, 3_600_000);
        assert!((cfg.matrix.reinforcement_threshold - 0.3).abs() < 1e-12);
        assert_eq!(cfg.economy.risk_threshold, 20);
        assert_eq!(cfg.economy.tier_thresholds, [80, 50, 30, 0]);
    }

    #[test]
    fn parse_table_skips_malformed_pairs() {
        let t: BTreeMap<String, u64> = parse_table("basic=15, animation = 10,bad,=3,x=abc");
        assert_eq!(t.len(), 2);
        assert_eq!(t["basic"], 15);
        assert_eq!(t["animation"], 10);
    }

    #[test]
    fn diagnostic_ladder_kinds_are_priced() {
        let e = EconomyConfig::default();
        for kind in &e.diagnostic_ladder {
            assert!(e.cost_table.contains_key(kind), "{} has no cost", kind);
        }
        assert!(e.cost_table.contains_key(&e.emergency_action));
        assert_eq!(e.cost_table[&e.safe_fallback], 0);
    }
}
