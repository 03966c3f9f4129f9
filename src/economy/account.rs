use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Decision, Denied, DenyReason, StrategyTier, Transaction, TransactionKind};
use crate::clock::Timestamp;
use crate::config::EconomyConfig;
use crate::logging::{log_afford, log_transaction};
use crate::matrix::BehaviorMatrix;

/// Outcome of an affordability check with the numbers behind it. The
/// decision is flattened, so the JSON form is `{allowed, reason?, cost, ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(flatten)]
    pub decision: Decision,
    pub cost: u64,
    pub balance: u64,
    /// Present only when the risk gate ran
    pub p_success: Option<f64>,
    pub expected_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAccount {
    #[serde(rename = "config")]
    cfg: EconomyConfig,
    balance: u64,
    consecutive_failures: u32,
    strategy_tier: StrategyTier,
    transactions: Vec<Transaction>,
}

impl ResourceAccount {
    pub fn new(cfg: EconomyConfig) -> Self {
        let balance = cfg.starting_balance;
        let strategy_tier = StrategyTier::from_balance(balance, cfg.tier_thresholds);
        Self {
            cfg,
            balance,
            consecutive_failures: 0,
            strategy_tier,
            transactions: Vec::new(),
        }
    }

    pub fn config(&self) -> &EconomyConfig {
        &self.cfg
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn strategy_tier(&self) -> StrategyTier {
        self.strategy_tier
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn cost_of(&self, action_kind: &str) -> u64 {
        self.cfg
            .cost_table
            .get(action_kind)
            .copied()
            .unwrap_or(self.cfg.default_cost)
    }

    /// Reward for the action kind itself, else the generic "success" reward.
    pub fn estimate_reward(&self, action_kind: &str) -> u64 {
        self.cfg
            .reward_table
            .get(action_kind)
            .or_else(|| self.cfg.reward_table.get("success"))
            .copied()
            .unwrap_or(self.cfg.default_reward)
    }

    /// Static prior blended with the matrix's observed success rate, weighted
    /// by observation count, then penalized per consecutive failure.
    pub fn estimate_success_probability(&self, action_kind: &str, matrix: &BehaviorMatrix) -> f64 {
        let base = self
            .cfg
            .base_success_rates
            .get(action_kind)
            .copied()
            .unwrap_or(self.cfg.default_success_rate);
        let blended = match matrix.success_signal(action_kind) {
            Some((rate, n)) => {
                let w = (n.min(self.cfg.history_saturation) as f64)
                    / self.cfg.history_saturation.max(1) as f64;
                base * (1.0 - w) + rate * w
            }
            None => base,
        };
        let penalized = blended - self.consecutive_failures as f64 * self.cfg.failure_penalty;
        penalized.clamp(self.cfg.min_success_probability, self.cfg.max_success_probability)
    }

    pub fn assess(&self, action_kind: &str, explicit_cost: Option<u64>, matrix: &BehaviorMatrix) -> Assessment {
        let cost = explicit_cost.unwrap_or_else(|| self.cost_of(action_kind));
        let balance = self.balance;
        let Some(remaining) = balance.checked_sub(cost) else {
            return Assessment {
                decision: Decision::Denied(DenyReason::InsufficientBalance),
                cost,
                balance,
                p_success: None,
                expected_value: None,
            };
        };
        if remaining >= self.cfg.risk_threshold {
            return Assessment {
                decision: Decision::Allowed,
                cost,
                balance,
                p_success: None,
                expected_value: None,
            };
        }

        let p = self.estimate_success_probability(action_kind, matrix);
        let ev = p * self.estimate_reward(action_kind) as f64 - cost as f64;
        let decision = if ev > 0.0 && p > self.cfg.min_risk_probability {
            Decision::Allowed
        } else {
            Decision::Denied(DenyReason::UnfavorableRisk)
        };
        Assessment {
            decision,
            cost,
            balance,
            p_success: Some(p),
            expected_value: Some(ev),
        }
    }

    pub fn can_afford(&self, action_kind: &str, explicit_cost: Option<u64>, matrix: &BehaviorMatrix) -> Decision {
        let a = self.assess(action_kind, explicit_cost, matrix);
        let result = match a.decision {
            Decision::Allowed => "allowed",
            Decision::Denied(r) => r.as_str(),
        };
        log_afford(action_kind, a.cost, a.balance, result, a.p_success);
        a.decision
    }

    /// Re-validate and debit. The check and the debit happen under the same
    /// `&mut self`, so an `Allowed` answer cannot go stale in between.
    pub fn spend(
        &mut self,
        action_kind: &str,
        explicit_cost: Option<u64>,
        metadata: Value,
        matrix: &BehaviorMatrix,
        now: Timestamp,
    ) -> Result<u64, Denied> {
        let a = self.assess(action_kind, explicit_cost, matrix);
        let denied = |reason| Denied {
            reason,
            action_kind: action_kind.to_string(),
            cost: a.cost,
            balance: a.balance,
        };
        if let Decision::Denied(reason) = a.decision {
            log_afford(action_kind, a.cost, a.balance, reason.as_str(), a.p_success);
            return Err(denied(reason));
        }
        let new_balance = self
            .balance
            .checked_sub(a.cost)
            .ok_or_else(|| denied(DenyReason::InsufficientBalance))?;
        self.balance = new_balance;
        self.append(TransactionKind::Spend, action_kind, a.cost, now, metadata);
        Ok(new_balance)
    }

    /// Credit an outcome. An efficiency metric above the threshold adds the
    /// efficiency bonus. Resets the failure streak.
    pub fn earn(
        &mut self,
        outcome_kind: &str,
        explicit_amount: Option<u64>,
        efficiency: Option<f64>,
        now: Timestamp,
    ) -> u64 {
        let base = explicit_amount.unwrap_or_else(|| {
            self.cfg
                .reward_table
                .get(outcome_kind)
                .copied()
                .unwrap_or(self.cfg.default_reward)
        });
        let amount = match efficiency {
            Some(e) if e > self.cfg.efficiency_threshold => {
                (base as f64 * (1.0 + self.cfg.efficiency_bonus)).round() as u64
            }
            _ => base,
        };
        self.balance = self.balance.saturating_add(amount);
        self.consecutive_failures = 0;
        let metadata = match efficiency {
            Some(e) => serde_json::json!({ "base": base, "efficiency": e }),
            None => serde_json::json!({ "base": base }),
        };
        self.append(TransactionKind::Earn, outcome_kind, amount, now, metadata);
        self.balance
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.cfg.clone());
    }

    /// Recompute derived fields after a bulk load.
    pub(crate) fn normalize(&mut self) {
        self.strategy_tier = StrategyTier::from_balance(self.balance, self.cfg.tier_thresholds);
    }

    fn append(&mut self, kind: TransactionKind, action_kind: &str, amount: u64, now: Timestamp, metadata: Value) {
        self.strategy_tier = StrategyTier::from_balance(self.balance, self.cfg.tier_thresholds);
        let tx = Transaction {
            seq: self.transactions.len() as u64,
            kind,
            action_kind: action_kind.to_string(),
            amount,
            balance_after: self.balance,
            ts: now,
            metadata,
        };
        log_transaction(kind.as_str(), action_kind, amount, self.balance, self.strategy_tier.as_str());
        self.transactions.push(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatrixConfig;
    use serde_json::json;

    fn account(balance: u64) -> ResourceAccount {
        ResourceAccount::new(EconomyConfig {
            starting_balance: balance,
            ..Default::default()
        })
    }

    fn matrix() -> BehaviorMatrix {
        BehaviorMatrix::new(MatrixConfig::default())
    }

    #[test]
    fn insufficient_balance_is_always_denied() {
        let mut acc = account(10);
        let m = matrix();
        assert_eq!(
            acc.can_afford("basic", Some(11), &m),
            Decision::Denied(DenyReason::InsufficientBalance)
        );
        let err = acc.spend("basic", Some(11), json!({}), &m, 0).unwrap_err();
        assert_eq!(err.reason, DenyReason::InsufficientBalance);
        assert_eq!(acc.balance(), 10);
        assert!(acc.transactions().is_empty());
    }

    #[test]
    fn comfortable_spend_skips_risk_gate() {
        let mut acc = account(100);
        let m = matrix();
        let a = acc.assess("basic", None, &m);
        assert_eq!(a.decision, Decision::Allowed);
        assert_eq!(a.cost, 15);
        assert!(a.p_success.is_none());
        assert_eq!(acc.spend("basic", None, json!({"why": "test"}), &m, 5), Ok(85));
        let tx = &acc.transactions()[0];
        assert_eq!(tx.kind, TransactionKind::Spend);
        assert_eq!(tx.balance_after, 85);
        assert_eq!(tx.metadata["why"], "test");
    }

    #[test]
    fn assessment_json_carries_verdict_fields() {
        let acc = account(30);
        let a = acc.assess("basic", None, &matrix());
        let json = serde_json::to_value(a).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["reason"], "unfavorable_risk");
        assert_eq!(json["cost"], 15);
        assert!(json["p_success"].is_number());
        assert!(json.get("decision").is_none());
        assert_eq!(serde_json::from_value::<Assessment>(json).unwrap(), a);
    }

    #[test]
    fn unknown_kind_uses_default_cost() {
        let acc = account(100);
        assert_eq!(acc.cost_of("juggle"), 10);
        assert_eq!(acc.estimate_reward("juggle"), 20);
    }

    #[test]
    fn success_estimate_blends_history_and_failures() {
        let mut acc = account(100);
        let mut m = matrix();
        // No history: static base rate
        assert!((acc.estimate_success_probability("basic", &m) - 0.7).abs() < 1e-12);

        // Five failures observed: half weight on a 0.0 rate
        for _ in 0..5 {
            m.observe_outcome("basic", false, 0);
        }
        assert!((acc.estimate_success_probability("basic", &m) - 0.35).abs() < 1e-12);

        acc.record_failure();
        acc.record_failure();
        assert!((acc.estimate_success_probability("basic", &m) - 0.15).abs() < 1e-12);
        for _ in 0..5 {
            acc.record_failure();
        }
        assert_eq!(acc.estimate_success_probability("basic", &m), 0.1);
    }

    #[test]
    fn success_estimate_is_capped() {
        let mut cfg = EconomyConfig::default();
        cfg.base_success_rates.insert("sure".to_string(), 1.0);
        let acc = ResourceAccount::new(cfg);
        assert_eq!(acc.estimate_success_probability("sure", &matrix()), 0.95);
    }

    #[test]
    fn earn_applies_efficiency_bonus_and_clears_failures() {
        let mut acc = account(0);
        acc.record_failure();
        assert_eq!(acc.earn("milestone", Some(20), Some(0.9), 0), 26);
        assert_eq!(acc.consecutive_failures(), 0);
        assert_eq!(acc.earn("milestone", None, Some(0.5), 0), 46);
        assert_eq!(acc.earn("unheard_of", None, None, 0), 66);
    }

    #[test]
    fn tier_tracks_balance() {
        let mut acc = account(100);
        let m = matrix();
        assert_eq!(acc.strategy_tier(), StrategyTier::Abundant);
        acc.spend("x", Some(30), Value::Null, &m, 0).unwrap();
        assert_eq!(acc.strategy_tier(), StrategyTier::Comfortable);
        acc.spend("x", Some(30), Value::Null, &m, 0).unwrap();
        assert_eq!(acc.strategy_tier(), StrategyTier::Cautious);
        acc.spend("x", Some(15), Value::Null, &m, 0).unwrap();
        assert_eq!(acc.strategy_tier(), StrategyTier::Survival);
    }

    #[test]
    fn reset_restores_starting_balance() {
        let mut acc = account(40);
        acc.earn("success", None, None, 0);
        acc.reset();
        assert_eq!(acc.balance(), 40);
        assert!(acc.transactions().is_empty());
    }
}
