//! Failure escalation ladder.
//!
//! When a paid attempt's outcome fails, the companion investigates with
//! progressively cheaper diagnostic actions. Every rung is an ordinary
//! [`ResourceAccount::spend`], so the balance invariant and the risk gate apply
//! to each one. If no diagnostic is affordable, a single emergency analysis is
//! tried and the cheapest known-safe action becomes the fallback. The ladder
//! never fails the caller.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{DenyReason, ResourceAccount, StrategyTier};
use crate::clock::Timestamp;
use crate::logging::log_escalation;
use crate::matrix::BehaviorMatrix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum EscalationStep {
    Diagnostic { kind: String, cost: u64 },
    Emergency { kind: String, cost: u64 },
    Skipped { kind: String, cost: u64, reason: DenyReason },
}

impl EscalationStep {
    pub fn kind(&self) -> &str {
        match self {
            Self::Diagnostic { kind, .. } | Self::Emergency { kind, .. } | Self::Skipped { kind, .. } => kind,
        }
    }

    pub fn spent(&self) -> u64 {
        match self {
            Self::Diagnostic { cost, .. } | Self::Emergency { cost, .. } => *cost,
            Self::Skipped { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub failed_kind: String,
    pub steps: Vec<EscalationStep>,
    /// Set when the ladder bottomed out and the caller should fall back
    pub fallback: Option<String>,
    pub consecutive_failures: u32,
    pub balance_after: u64,
    pub tier: StrategyTier,
}

impl EscalationReport {
    pub fn total_spent(&self) -> u64 {
        self.steps.iter().map(EscalationStep::spent).sum()
    }

    pub fn investigated(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, EscalationStep::Diagnostic { .. }))
    }
}

impl ResourceAccount {
    pub fn escalate(&mut self, failed_kind: &str, matrix: &BehaviorMatrix, now: Timestamp) -> EscalationReport {
        let consecutive_failures = self.record_failure();

        let mut rungs: Vec<(String, u64)> = self
            .config()
            .diagnostic_ladder
            .iter()
            .map(|k| (k.clone(), self.cost_of(k)))
            .collect();
        // Strictly descending cost: each rung is cheaper than the one before
        rungs.sort_by(|a, b| b.1.cmp(&a.1));
        rungs.dedup_by_key(|r| r.1);

        let mut steps = Vec::new();
        for (kind, cost) in rungs {
            let meta = json!({ "escalation_for": failed_kind, "rung": "diagnostic" });
            match self.spend(&kind, Some(cost), meta, matrix, now) {
                Ok(_) => steps.push(EscalationStep::Diagnostic { kind, cost }),
                Err(d) => steps.push(EscalationStep::Skipped { kind, cost, reason: d.reason }),
            }
        }

        let mut fallback = None;
        if !steps.iter().any(|s| matches!(s, EscalationStep::Diagnostic { .. })) {
            let kind = self.config().emergency_action.clone();
            let cost = self.cost_of(&kind);
            let meta = json!({ "escalation_for": failed_kind, "rung": "emergency" });
            match self.spend(&kind, Some(cost), meta, matrix, now) {
                Ok(_) => steps.push(EscalationStep::Emergency { kind, cost }),
                Err(d) => steps.push(EscalationStep::Skipped { kind, cost, reason: d.reason }),
            }
            fallback = Some(self.safe_fallback());
        }

        let kinds: Vec<&str> = steps.iter().map(EscalationStep::kind).collect();
        log_escalation(failed_kind, &kinds, fallback.as_deref(), self.balance());

        EscalationReport {
            failed_kind: failed_kind.to_string(),
            steps,
            fallback,
            consecutive_failures,
            balance_after: self.balance(),
            tier: self.strategy_tier(),
        }
    }

    /// Cheapest priced action kind; the configured safe fallback wins ties.
    pub fn safe_fallback(&self) -> String {
        let cfg = self.config();
        let preferred = &cfg.safe_fallback;
        let preferred_cost = self.cost_of(preferred);
        cfg.cost_table
            .iter()
            .filter(|(_, cost)| **cost < preferred_cost)
            .min_by_key(|(_, cost)| **cost)
            .map(|(kind, _)| kind.clone())
            .unwrap_or_else(|| preferred.clone())
    }
}
