//! Resource economy gate.
//!
//! A finite, never-negative point balance decides whether the companion can
//! afford to attempt a costly behavior:
//!
//! 1. **Hard invariant**: a spend that would take the balance below zero is
//!    always denied (`insufficient_balance`). `balance` is a `u64` and every
//!    subtraction is checked.
//! 2. **Risk gate**: a spend that would leave less than `risk_threshold`
//!    requires `p_success > 0.6` and a positive expected value
//!    (`p_success * reward - cost`), else `unfavorable_risk`.
//!
//! Failed outcomes run the escalation ladder in [`ladder`].

pub mod account;
pub mod ladder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;

pub use account::{Assessment, ResourceAccount};
pub use ladder::{EscalationReport, EscalationStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    InsufficientBalance,
    UnfavorableRisk,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientBalance => "insufficient_balance",
            Self::UnfavorableRisk => "unfavorable_risk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insufficient_balance" => Some(Self::InsufficientBalance),
            "unfavorable_risk" => Some(Self::UnfavorableRisk),
            _ => None,
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialized in the `{allowed, reason?}` boundary shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "AffordabilityVerdict", try_from = "AffordabilityVerdict")]
pub enum Decision {
    Allowed,
    Denied(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allowed => None,
            Decision::Denied(r) => Some(*r),
        }
    }
}

/// Boundary shape handed to feature gates: `{allowed, reason?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffordabilityVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Decision> for AffordabilityVerdict {
    fn from(d: Decision) -> Self {
        Self {
            allowed: d.is_allowed(),
            reason: d.reason().map(|r| r.as_str().to_string()),
        }
    }
}

impl TryFrom<AffordabilityVerdict> for Decision {
    type Error = String;

    fn try_from(v: AffordabilityVerdict) -> Result<Self, Self::Error> {
        if v.allowed {
            return Ok(Decision::Allowed);
        }
        let raw = v.reason.unwrap_or_default();
        DenyReason::parse(&raw)
            .map(Decision::Denied)
            .ok_or_else(|| format!("unknown deny reason {:?}", raw))
    }
}

/// A spend that the gate refused. Expected and recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{action_kind} denied ({reason}): cost {cost}, balance {balance}")]
pub struct Denied {
    pub reason: DenyReason,
    pub action_kind: String,
    pub cost: u64,
    pub balance: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTier {
    Survival,
    Cautious,
    Comfortable,
    Abundant,
}

impl StrategyTier {
    /// `thresholds` are the lower bounds of Abundant, Comfortable, Cautious and
    /// Survival, in that order.
    pub fn from_balance(balance: u64, thresholds: [u64; 4]) -> Self {
        if balance >= thresholds[0] {
            Self::Abundant
        } else if balance >= thresholds[1] {
            Self::Comfortable
        } else if balance >= thresholds[2] {
            Self::Cautious
        } else {
            Self::Survival
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abundant => "abundant",
            Self::Comfortable => "comfortable",
            Self::Cautious => "cautious",
            Self::Survival => "survival",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Spend,
    Earn,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spend => "spend",
            Self::Earn => "earn",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub seq: u64,
    pub kind: TransactionKind,
    pub action_kind: String,
    pub amount: u64,
    pub balance_after: u64,
    pub ts: Timestamp,
    #[serde(default)]
    pub metadata: Value,
}
