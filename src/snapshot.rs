//! Serializable engine state for diagnostics and round-trip re-import.
//!
//! The state hash is a SHA-256 over the canonical JSON of the snapshot with
//! `state_hash` and `exported_at` blanked, so two exports of the same state
//! hash identically regardless of when they were taken.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clock::Timestamp;
use crate::economy::ResourceAccount;
use crate::matrix::{BaselineInstinct, BehaviorRecord};
use crate::schedule::Schedule;
use crate::trust::TrustState;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
    #[error("state hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch { recorded: String, computed: String },
    #[error("{field} out of range for {key:?}: {value}")]
    OutOfRange { field: &'static str, key: String, value: f64 },
    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Counters kept by the facade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub tokens: u64,
    pub manifestation_queries: u64,
    pub manifestations: u64,
    pub spends: u64,
    pub denials: u64,
    pub earnings: u64,
    pub failures: u64,
    pub sweeps: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub agent_id: String,
    pub exported_at: Timestamp,
    pub trust: TrustState,
    pub behaviors: BTreeMap<String, BehaviorRecord>,
    #[serde(default)]
    pub sequences: BTreeMap<String, BehaviorRecord>,
    #[serde(default)]
    pub instincts: BTreeMap<String, BaselineInstinct>,
    pub account: ResourceAccount,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub training_active: bool,
    #[serde(default)]
    pub telemetry: Telemetry,
    #[serde(default)]
    pub state_hash: String,
}

impl EngineSnapshot {
    pub fn compute_hash(&self) -> Result<String, SnapshotError> {
        let mut canonical = self.clone();
        canonical.state_hash.clear();
        canonical.exported_at = 0;
        let bytes = serde_json::to_vec(&canonical)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    pub fn seal(mut self) -> Result<Self, SnapshotError> {
        self.state_hash = self.compute_hash()?;
        Ok(self)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject snapshots that could not have been produced through the public
    /// API. An empty hash skips the integrity check (hand-written fixtures).
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        if !self.state_hash.is_empty() {
            let computed = self.compute_hash()?;
            if computed != self.state_hash {
                return Err(SnapshotError::HashMismatch {
                    recorded: self.state_hash.clone(),
                    computed,
                });
            }
        }
        check_unit("trust", "trust", self.trust.trust)?;
        for (key, r) in self.behaviors.iter().chain(self.sequences.iter()) {
            check_range("strength", key, r.strength, -1.0, 1.0)?;
            check_unit("confidence", key, r.confidence)?;
            check_unit("extinction_level", key, r.extinction_level)?;
            check_unit("success_rate", key, r.success_rate)?;
        }
        for (key, i) in &self.instincts {
            check_unit("base_reliability", key, i.base_reliability)?;
        }
        Ok(())
    }
}

fn check_unit(field: &'static str, key: &str, value: f64) -> Result<(), SnapshotError> {
    check_range(field, key, value, 0.0, 1.0)
}

fn check_range(field: &'static str, key: &str, value: f64, lo: f64, hi: f64) -> Result<(), SnapshotError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(SnapshotError::OutOfRange { field, key: key.to_string(), value })
    }
}
