//! Mood and color hints for the rendering side.

use serde::{Deserialize, Serialize};

use crate::economy::StrategyTier;
use crate::trust::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Wary,
    Shy,
    Curious,
    Focused,
    Playful,
    Anxious,
}

impl Mood {
    /// Low resources override everything; otherwise the learning phase sets
    /// the tone.
    pub fn derive(phase: Phase, trust: f64, tier: StrategyTier) -> Self {
        if tier == StrategyTier::Survival {
            return Self::Anxious;
        }
        match phase {
            Phase::TrustBuilding if trust < 0.1 => Self::Wary,
            Phase::TrustBuilding => Self::Shy,
            Phase::PatternRecognition => Self::Curious,
            Phase::BehaviorShaping if tier >= StrategyTier::Comfortable => Self::Playful,
            Phase::BehaviorShaping => Self::Focused,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Wary => "#9E9E9E",
            Self::Shy => "#90CAF9",
            Self::Curious => "#FFD54F",
            Self::Focused => "#4FC3F7",
            Self::Playful => "#81C784",
            Self::Anxious => "#E57373",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodHint {
    pub mood: Mood,
    pub color: String,
    pub trust: f64,
    pub phase: Phase,
    pub tier: StrategyTier,
}

impl MoodHint {
    pub fn new(phase: Phase, trust: f64, tier: StrategyTier) -> Self {
        let mood = Mood::derive(phase, trust, tier);
        Self {
            mood,
            color: mood.color().to_string(),
            trust,
            phase,
            tier,
        }
    }
}
