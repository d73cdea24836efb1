//! Adaptive difficulty.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Question difficulty tier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// One tier up, saturating at `Hard`.
    pub fn harder(self) -> Self {
        match self {
            Difficulty::Easy => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Hard => Difficulty::Hard,
        }
    }

    /// One tier down, saturating at `Easy`.
    pub fn easier(self) -> Self {
        match self {
            Difficulty::Hard => Difficulty::Medium,
            Difficulty::Medium | Difficulty::Easy => Difficulty::Easy,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => f.write_str("easy"),
            Difficulty::Medium => f.write_str("medium"),
            Difficulty::Hard => f.write_str("hard"),
        }
    }
}

/// Direction of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    Escalate,
    Hold,
    Deescalate,
}

/// Output of [`DifficultyRecommender::recommend`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DifficultyRecommendation {
    pub current: Difficulty,
    pub recommended: Difficulty,
    pub adjustment: Adjustment,
    /// Recency-weighted accuracy over the window, 0.0 with no samples.
    pub weighted_accuracy: f64,
    /// 0.0 below the minimum sample count, rising to 1.0 at a full window.
    pub confidence: f64,
    pub samples: usize,
}

/// Recommends a difficulty tier from recent correctness at the current tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DifficultyRecommender {
    /// Most recent answers considered.
    pub window: usize,
    /// Fewer samples than this and no change is recommended.
    pub min_samples: usize,
    /// Weighted accuracy at or above which to escalate.
    pub escalate_at: f64,
    /// Weighted accuracy below which to de-escalate.
    pub deescalate_below: f64,
    /// Weight multiplier per step back in time; the newest answer weighs 1.0.
    pub decay: f64,
}

impl Default for DifficultyRecommender {
    fn default() -> Self {
        Self {
            window: 10,
            min_samples: 5,
            escalate_at: 0.8,
            deescalate_below: 0.5,
            decay: 0.85,
        }
    }
}

impl DifficultyRecommender {
    /// Recommend a tier given correctness at `current`, oldest first.
    pub fn recommend(&self, current: Difficulty, outcomes: &[bool]) -> DifficultyRecommendation {
        let recent: Vec<bool> = outcomes
            .iter()
            .rev()
            .take(self.window)
            .copied()
            .collect();
        let samples = recent.len();

        let (mut hit, mut total) = (0.0, 0.0);
        let mut weight = 1.0;
        for correct in &recent {
            total += weight;
            if *correct {
                hit += weight;
            }
            weight *= self.decay;
        }
        let weighted_accuracy = if total > 0.0 { hit / total } else { 0.0 };

        let (adjustment, confidence) = if samples < self.min_samples {
            (Adjustment::Hold, 0.0)
        } else {
            let confidence = (samples as f64 / self.window.max(1) as f64).min(1.0);
            let adjustment = if weighted_accuracy >= self.escalate_at {
                Adjustment::Escalate
            } else if weighted_accuracy < self.deescalate_below {
                Adjustment::Deescalate
            } else {
                Adjustment::Hold
            };
            (adjustment, confidence)
        };

        let recommended = match adjustment {
            Adjustment::Escalate => current.harder(),
            Adjustment::Deescalate => current.easier(),
            Adjustment::Hold => current,
        };
        debug!(
            %current,
            %recommended,
            samples,
            weighted_accuracy,
            confidence,
            "Difficulty recommendation"
        );

        DifficultyRecommendation {
            current,
            recommended,
            adjustment,
            weighted_accuracy,
            confidence,
            samples,
        }
    }
}
