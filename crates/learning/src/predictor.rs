//! Exam domains and pass prediction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A weighted area of the certification exam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamDomain {
    pub id: String,
    pub name: String,
    /// Share of the exam score; all domains sum to 1.0.
    pub weight: f64,
}

impl ExamDomain {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            weight,
        }
    }
}

/// The five default exam domains.
pub fn default_domains() -> Vec<ExamDomain> {
    vec![
        ExamDomain::new("bring_up", "Systems and Server Bring-up", 0.31),
        ExamDomain::new("physical_layer", "Physical Layer Management", 0.05),
        ExamDomain::new(
            "control_plane",
            "Control Plane Installation and Configuration",
            0.19,
        ),
        ExamDomain::new("cluster_test", "Cluster Test and Verification", 0.33),
        ExamDomain::new("troubleshooting", "Troubleshoot and Optimize", 0.12),
    ]
}

/// Running answer totals for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainPerformance {
    pub domain_id: String,
    pub attempts: u32,
    pub correct: u32,
}

impl DomainPerformance {
    pub fn new(domain_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            ..Self::default()
        }
    }

    pub fn record(&mut self, correct: bool) {
        self.attempts += 1;
        if correct {
            self.correct += 1;
        }
    }

    /// Observed accuracy, `None` before any attempt.
    pub fn accuracy(&self) -> Option<f64> {
        (self.attempts > 0).then(|| f64::from(self.correct) / f64::from(self.attempts))
    }
}

/// One entry of [`PassPrediction::weakest_domains`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStanding {
    pub domain_id: String,
    /// Accuracy used for the prediction (the prior when untested).
    pub accuracy: f64,
    pub weight: f64,
    pub attempts: u32,
}

/// Output of [`PassPredictor::predict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassPrediction {
    /// Weighted expected score in `[0, 1]`.
    pub expected_score: f64,
    pub target_score: f64,
    /// Probability the score reaches the target.
    pub pass_probability: f64,
    pub likely_pass: bool,
    /// 0.0 with no data; 1.0 once every domain has a full sample.
    pub confidence: f64,
    /// Every domain, weakest first.
    pub weakest_domains: Vec<DomainStanding>,
}

/// Predicts the exam outcome from per-domain accuracy.
///
/// Untested domains count at the prior accuracy. Each domain contributes its
/// binomial sampling variance scaled by its squared weight, and the pass
/// probability is the normal tail above the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassPredictor {
    pub target_score: f64,
    pub prior_accuracy: f64,
    /// Attempts per domain for full confidence.
    pub full_sample: u32,
}

impl Default for PassPredictor {
    fn default() -> Self {
        Self {
            target_score: 0.7,
            prior_accuracy: 0.5,
            full_sample: 10,
        }
    }
}

impl PassPredictor {
    pub fn predict(
        &self,
        domains: &[ExamDomain],
        performance: &BTreeMap<String, DomainPerformance>,
    ) -> PassPrediction {
        let mut expected = 0.0;
        let mut variance = 0.0;
        let mut confidence = 0.0;
        let mut standings = Vec::with_capacity(domains.len());

        for domain in domains {
            let perf = performance.get(&domain.id);
            let attempts = perf.map_or(0, |p| p.attempts);
            let accuracy = perf
                .and_then(DomainPerformance::accuracy)
                .unwrap_or(self.prior_accuracy);

            expected += domain.weight * accuracy;
            variance +=
                domain.weight * domain.weight * accuracy * (1.0 - accuracy) / f64::from(attempts.max(1));
            confidence +=
                domain.weight * (f64::from(attempts) / f64::from(self.full_sample.max(1))).min(1.0);

            standings.push(DomainStanding {
                domain_id: domain.id.clone(),
                accuracy,
                weight: domain.weight,
                attempts,
            });
        }

        standings.sort_by(|a, b| {
            a.accuracy
                .total_cmp(&b.accuracy)
                .then_with(|| b.weight.total_cmp(&a.weight))
        });

        let sd = variance.sqrt();
        let pass_probability = if sd <= f64::EPSILON {
            if expected >= self.target_score {
                1.0
            } else {
                0.0
            }
        } else {
            normal_cdf((expected - self.target_score) / sd)
        };

        PassPrediction {
            expected_score: expected,
            target_score: self.target_score,
            pass_probability,
            likely_pass: pass_probability >= 0.5,
            confidence,
            weakest_domains: standings,
        }
    }
}

/// Standard normal CDF via the Abramowitz-Stegun 7.1.26 erf approximation.
fn normal_cdf(z: f64) -> f64 {
    let x = z / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * x.abs());
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-x * x).exp();
    let erf = if x >= 0.0 { erf } else { -erf };
    0.5 * (1.0 + erf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(id: &str, attempts: u32, correct: u32) -> (String, DomainPerformance) {
        (
            id.to_string(),
            DomainPerformance {
                domain_id: id.to_string(),
                attempts,
                correct,
            },
        )
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let total: f64 = default_domains().iter().map(|d| d.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_data_uses_prior() {
        let prediction = PassPredictor::default().predict(&default_domains(), &BTreeMap::new());
        assert!((prediction.expected_score - 0.5).abs() < 1e-9);
        assert_eq!(prediction.confidence, 0.0);
        assert!(prediction.pass_probability < 0.5);
        assert!(!prediction.likely_pass);
    }

    #[test]
    fn test_strong_learner_passes() {
        let performance: BTreeMap<_, _> = default_domains()
            .iter()
            .map(|d| perf(&d.id, 20, 19))
            .collect();
        let prediction = PassPredictor::default().predict(&default_domains(), &performance);
        assert!((prediction.expected_score - 0.95).abs() < 1e-9);
        assert!(prediction.pass_probability > 0.99);
        assert!((prediction.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weakest_domain_first() {
        let performance: BTreeMap<_, _> = [
            perf("bring_up", 10, 9),
            perf("physical_layer", 10, 9),
            perf("control_plane", 10, 9),
            perf("cluster_test", 10, 2),
            perf("troubleshooting", 5, 4),
        ]
        .into_iter()
        .collect();
        let prediction = PassPredictor::default().predict(&default_domains(), &performance);
        assert_eq!(prediction.weakest_domains[0].domain_id, "cluster_test");
        assert!((prediction.confidence - (1.0 - 0.12 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-3);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-3);
    }
}
