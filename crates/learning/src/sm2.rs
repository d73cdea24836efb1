//! SM-2 style spaced repetition.
//!
//! Quality is a 0-5 score. Correct answers (quality ≥ 3) grow the review
//! interval 1 h → 6 h → previous × ease; any incorrect answer collapses it to
//! 0.5 h and zeroes the streak. Intervals stop growing at one year. The ease factor moves by
//! `0.1·d + 0.02·d·|d|` with `d = quality − 3.5`, never below 1.3.

use crate::difficulty::Difficulty;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Lowest ease factor.
pub const MIN_EASE_FACTOR: f64 = 1.3;

/// Ease factor of a new question.
pub const DEFAULT_EASE_FACTOR: f64 = 2.5;

/// Interval after the first correct answer, hours.
pub const FIRST_INTERVAL_HOURS: f64 = 1.0;

/// Interval after the second consecutive correct answer, hours.
pub const SECOND_INTERVAL_HOURS: f64 = 6.0;

/// Interval after any incorrect answer, hours.
pub const RELEARN_INTERVAL_HOURS: f64 = 0.5;

/// Longest review interval, hours (one year).
pub const MAX_INTERVAL_HOURS: f64 = 365.0 * 24.0;

const NEUTRAL_QUALITY: f64 = 3.5;

/// Quality score from correctness and latency.
///
/// Within `target` scores 5 (correct) or 2 (incorrect), within twice the
/// target 4 or 1, slower 3 or 0.
pub fn quality_from_answer(correct: bool, latency: Duration, target: Duration) -> u8 {
    let band = if latency <= target {
        0
    } else if latency <= target * 2 {
        1
    } else {
        2
    };
    match (correct, band) {
        (true, 0) => 5,
        (true, 1) => 4,
        (true, _) => 3,
        (false, 0) => 2,
        (false, 1) => 1,
        (false, _) => 0,
    }
}

/// Spaced-repetition record for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionPerformance {
    pub question_id: String,
    pub domain_id: String,
    pub difficulty: Difficulty,
    pub times_answered: u32,
    pub times_correct: u32,
    pub consecutive_correct: u32,
    pub ease_factor: f64,
    pub interval_hours: f64,
    /// Simulation time the question is next due.
    pub next_review: Duration,
    /// Simulation time of the last answer.
    pub last_answered: Option<Duration>,
}

impl QuestionPerformance {
    /// Fresh record, due immediately.
    pub fn new(
        question_id: impl Into<String>,
        domain_id: impl Into<String>,
        difficulty: Difficulty,
        now: Duration,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            domain_id: domain_id.into(),
            difficulty,
            times_answered: 0,
            times_correct: 0,
            consecutive_correct: 0,
            ease_factor: DEFAULT_EASE_FACTOR,
            interval_hours: 0.0,
            next_review: now,
            last_answered: None,
        }
    }

    /// Fraction answered correctly, 0.0 before any answer.
    pub fn accuracy(&self) -> f64 {
        if self.times_answered == 0 {
            0.0
        } else {
            f64::from(self.times_correct) / f64::from(self.times_answered)
        }
    }

    /// Apply one answer of the given quality at time `now`.
    pub fn record(&mut self, quality: u8, now: Duration) {
        let quality = quality.min(5);
        let correct = quality >= 3;

        self.times_answered += 1;
        if correct {
            self.times_correct += 1;
            self.consecutive_correct += 1;
            self.interval_hours = match self.consecutive_correct {
                1 => FIRST_INTERVAL_HOURS,
                2 => SECOND_INTERVAL_HOURS,
                _ => (self.interval_hours * self.ease_factor).min(MAX_INTERVAL_HOURS),
            };
        } else {
            self.consecutive_correct = 0;
            self.interval_hours = RELEARN_INTERVAL_HOURS;
        }

        let d = f64::from(quality) - NEUTRAL_QUALITY;
        self.ease_factor = (self.ease_factor + 0.1 * d + 0.02 * d * d.abs()).max(MIN_EASE_FACTOR);

        self.last_answered = Some(now);
        self.next_review =
            now.saturating_add(Duration::from_secs_f64(self.interval_hours * 3600.0));

        debug!(
            question = %self.question_id,
            quality,
            streak = self.consecutive_correct,
            ease = self.ease_factor,
            interval_hours = self.interval_hours,
            "Updated spaced-repetition record"
        );
    }

    /// Whether the question is due at `now`.
    pub fn is_due(&self, now: Duration) -> bool {
        self.next_review <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> QuestionPerformance {
        QuestionPerformance::new("q1", "troubleshooting", Difficulty::Medium, Duration::ZERO)
    }

    #[test]
    fn test_quality_bands() {
        let target = Duration::from_secs(30);
        assert_eq!(quality_from_answer(true, Duration::from_secs(10), target), 5);
        assert_eq!(quality_from_answer(true, Duration::from_secs(45), target), 4);
        assert_eq!(quality_from_answer(true, Duration::from_secs(90), target), 3);
        assert_eq!(quality_from_answer(false, Duration::from_secs(30), target), 2);
        assert_eq!(quality_from_answer(false, Duration::from_secs(60), target), 1);
        assert_eq!(quality_from_answer(false, Duration::from_secs(61), target), 0);
    }

    #[test]
    fn test_interval_progression() {
        let mut q = fresh();
        q.record(5, Duration::ZERO);
        assert_eq!(q.interval_hours, 1.0);
        assert_eq!(q.next_review, Duration::from_secs(3600));

        q.record(5, Duration::from_secs(3600));
        assert_eq!(q.interval_hours, 6.0);

        let ease = q.ease_factor;
        q.record(4, Duration::from_secs(6 * 3600));
        assert!((q.interval_hours - 6.0 * ease).abs() < 1e-9);
        assert_eq!(q.consecutive_correct, 3);
        assert_eq!(q.accuracy(), 1.0);
    }

    #[test]
    fn test_incorrect_collapses() {
        let mut q = fresh();
        for _ in 0..4 {
            q.record(5, Duration::ZERO);
        }
        q.record(1, Duration::ZERO);
        assert_eq!(q.consecutive_correct, 0);
        assert_eq!(q.interval_hours, 0.5);
        assert_eq!(q.next_review, Duration::from_secs(1800));
    }

    #[test]
    fn test_ease_moves_with_quality() {
        let mut q = fresh();
        q.record(5, Duration::ZERO);
        assert!(q.ease_factor > DEFAULT_EASE_FACTOR);

        let mut q = fresh();
        q.record(4, Duration::ZERO);
        assert!(q.ease_factor > DEFAULT_EASE_FACTOR);

        let mut q = fresh();
        q.record(3, Duration::ZERO);
        assert!(q.ease_factor < DEFAULT_EASE_FACTOR);
    }

    #[test]
    fn test_ease_floor() {
        let mut q = fresh();
        for _ in 0..100 {
            q.record(0, Duration::ZERO);
            assert!(q.ease_factor >= MIN_EASE_FACTOR);
        }
        assert_eq!(q.ease_factor, MIN_EASE_FACTOR);
    }

    #[test]
    fn test_long_streak_caps_interval() {
        let mut q = fresh();
        for _ in 0..500 {
            q.record(5, q.next_review);
            assert!(q.interval_hours <= MAX_INTERVAL_HOURS);
        }
        assert_eq!(q.interval_hours, MAX_INTERVAL_HOURS);
        assert_eq!(q.consecutive_correct, 500);
    }

    #[test]
    fn test_mixed_speed_streak_stays_bounded() {
        let mut q = fresh();
        let mut now = Duration::ZERO;
        for i in 0..500 {
            let quality = if i % 2 == 0 { 5 } else { 3 };
            q.record(quality, now);
            assert!(q.interval_hours <= MAX_INTERVAL_HOURS);
            assert!(q.next_review >= now);
            assert!(q.next_review - now <= Duration::from_secs_f64(MAX_INTERVAL_HOURS * 3600.0));
            now = q.next_review;
        }
    }

    #[test]
    fn test_next_review_saturates_at_end_of_time() {
        let mut q = fresh();
        q.record(5, Duration::MAX);
        assert_eq!(q.next_review, Duration::MAX);
    }
}
