//! The learning scheduler facade.

use crate::difficulty::{Difficulty, DifficultyRecommendation, DifficultyRecommender};
use crate::error::LearningError;
use crate::predictor::{default_domains, DomainPerformance, ExamDomain, PassPrediction, PassPredictor};
use crate::queue::{study_order, ReviewQueue, StudyPlan};
use crate::sm2::{quality_from_answer, QuestionPerformance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Response time that still earns full quality.
    pub target_latency: Duration,
    pub difficulty: DifficultyRecommender,
    pub predictor: PassPredictor,
    /// Study sessions shorter than this are topped up.
    pub min_session: usize,
    pub weak_accuracy: f64,
    pub weak_min_attempts: u32,
    pub domains: Vec<ExamDomain>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            target_latency: Duration::from_secs(30),
            difficulty: DifficultyRecommender::default(),
            predictor: PassPredictor::default(),
            min_session: 10,
            weak_accuracy: 0.6,
            weak_min_attempts: 3,
            domains: default_domains(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_target_latency(mut self, latency: Duration) -> Self {
        self.target_latency = latency;
        self
    }

    pub fn with_min_session(mut self, min_session: usize) -> Self {
        self.min_session = min_session;
        self
    }

    pub fn with_domains(mut self, domains: Vec<ExamDomain>) -> Self {
        self.domains = domains;
        self
    }

    fn study_plan(&self) -> StudyPlan {
        StudyPlan {
            min_session: self.min_session,
            weak_accuracy: self.weak_accuracy,
            weak_min_attempts: self.weak_min_attempts,
        }
    }
}

/// One answer to record.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub question_id: String,
    pub domain_id: String,
    pub difficulty: Difficulty,
    pub correct: bool,
    pub latency: Duration,
}

impl Answer {
    pub fn new(
        question_id: impl Into<String>,
        domain_id: impl Into<String>,
        correct: bool,
        latency: Duration,
    ) -> Self {
        Self {
            question_id: question_id.into(),
            domain_id: domain_id.into(),
            difficulty: Difficulty::default(),
            correct,
            latency,
        }
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = difficulty;
        self
    }
}

/// One line of answer history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub domain_id: String,
    pub difficulty: Difficulty,
    pub correct: bool,
    pub quality: u8,
    pub latency: Duration,
    pub answered_at: Duration,
}

/// What recording an answer produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerOutcome {
    pub quality: u8,
    pub interval_hours: f64,
    pub next_review: Duration,
    pub ease_factor: f64,
    pub recommendation: DifficultyRecommendation,
}

/// Persistable learner state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningSnapshot {
    pub questions: BTreeMap<String, QuestionPerformance>,
    pub domains: BTreeMap<String, DomainPerformance>,
    pub history: Vec<AnswerRecord>,
}

/// Tracks answers and decides what to study next.
///
/// Time is supplied by the caller on every call; the scheduler never reads a
/// clock.
#[derive(Debug, Clone)]
pub struct LearningScheduler {
    config: SchedulerConfig,
    state: LearningSnapshot,
}

impl Default for LearningScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl LearningScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: LearningSnapshot::default(),
        }
    }

    /// Scheduler resuming from saved state.
    pub fn from_snapshot(config: SchedulerConfig, snapshot: LearningSnapshot) -> Self {
        Self {
            config,
            state: snapshot,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Record an answer at time `now`.
    pub fn record_answer(&mut self, answer: &Answer, now: Duration) -> AnswerOutcome {
        let quality = quality_from_answer(answer.correct, answer.latency, self.config.target_latency);

        let question = self
            .state
            .questions
            .entry(answer.question_id.clone())
            .or_insert_with(|| {
                QuestionPerformance::new(&answer.question_id, &answer.domain_id, answer.difficulty, now)
            });
        question.difficulty = answer.difficulty;
        question.record(quality, now);
        let (interval_hours, next_review, ease_factor) =
            (question.interval_hours, question.next_review, question.ease_factor);

        self.state
            .domains
            .entry(answer.domain_id.clone())
            .or_insert_with(|| DomainPerformance::new(&answer.domain_id))
            .record(answer.correct);

        self.state.history.push(AnswerRecord {
            question_id: answer.question_id.clone(),
            domain_id: answer.domain_id.clone(),
            difficulty: answer.difficulty,
            correct: answer.correct,
            quality,
            latency: answer.latency,
            answered_at: now,
        });

        let recommendation = self.recommend_difficulty(answer.difficulty, Some(&answer.domain_id));
        info!(
            question = %answer.question_id,
            domain = %answer.domain_id,
            correct = answer.correct,
            quality,
            interval_hours,
            "Recorded answer"
        );

        AnswerOutcome {
            quality,
            interval_hours,
            next_review,
            ease_factor,
            recommendation,
        }
    }

    /// Difficulty recommendation from answers at `tier`, optionally within
    /// one domain.
    pub fn recommend_difficulty(
        &self,
        tier: Difficulty,
        domain: Option<&str>,
    ) -> DifficultyRecommendation {
        let outcomes: Vec<bool> = self
            .state
            .history
            .iter()
            .filter(|a| a.difficulty == tier && domain.map_or(true, |d| a.domain_id == d))
            .map(|a| a.correct)
            .collect();
        self.config.difficulty.recommend(tier, &outcomes)
    }

    pub fn question(&self, id: &str) -> Option<&QuestionPerformance> {
        self.state.questions.get(id)
    }

    pub fn domain(&self, id: &str) -> Option<&DomainPerformance> {
        self.state.domains.get(id)
    }

    pub fn history(&self) -> &[AnswerRecord] {
        &self.state.history
    }

    pub fn review_queue(&self, now: Duration) -> ReviewQueue {
        ReviewQueue::build(self.state.questions.values(), now)
    }

    /// Question ids to study now, in order.
    pub fn study_order(&self, now: Duration) -> Vec<String> {
        let records: Vec<&QuestionPerformance> = self.state.questions.values().collect();
        let order = study_order(&records, now, self.config.study_plan());
        debug!(tracked = records.len(), selected = order.len(), "Built study order");
        order
    }

    pub fn predict_pass(&self) -> PassPrediction {
        self.config
            .predictor
            .predict(&self.config.domains, &self.state.domains)
    }

    pub fn snapshot(&self) -> &LearningSnapshot {
        &self.state
    }

    pub fn to_json(&self) -> Result<String, LearningError> {
        Ok(serde_json::to_string_pretty(&self.state)?)
    }

    pub fn from_json(config: SchedulerConfig, json: &str) -> Result<Self, LearningError> {
        let snapshot: LearningSnapshot = serde_json::from_str(json)?;
        Ok(Self::from_snapshot(config, snapshot))
    }

    /// Write learner state as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LearningError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| LearningError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), questions = self.state.questions.len(), "Saved learning state");
        Ok(())
    }

    /// Read learner state written by [`save`](Self::save).
    pub fn load(config: SchedulerConfig, path: impl AsRef<Path>) -> Result<Self, LearningError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| LearningError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(config, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sm2::MAX_INTERVAL_HOURS;
    use tracing_test::traced_test;

    const HOUR: Duration = Duration::from_secs(3600);

    fn fast(id: &str, domain: &str, correct: bool) -> Answer {
        Answer::new(id, domain, correct, Duration::from_secs(5))
    }

    #[traced_test]
    #[test]
    fn test_record_answer_schedules() {
        let mut scheduler = LearningScheduler::default();
        let first = scheduler.record_answer(&fast("q1", "troubleshooting", true), Duration::ZERO);
        assert_eq!(first.quality, 5);
        assert_eq!(first.interval_hours, 1.0);
        assert_eq!(first.next_review, HOUR);

        let second = scheduler.record_answer(&fast("q1", "troubleshooting", true), HOUR);
        assert_eq!(second.interval_hours, 6.0);

        let miss = scheduler.record_answer(&fast("q1", "troubleshooting", false), HOUR * 7);
        assert_eq!(miss.interval_hours, 0.5);
        let q = scheduler.question("q1").unwrap();
        assert_eq!(q.consecutive_correct, 0);
        assert_eq!(q.times_answered, 3);

        let domain = scheduler.domain("troubleshooting").unwrap();
        assert_eq!((domain.attempts, domain.correct), (3, 2));
        assert_eq!(scheduler.history().len(), 3);
        assert!(logs_contain("Recorded answer"));
    }

    #[test]
    fn test_difficulty_follows_tier_history() {
        let mut scheduler = LearningScheduler::default();
        let mut last = None;
        for i in 0..6 {
            let answer = fast(&format!("q{i}"), "cluster_test", true).with_difficulty(Difficulty::Easy);
            last = Some(scheduler.record_answer(&answer, HOUR * i));
        }
        let rec = last.unwrap().recommendation;
        assert_eq!(rec.recommended, Difficulty::Medium);

        let other = scheduler.recommend_difficulty(Difficulty::Hard, None);
        assert_eq!(other.samples, 0);
        assert_eq!(other.recommended, Difficulty::Hard);
    }

    #[test]
    fn test_queue_and_study_order() {
        let mut scheduler = LearningScheduler::new(SchedulerConfig::default().with_min_session(2));
        scheduler.record_answer(&fast("a", "bring_up", true), Duration::ZERO);
        scheduler.record_answer(&fast("b", "bring_up", false), Duration::ZERO);

        let queue = scheduler.review_queue(HOUR / 2);
        assert_eq!(queue.due_now, vec!["b"]);
        assert_eq!(queue.due_today, vec!["a"]);

        assert_eq!(scheduler.study_order(HOUR / 2), vec!["b", "a"]);
    }

    #[test]
    fn test_json_round_trip_on_disk() {
        let mut scheduler = LearningScheduler::default();
        scheduler.record_answer(&fast("q1", "bring_up", true), Duration::ZERO);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        scheduler.save(&path).unwrap();

        let loaded = LearningScheduler::load(SchedulerConfig::default(), &path).unwrap();
        assert_eq!(loaded.snapshot(), scheduler.snapshot());

        let missing = LearningScheduler::load(SchedulerConfig::default(), dir.path().join("none.json"));
        assert!(matches!(missing, Err(LearningError::Io { .. })));

        let garbage = LearningScheduler::from_json(SchedulerConfig::default(), "{not json");
        assert!(matches!(garbage, Err(LearningError::Json(_))));
    }

    #[test]
    fn test_prediction_uses_recorded_domains() {
        let mut scheduler = LearningScheduler::default();
        for i in 0..10 {
            scheduler.record_answer(&fast(&format!("q{i}"), "cluster_test", i < 2), Duration::ZERO);
        }
        let prediction = scheduler.predict_pass();
        assert_eq!(prediction.weakest_domains[0].domain_id, "cluster_test");
        assert!((prediction.confidence - 0.33).abs() < 1e-9);
    }

    #[test]
    fn test_long_fast_streak_keeps_scheduling() {
        let mut scheduler = LearningScheduler::default();
        let mut now = Duration::ZERO;
        for _ in 0..300 {
            let outcome = scheduler.record_answer(&fast("q1", "bring_up", true), now);
            assert!(outcome.interval_hours <= MAX_INTERVAL_HOURS);
            now = outcome.next_review;
        }
        assert_eq!(scheduler.question("q1").unwrap().interval_hours, MAX_INTERVAL_HOURS);
        assert!(scheduler.review_queue(now).due_now.contains(&"q1".to_string()));
    }
}
