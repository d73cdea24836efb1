//! Adaptive learning scheduler.
//!
//! Two coupled algorithms sit behind [`LearningScheduler`]:
//!
//! - **Spaced repetition** ([`QuestionPerformance::record`]): an SM-2 variant
//!   that turns a 0-5 answer quality into a streak, an ease factor, and the
//!   next review time. [`ReviewQueue`] and [`study_order`] decide what is due.
//! - **Adaptive difficulty** ([`DifficultyRecommender`]): recency-weighted
//!   accuracy at one tier moves the learner up or down one tier at a time.
//!
//! [`PassPredictor`] rolls per-domain accuracy into an expected exam score.
//! All time values are simulation durations passed in by the caller.

mod difficulty;
mod error;
mod predictor;
mod queue;
mod scheduler;
mod sm2;

pub use difficulty::{Adjustment, Difficulty, DifficultyRecommendation, DifficultyRecommender};
pub use error::LearningError;
pub use predictor::{
    default_domains, DomainPerformance, DomainStanding, ExamDomain, PassPrediction, PassPredictor,
};
pub use queue::{study_order, ReviewQueue, StudyPlan};
pub use scheduler::{
    Answer, AnswerOutcome, AnswerRecord, LearningScheduler, LearningSnapshot, SchedulerConfig,
};
pub use sm2::{
    quality_from_answer, QuestionPerformance, DEFAULT_EASE_FACTOR, FIRST_INTERVAL_HOURS,
    MAX_INTERVAL_HOURS, MIN_EASE_FACTOR, RELEARN_INTERVAL_HOURS, SECOND_INTERVAL_HOURS,
};
